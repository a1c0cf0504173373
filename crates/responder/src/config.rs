//! Configuration for the responder engine.
//!
//! Loaded from a TOML file (`responder.toml` by default, overridable with
//! `RESPONDER_CONFIG`). Every section has defaults so a minimal file only
//! needs the directory data it actually uses. On-call shift timestamps are
//! RFC 3339 strings.

use serde::{Deserialize, Serialize};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use notify::ChannelType;

use crate::incident::Severity;

/// Environment variable pointing at the config file.
pub const ENV_CONFIG_PATH: &str = "RESPONDER_CONFIG";

/// Default config file path.
pub const DEFAULT_CONFIG_PATH: &str = "responder.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    pub server: ServerConfig,
    pub escalation: EscalationConfig,
    pub orchestration: OrchestrationConfig,
    pub providers: ProvidersConfig,
    pub collaborators: CollaboratorsConfig,
    pub directory: DirectoryConfig,
}

impl ResponderConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Resolve the config path from the environment.
    #[must_use]
    pub fn default_path() -> String {
        std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Escalation engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Seconds between sweeps in serve mode
    pub sweep_interval_secs: u64,
    /// Keep firing not-yet-fired steps after acknowledgment
    pub escalate_acknowledged: bool,
    /// Minutes before an unacknowledged incident gets a reminder
    pub reminder_after_minutes: i64,
    /// Minimum minutes between reminders for one incident
    pub reminder_interval_minutes: i64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            escalate_acknowledged: false,
            reminder_after_minutes: 10,
            reminder_interval_minutes: 15,
        }
    }
}

/// Orchestration coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Bound on each external collaborator call
    pub collaborator_timeout_secs: u64,
    /// Minutes to wait after resolution before archiving the war room
    pub archive_after_minutes: u64,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            collaborator_timeout_secs: 15,
            archive_after_minutes: 30,
        }
    }
}

/// Notification provider settings; unset providers are simply not
/// registered and their channel class degrades to a skipped send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Slack incoming-webhook URL (enables the chat channel class)
    pub slack_webhook_url: Option<String>,
    /// Transactional email API (enables the email channel class)
    pub email: Option<EmailProviderConfig>,
    /// SMS gateway (enables the urgent channel class)
    pub sms: Option<SmsProviderConfig>,
    /// Enable the generic webhook channel class
    pub webhook_enabled: bool,
    /// Per-send timeout in seconds
    pub send_timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            slack_webhook_url: None,
            email: None,
            sms: None,
            webhook_enabled: false,
            send_timeout_secs: 10,
        }
    }
}

/// Transactional email provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailProviderConfig {
    pub endpoint: String,
    pub api_key: String,
    pub from_address: String,
}

/// SMS gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsProviderConfig {
    pub endpoint: String,
    pub api_key: String,
    pub sender: String,
}

/// External collaborator endpoints (document generation, chat channels).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorsConfig {
    /// Document-creation service endpoint
    pub document_endpoint: Option<String>,
    /// Chat-channel service endpoint
    pub chat_endpoint: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for CollaboratorsConfig {
    fn default() -> Self {
        Self {
            document_endpoint: None,
            chat_endpoint: None,
            timeout_secs: 15,
        }
    }
}

// =============================================================================
// Directory data
// =============================================================================

/// Organization data backing the in-memory directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Name of the sentinel service unresolvable alerts fall back to
    pub triage_service: String,
    pub teams: Vec<TeamConfig>,
    pub services: Vec<ServiceConfig>,
    pub scopes: Vec<ScopeConfig>,
    pub users: Vec<UserConfig>,
    pub shifts: Vec<ShiftConfig>,
    pub policies: Vec<PolicyConfig>,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            triage_service: "triage".to_string(),
            teams: vec![],
            services: vec![],
            scopes: vec![],
            users: vec![],
            shifts: vec![],
            policies: vec![],
        }
    }
}

/// A team entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamConfig {
    pub name: String,
    #[serde(default)]
    pub chat_channel: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Fallback on-call handle
    #[serde(default)]
    pub on_call: Option<String>,
    #[serde(default)]
    pub members: Vec<String>,
}

/// A service entry; `team` references a team by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub team: String,
    #[serde(default)]
    pub runbook_url: Option<String>,
}

/// An impact scope entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeConfig {
    pub name: String,
    #[serde(default)]
    pub mandatory_notify_email: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// A user entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub handle: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub chat_address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// An on-call shift entry; timestamps are RFC 3339 strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftConfig {
    pub team: String,
    pub user: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// An escalation policy entry; `team` references a team by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub name: String,
    pub team: String,
    /// Restrict the policy to one severity; omit for the team default
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub steps: Vec<PolicyStepConfig>,
}

/// One escalation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyStepConfig {
    pub order: u32,
    pub delay_minutes: i64,
    /// Channel class for this step
    pub channel: ChannelType,
    /// Target kind
    pub target: StepTargetKind,
    /// Handle (for `user`) or address (for `email`)
    #[serde(default)]
    pub target_ref: Option<String>,
}

/// Kinds of escalation step targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepTargetKind {
    Oncall,
    Team,
    User,
    Email,
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ResponderConfig::default();
        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.escalation.sweep_interval_secs, 60);
        assert!(!config.escalation.escalate_acknowledged);
        assert_eq!(config.orchestration.archive_after_minutes, 30);
        assert_eq!(config.directory.triage_service, "triage");
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [server]
            bind_addr = "127.0.0.1:9000"

            [[directory.teams]]
            name = "SRE"
            chat_channel = "C-SRE"
            members = ["alice"]

            [[directory.services]]
            name = "redis-prod"
            team = "SRE"

            [[directory.policies]]
            name = "sre-critical"
            team = "SRE"
            severity = "CRITICAL"

            [[directory.policies.steps]]
            order = 1
            delay_minutes = 0
            channel = "chat"
            target = "oncall"
        "#;

        let config: ResponderConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.directory.teams.len(), 1);
        assert_eq!(config.directory.policies[0].severity, Some(Severity::Critical));
        assert_eq!(
            config.directory.policies[0].steps[0].target,
            StepTargetKind::Oncall
        );
        // Unset sections fall back to defaults
        assert_eq!(config.escalation.reminder_after_minutes, 10);
    }

    #[test]
    fn test_parse_shift_timestamps() {
        let toml = r#"
            [[directory.shifts]]
            team = "SRE"
            user = "alice"
            start = "2026-08-01T00:00:00Z"
            end = "2026-08-08T00:00:00Z"
        "#;

        let config: ResponderConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.directory.shifts.len(), 1);
        assert!(config.directory.shifts[0].start < config.directory.shifts[0].end);
    }
}
