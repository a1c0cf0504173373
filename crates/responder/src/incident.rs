//! Incident domain model: the incident record, its lifecycle state machine,
//! and the append-only timeline events.
//!
//! Transitions are one-directional; skip-ahead to `Resolved` is permitted
//! from any non-terminal state, backward moves never are. KPI values are
//! derived from the stored timestamps, never stored redundantly.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ResponderError;

/// Incident severity levels.
///
/// Critical and High trigger war-room creation automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Display name for this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }

    /// Map a monitoring-source severity label onto an incident severity.
    ///
    /// Unknown labels default to Medium so an odd label never blocks
    /// ingestion.
    #[must_use]
    pub fn from_alert_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "critical" | "sev1" | "p1" | "disaster" => Self::Critical,
            "high" | "error" | "sev2" | "p2" => Self::High,
            "low" | "info" | "sev4" | "p4" => Self::Low,
            _ => Self::Medium,
        }
    }

    /// Whether incidents of this severity get a war room.
    #[must_use]
    pub const fn requires_war_room(&self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }

    /// Color-coding severity for outgoing notifications.
    #[must_use]
    pub const fn notify_severity(&self) -> notify::Severity {
        match self {
            Self::Critical => notify::Severity::Critical,
            Self::High => notify::Severity::Warning,
            Self::Medium | Self::Low => notify::Severity::Info,
        }
    }
}

/// Incident lifecycle status.
///
/// Transitions:
/// - `Triggered -> Acknowledged` (sets `acknowledged_at`)
/// - `Acknowledged -> Mitigated`
/// - any non-resolved -> `Resolved` (sets `resolved_at`, terminal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IncidentStatus {
    Triggered,
    Acknowledged,
    Mitigated,
    Resolved,
}

impl IncidentStatus {
    /// Display name for this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Triggered => "TRIGGERED",
            Self::Acknowledged => "ACKNOWLEDGED",
            Self::Mitigated => "MITIGATED",
            Self::Resolved => "RESOLVED",
        }
    }

    /// Whether the dedup engine treats an incident in this status as
    /// covering new alerts for the same service.
    #[must_use]
    pub const fn blocks_new_incident(&self) -> bool {
        matches!(self, Self::Triggered | Self::Acknowledged)
    }

    /// Whether the incident has reached its terminal state.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved)
    }

    /// Check whether a forward transition to `to` is legal.
    #[must_use]
    pub const fn can_transition_to(&self, to: Self) -> bool {
        match (self, to) {
            // Skip-ahead to the terminal state is always allowed
            (Self::Triggered | Self::Acknowledged | Self::Mitigated, Self::Resolved)
            | (Self::Triggered, Self::Acknowledged)
            | (Self::Acknowledged, Self::Mitigated) => true,
            _ => false,
        }
    }
}

/// Timeline event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    StatusChange,
    AlertReceived,
    NotificationSent,
    NotificationFailed,
    EscalationFired,
    DocumentCreated,
    DocumentFailed,
    WarRoomCreated,
    WarRoomFailed,
    WarRoomArchived,
    ReminderSent,
    Note,
}

/// Append-only timeline entry owned by its incident.
///
/// Never mutated or deleted; ordering within an incident is append order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentEvent {
    /// Event identifier
    pub id: Uuid,
    /// Owning incident
    pub incident_id: Uuid,
    /// Kind of event
    pub kind: EventKind,
    /// Free-text description of what happened
    pub message: String,
    /// Actor that triggered the event, if any
    pub actor: Option<String>,
    /// When the event was appended
    pub timestamp: DateTime<Utc>,
}

impl IncidentEvent {
    /// Create a new event for an incident.
    #[must_use]
    pub fn new(incident_id: Uuid, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            incident_id,
            kind,
            message: message.into(),
            actor: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the acting user.
    #[must_use]
    pub fn by(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// Core incident record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    /// Stable unique identifier
    pub id: Uuid,
    /// Short descriptive title
    pub title: String,
    /// Detailed description
    pub description: String,
    /// Primary affected service
    pub service_id: Uuid,
    /// Severity level
    pub severity: Severity,
    /// Current lifecycle status
    pub status: IncidentStatus,
    /// Functional domains impacted (may be empty)
    pub impacted_scopes: Vec<Uuid>,
    /// Person leading the response (set on acknowledge if unset)
    pub lead: Option<String>,
    /// Link to the post-incident document (set once by the coordinator)
    pub document_link: Option<String>,
    /// Link to the war-room channel (set once by the coordinator)
    pub war_room_link: Option<String>,
    /// Technical channel id of the war room, kept for archiving
    pub war_room_id: Option<String>,
    /// When the underlying problem began
    pub detected_at: DateTime<Utc>,
    /// When the incident record was created
    pub created_at: DateTime<Utc>,
    /// When a human first acknowledged the incident
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// When the incident was resolved
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Incident {
    /// Create a new incident in `Triggered` status.
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        service_id: Uuid,
        severity: Severity,
        detected_at: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            service_id,
            severity,
            status: IncidentStatus::Triggered,
            impacted_scopes: vec![],
            lead: None,
            document_link: None,
            war_room_link: None,
            war_room_id: None,
            detected_at: detected_at.unwrap_or(now),
            created_at: now,
            acknowledged_at: None,
            resolved_at: None,
        }
    }

    /// Short identifier for display and external-facing links.
    ///
    /// First 8 hex characters of the UUID, uppercased, e.g. `A1B2C3D4`.
    #[must_use]
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_uppercase()
    }

    /// Whether the incident is not yet resolved.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        !self.status.is_resolved()
    }

    /// Time between external detection and incident creation.
    #[must_use]
    pub fn mttd(&self) -> Duration {
        self.created_at - self.detected_at
    }

    /// Time between creation and first acknowledgment, if acknowledged.
    #[must_use]
    pub fn mtta(&self) -> Option<Duration> {
        self.acknowledged_at.map(|t| t - self.created_at)
    }

    /// Time between creation and resolution, if resolved.
    #[must_use]
    pub fn mttr(&self) -> Option<Duration> {
        self.resolved_at.map(|t| t - self.created_at)
    }

    /// Apply a lifecycle transition in place.
    ///
    /// Stamps `acknowledged_at`/`resolved_at` exactly once as part of the
    /// same update, and adopts `actor` as lead on acknowledgment if no lead
    /// is set. The caller is responsible for holding the store's write lock
    /// and for appending the matching `StatusChange` event.
    ///
    /// # Errors
    /// Returns [`ResponderError::InvalidTransition`] and leaves the incident
    /// unchanged when the move is not legal.
    pub fn apply_transition(
        &mut self,
        to: IncidentStatus,
        actor: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), ResponderError> {
        if !self.status.can_transition_to(to) {
            return Err(ResponderError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        match to {
            IncidentStatus::Acknowledged => {
                if self.acknowledged_at.is_none() {
                    self.acknowledged_at = Some(now);
                }
                if self.lead.is_none() {
                    self.lead = actor.map(ToString::to_string);
                }
            }
            IncidentStatus::Resolved => {
                if self.resolved_at.is_none() {
                    self.resolved_at = Some(now);
                }
            }
            IncidentStatus::Mitigated | IncidentStatus::Triggered => {}
        }

        self.status = to;
        Ok(())
    }
}
