//! Service/Team/ImpactScope directory and escalation policy lookup.
//!
//! The engine treats these as external read-only directories; this module
//! defines the lookup contracts and a config-backed in-memory
//! implementation. On-call is resolved through a point-in-time query
//! against the shift schedule, falling back to the team's static
//! `current_on_call` field, so richer rotations stay an internal
//! substitution behind the same `on_call_of` contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use notify::ChannelType;

use crate::config::{DirectoryConfig, PolicyStepConfig, StepTargetKind};
use crate::error::ResponderError;
use crate::incident::Severity;

/// A person reachable over one or more channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    /// Stable handle (login)
    pub handle: String,
    /// Display name
    pub name: String,
    /// Email address
    pub email: Option<String>,
    /// Chat address (user/DM id)
    pub chat_address: Option<String>,
    /// Phone number for the urgent channel class
    pub phone: Option<String>,
}

/// A team responsible for services and incident response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    /// Chat channel address for team notifications
    pub chat_channel: Option<String>,
    /// Team distribution-list email
    pub email: Option<String>,
    /// Fallback on-call handle when no shift covers the current time
    pub current_on_call: Option<String>,
    /// Member handles
    pub members: Vec<String>,
}

/// A technical asset owned by a team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    pub team_id: Uuid,
    /// Runbook link, included in notification link lists when present
    pub runbook_url: Option<String>,
}

/// A transverse impact domain (Legal, Security, PR...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactScope {
    pub id: Uuid,
    pub name: String,
    /// Address that must be notified whenever this scope is impacted
    pub mandatory_notify_email: Option<String>,
    pub active: bool,
}

/// One entry of a team's on-call rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnCallShift {
    pub team_id: Uuid,
    pub user: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Target of an escalation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepTarget {
    /// The team's current on-call
    OnCall,
    /// The whole team (team channel / team email)
    Team,
    /// A specific user by handle
    User(String),
    /// A literal email address
    Email(String),
}

/// One step of an escalation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationStep {
    /// Position in the escalation chain; unique within a policy
    pub order: u32,
    /// Minutes after incident creation before this step becomes due
    pub delay_minutes: i64,
    /// Channel class used for this step's notification
    pub channel: ChannelType,
    /// Who to notify
    pub target: StepTarget,
}

/// Escalation configuration for a team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub id: Uuid,
    pub name: String,
    pub team_id: Uuid,
    /// When set, the policy only applies to incidents of this severity;
    /// when unset, the policy is the team default.
    pub severity_filter: Option<Severity>,
    /// Steps, kept sorted by `order`
    pub steps: Vec<EscalationStep>,
}

/// Read-only organization lookups.
pub trait Directory: Send + Sync {
    /// Look up a service by its unique name.
    fn service_by_name(&self, name: &str) -> Option<Service>;

    /// Look up a service by id.
    fn service(&self, id: Uuid) -> Option<Service>;

    /// Resolve the owning team of a service.
    fn team_of(&self, service: &Service) -> Option<Team>;

    /// Resolve the person currently on call for a team.
    fn on_call_of(&self, team: &Team) -> Option<Contact>;

    /// Look up a user by handle.
    fn user(&self, handle: &str) -> Option<Contact>;

    /// Look up an impact scope by id.
    fn scope(&self, id: Uuid) -> Option<ImpactScope>;

    /// Look up an impact scope by name.
    fn scope_by_name(&self, name: &str) -> Option<ImpactScope>;

    /// The sentinel service unresolvable alerts fall back to.
    fn triage_service(&self) -> Service;
}

/// Read-only escalation policy lookups.
pub trait PolicyDirectory: Send + Sync {
    /// Resolve the applicable policy for a team and severity.
    ///
    /// Severity-specific policies win over the team default; `None` means
    /// no escalation is configured, which is not an error.
    fn policy_for(&self, team_id: Uuid, severity: Severity) -> Option<EscalationPolicy>;
}

/// In-memory directory built from the configuration file.
#[derive(Debug)]
pub struct StaticDirectory {
    teams: HashMap<Uuid, Team>,
    services_by_name: HashMap<String, Service>,
    services: HashMap<Uuid, Service>,
    scopes: HashMap<Uuid, ImpactScope>,
    users: HashMap<String, Contact>,
    shifts: Vec<OnCallShift>,
    policies: Vec<EscalationPolicy>,
    triage: Service,
}

impl StaticDirectory {
    /// Build the directory from configuration, resolving name references.
    ///
    /// # Errors
    /// Returns [`ResponderError::UnresolvableReference`] when a service,
    /// shift or policy references a team that does not exist.
    pub fn from_config(config: &DirectoryConfig) -> Result<Self, ResponderError> {
        let mut teams = HashMap::new();
        let mut team_ids_by_name = HashMap::new();

        for tc in &config.teams {
            let id = Uuid::new_v4();
            team_ids_by_name.insert(tc.name.clone(), id);
            teams.insert(
                id,
                Team {
                    id,
                    name: tc.name.clone(),
                    chat_channel: tc.chat_channel.clone(),
                    email: tc.email.clone(),
                    current_on_call: tc.on_call.clone(),
                    members: tc.members.clone(),
                },
            );
        }

        let lookup_team = |name: &str| {
            team_ids_by_name
                .get(name)
                .copied()
                .ok_or_else(|| ResponderError::UnresolvableReference(format!("team '{name}'")))
        };

        let mut services = HashMap::new();
        let mut services_by_name = HashMap::new();
        for sc in &config.services {
            let service = Service {
                id: Uuid::new_v4(),
                name: sc.name.clone(),
                team_id: lookup_team(&sc.team)?,
                runbook_url: sc.runbook_url.clone(),
            };
            services_by_name.insert(service.name.clone(), service.clone());
            services.insert(service.id, service);
        }

        // The triage service is where unresolvable alerts land; create it
        // if the config does not define one explicitly.
        let triage = match services_by_name.get(&config.triage_service) {
            Some(service) => service.clone(),
            None => {
                let team_id = teams
                    .keys()
                    .next()
                    .copied()
                    .ok_or_else(|| {
                        ResponderError::UnresolvableReference(
                            "no teams configured for triage fallback".to_string(),
                        )
                    })?;
                let service = Service {
                    id: Uuid::new_v4(),
                    name: config.triage_service.clone(),
                    team_id,
                    runbook_url: None,
                };
                services_by_name.insert(service.name.clone(), service.clone());
                services.insert(service.id, service.clone());
                service
            }
        };

        let mut scopes = HashMap::new();
        for sc in &config.scopes {
            let scope = ImpactScope {
                id: Uuid::new_v4(),
                name: sc.name.clone(),
                mandatory_notify_email: sc.mandatory_notify_email.clone(),
                active: sc.active,
            };
            scopes.insert(scope.id, scope);
        }

        let users = config
            .users
            .iter()
            .map(|uc| {
                (
                    uc.handle.clone(),
                    Contact {
                        handle: uc.handle.clone(),
                        name: uc.name.clone().unwrap_or_else(|| uc.handle.clone()),
                        email: uc.email.clone(),
                        chat_address: uc.chat_address.clone(),
                        phone: uc.phone.clone(),
                    },
                )
            })
            .collect();

        let mut shifts = Vec::new();
        for shift in &config.shifts {
            shifts.push(OnCallShift {
                team_id: lookup_team(&shift.team)?,
                user: shift.user.clone(),
                start: shift.start,
                end: shift.end,
            });
        }

        let mut policies = Vec::new();
        for pc in &config.policies {
            let mut steps: Vec<EscalationStep> =
                pc.steps.iter().map(build_step).collect();
            steps.sort_by_key(|s| s.order);

            policies.push(EscalationPolicy {
                id: Uuid::new_v4(),
                name: pc.name.clone(),
                team_id: lookup_team(&pc.team)?,
                severity_filter: pc.severity,
                steps,
            });
        }

        Ok(Self {
            teams,
            services_by_name,
            services,
            scopes,
            users,
            shifts,
            policies,
            triage,
        })
    }

    /// Resolve on-call at a specific point in time (schedule first, then
    /// the team's fallback field).
    #[must_use]
    pub fn on_call_at(&self, team: &Team, now: DateTime<Utc>) -> Option<Contact> {
        let scheduled = self
            .shifts
            .iter()
            .find(|s| s.team_id == team.id && s.start <= now && s.end > now)
            .map(|s| s.user.as_str());

        let handle = scheduled.or(team.current_on_call.as_deref())?;
        self.users.get(handle).cloned()
    }

    /// All configured teams (status endpoint).
    #[must_use]
    pub fn team_count(&self) -> usize {
        self.teams.len()
    }
}

fn build_step(sc: &PolicyStepConfig) -> EscalationStep {
    let target = match sc.target {
        StepTargetKind::Oncall => StepTarget::OnCall,
        StepTargetKind::Team => StepTarget::Team,
        StepTargetKind::User => StepTarget::User(sc.target_ref.clone().unwrap_or_default()),
        StepTargetKind::Email => StepTarget::Email(sc.target_ref.clone().unwrap_or_default()),
    };
    EscalationStep {
        order: sc.order,
        delay_minutes: sc.delay_minutes,
        channel: sc.channel,
        target,
    }
}

impl Directory for StaticDirectory {
    fn service_by_name(&self, name: &str) -> Option<Service> {
        self.services_by_name.get(name).cloned()
    }

    fn service(&self, id: Uuid) -> Option<Service> {
        self.services.get(&id).cloned()
    }

    fn team_of(&self, service: &Service) -> Option<Team> {
        self.teams.get(&service.team_id).cloned()
    }

    fn on_call_of(&self, team: &Team) -> Option<Contact> {
        self.on_call_at(team, Utc::now())
    }

    fn user(&self, handle: &str) -> Option<Contact> {
        self.users.get(handle).cloned()
    }

    fn scope(&self, id: Uuid) -> Option<ImpactScope> {
        self.scopes.get(&id).cloned()
    }

    fn scope_by_name(&self, name: &str) -> Option<ImpactScope> {
        self.scopes.values().find(|s| s.name == name).cloned()
    }

    fn triage_service(&self) -> Service {
        self.triage.clone()
    }
}

impl PolicyDirectory for StaticDirectory {
    fn policy_for(&self, team_id: Uuid, severity: Severity) -> Option<EscalationPolicy> {
        // Severity-specific policy wins over the team default
        self.policies
            .iter()
            .find(|p| p.team_id == team_id && p.severity_filter == Some(severity))
            .or_else(|| {
                self.policies
                    .iter()
                    .find(|p| p.team_id == team_id && p.severity_filter.is_none())
            })
            .cloned()
    }
}
