//! Notification routing: who must be told about an incident, and over
//! which channel.
//!
//! The router computes a deterministic, duplicate-free target list and
//! fans deliveries out through the provider registry. It is stateless per
//! call; callers append one timeline event per delivery outcome.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use notify::{ChannelType, Message, ProviderRegistry, RecipientTarget};

use crate::directory::Directory;
use crate::incident::{EventKind, Incident, IncidentEvent, Severity};
use crate::store::IncidentStore;

/// Per-recipient delivery result.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub target: RecipientTarget,
    /// `None` on success, the error description on failure
    pub error: Option<String>,
}

impl DispatchOutcome {
    /// Whether this delivery succeeded.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of one dispatch fan-out.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<DispatchOutcome>,
}

impl DispatchReport {
    /// Number of successful deliveries.
    #[must_use]
    pub fn sent(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    /// Number of failed deliveries.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.sent()
    }

    /// Whether at least one delivery succeeded.
    #[must_use]
    pub fn any_sent(&self) -> bool {
        self.sent() > 0
    }
}

/// Routes notifications to the appropriate recipients.
pub struct NotificationRouter {
    directory: Arc<dyn Directory>,
    registry: Arc<ProviderRegistry>,
}

impl NotificationRouter {
    /// Create a router over a directory and provider registry.
    #[must_use]
    pub fn new(directory: Arc<dyn Directory>, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            directory,
            registry,
        }
    }

    /// Compute the ordered recipient list for an incident.
    ///
    /// Order: team channel, on-call (urgent SMS added for Critical), then
    /// impacted-scope mandatory addresses. The result never contains two
    /// entries with the same (channel, address) pair.
    #[must_use]
    pub fn compute_recipients(&self, incident: &Incident) -> Vec<RecipientTarget> {
        let mut targets: Vec<RecipientTarget> = vec![];
        let mut seen: HashSet<(ChannelType, String)> = HashSet::new();

        let mut push = |targets: &mut Vec<RecipientTarget>, target: RecipientTarget| {
            let key = (target.channel, target.address.clone());
            if !target.address.is_empty() && seen.insert(key) {
                targets.push(target);
            }
        };

        let Some(service) = self.directory.service(incident.service_id) else {
            warn!(incident = %incident.short_id(), "Service not found, no recipients");
            return targets;
        };

        // 1. Technical recipients: owning team's channel, then on-call
        if let Some(team) = self.directory.team_of(&service) {
            if let Some(channel) = &team.chat_channel {
                push(&mut targets, RecipientTarget::new(ChannelType::Chat, channel));
            }

            if let Some(on_call) = self.directory.on_call_of(&team) {
                if let Some(chat) = &on_call.chat_address {
                    push(&mut targets, RecipientTarget::new(ChannelType::Chat, chat));
                }
                // Critical incidents page the on-call over the urgent
                // channel class in addition to chat
                if incident.severity == Severity::Critical {
                    if let Some(phone) = &on_call.phone {
                        push(&mut targets, RecipientTarget::urgent(ChannelType::Sms, phone));
                    }
                }
            }
        } else {
            warn!(
                incident = %incident.short_id(),
                service = %service.name,
                "Service has no resolvable team"
            );
        }

        // 2. Functional recipients: impacted scopes with a mandatory address
        for scope_id in &incident.impacted_scopes {
            let Some(scope) = self.directory.scope(*scope_id) else {
                continue;
            };
            if !scope.active {
                continue;
            }
            if let Some(email) = &scope.mandatory_notify_email {
                push(&mut targets, RecipientTarget::new(ChannelType::Email, email));
            }
        }

        debug!(
            incident = %incident.short_id(),
            recipients = targets.len(),
            "Computed recipient list"
        );

        targets
    }

    /// Build the broadcast message for an incident, including whichever
    /// links are populated at send time.
    #[must_use]
    pub fn build_message(&self, incident: &Incident) -> Message {
        let service_name = self
            .directory
            .service(incident.service_id)
            .map_or_else(|| "unknown".to_string(), |s| s.name);

        let body = if incident.description.is_empty() {
            "No description provided.".to_string()
        } else {
            incident.description.clone()
        };

        let mut message = Message::new(
            format!(
                "🚨 [{}] {} ({})",
                incident.severity.as_str(),
                incident.title,
                incident.short_id()
            ),
            body,
            incident.severity.notify_severity(),
        )
        .with_field("Service", &service_name)
        .with_field("Severity", incident.severity.as_str())
        .with_field("Status", incident.status.as_str());

        // An un-populated link is omitted, never waited for
        if let Some(link) = &incident.document_link {
            message = message.with_link(format!("📄 Document: {link}"));
        }
        if let Some(link) = &incident.war_room_link {
            message = message.with_link(format!("💬 War Room: {link}"));
        }
        if let Some(runbook) = self
            .directory
            .service(incident.service_id)
            .and_then(|s| s.runbook_url)
        {
            message = message.with_link(format!("📖 Runbook: {runbook}"));
        }

        message
    }

    /// Deliver a message to each recipient independently.
    ///
    /// A failure on one recipient never aborts delivery to the others; the
    /// report carries every per-recipient outcome.
    pub async fn dispatch(
        &self,
        recipients: &[RecipientTarget],
        message: &Message,
    ) -> DispatchReport {
        let sends = recipients.iter().map(|target| {
            let registry = Arc::clone(&self.registry);
            async move {
                let result = registry.send(target, message).await;
                DispatchOutcome {
                    target: target.clone(),
                    error: result.err().map(|e| e.to_string()),
                }
            }
        });

        DispatchReport {
            outcomes: join_all(sends).await,
        }
    }
}

/// Append one timeline event per delivery outcome.
pub async fn record_outcomes(
    store: &IncidentStore,
    incident_id: uuid::Uuid,
    context: &str,
    report: &DispatchReport,
) {
    for outcome in &report.outcomes {
        let (kind, message) = match &outcome.error {
            None => (
                EventKind::NotificationSent,
                format!(
                    "{context}: notified {} via {}",
                    outcome.target.address,
                    outcome.target.channel.as_str()
                ),
            ),
            Some(error) => (
                EventKind::NotificationFailed,
                format!(
                    "{context}: failed to notify {} via {}: {error}",
                    outcome.target.address,
                    outcome.target.channel.as_str()
                ),
            ),
        };

        if let Err(e) = store
            .append_event(IncidentEvent::new(incident_id, kind, message))
            .await
        {
            warn!("Failed to record notification outcome: {e}");
        }
    }
}
