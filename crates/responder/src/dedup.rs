//! Alert deduplication: decide whether an incoming alert is covered by an
//! already-open incident.
//!
//! The admit-or-create decision is serialized per service through the
//! store's service mutex, so a burst of near-simultaneous alerts for one
//! failing service produces exactly one incident; later alerts only grow
//! the winner's timeline.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::directory::Directory;
use crate::error::ResponderError;
use crate::incident::{EventKind, Incident, IncidentEvent, Severity};
use crate::store::IncidentStore;

/// Normalized alert, after source-specific parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPayload {
    /// Service name as reported by the monitoring source
    pub service: String,
    /// Mapped severity
    pub severity: Severity,
    /// Alert headline, becomes the incident title on creation
    pub title: String,
    /// Alert description
    #[serde(default)]
    pub description: String,
    /// When the underlying problem began, per the source
    #[serde(default)]
    pub detected_at: Option<DateTime<Utc>>,
    /// Impact scope names carried by the alert
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Originating source ("alertmanager", "manual", ...)
    pub source: String,
}

/// Result of admitting an alert.
#[derive(Debug, Clone)]
pub struct Admission {
    pub incident: Incident,
    pub is_new: bool,
}

/// Deduplication engine.
pub struct DedupEngine {
    store: Arc<IncidentStore>,
    directory: Arc<dyn Directory>,
}

impl DedupEngine {
    /// Create a dedup engine over a store and directory.
    #[must_use]
    pub fn new(store: Arc<IncidentStore>, directory: Arc<dyn Directory>) -> Self {
        Self { store, directory }
    }

    /// Admit an alert: return the open incident covering it, or create one.
    ///
    /// Idempotent with respect to the incident entity: a duplicate alert
    /// only appends an `AlertReceived` event. Unresolvable services degrade
    /// to the triage service rather than failing ingestion.
    pub async fn admit_alert(&self, alert: AlertPayload) -> Result<Admission, ResponderError> {
        let service = match self.directory.service_by_name(&alert.service) {
            Some(service) => service,
            None => {
                let triage = self.directory.triage_service();
                warn!(
                    service = %alert.service,
                    triage = %triage.name,
                    "Unknown service on alert, falling back to triage"
                );
                triage
            }
        };

        // Serialize admit-or-create per service: two concurrent alerts must
        // not both observe "no open incident" and both create one.
        let lock = self.store.service_lock(service.id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.store.find_open_by_service(service.id).await {
            self.store
                .append_event(IncidentEvent::new(
                    existing.id,
                    EventKind::AlertReceived,
                    format!(
                        "Duplicate alert from {}: {} (severity {})",
                        alert.source,
                        alert.title,
                        alert.severity.as_str()
                    ),
                ))
                .await?;

            debug!(
                incident = %existing.short_id(),
                service = %service.name,
                "Alert deduplicated onto open incident"
            );
            return Ok(Admission {
                incident: existing,
                is_new: false,
            });
        }

        let mut incident = Incident::new(
            alert.title,
            alert.description,
            service.id,
            alert.severity,
            alert.detected_at,
        );
        incident.impacted_scopes = alert
            .scopes
            .iter()
            .filter_map(|name| self.directory.scope_by_name(name))
            .filter(|scope| scope.active)
            .map(|scope| scope.id)
            .collect();

        let incident = self.store.insert(incident).await;
        self.store
            .append_event(IncidentEvent::new(
                incident.id,
                EventKind::Note,
                format!("Incident created from {} alert", alert.source),
            ))
            .await?;

        info!(
            incident = %incident.short_id(),
            service = %service.name,
            severity = incident.severity.as_str(),
            "Created incident"
        );

        Ok(Admission {
            incident,
            is_new: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DirectoryConfig, ScopeConfig, ServiceConfig, TeamConfig};
    use crate::directory::StaticDirectory;

    fn engine() -> (Arc<IncidentStore>, DedupEngine) {
        let config = DirectoryConfig {
            teams: vec![TeamConfig {
                name: "SRE".to_string(),
                chat_channel: Some("C-SRE".to_string()),
                email: None,
                on_call: None,
                members: vec![],
            }],
            services: vec![ServiceConfig {
                name: "redis-prod".to_string(),
                team: "SRE".to_string(),
                runbook_url: None,
            }],
            scopes: vec![
                ScopeConfig {
                    name: "GDPR".to_string(),
                    mandatory_notify_email: Some("dpo@example.com".to_string()),
                    active: true,
                },
                ScopeConfig {
                    name: "Retired".to_string(),
                    mandatory_notify_email: None,
                    active: false,
                },
            ],
            ..DirectoryConfig::default()
        };
        let directory = Arc::new(StaticDirectory::from_config(&config).unwrap());
        let store = Arc::new(IncidentStore::new());
        let engine = DedupEngine::new(Arc::clone(&store), directory);
        (store, engine)
    }

    fn alert(service: &str) -> AlertPayload {
        AlertPayload {
            service: service.to_string(),
            severity: Severity::Critical,
            title: "Redis down".to_string(),
            description: "P99 latency through the roof".to_string(),
            detected_at: None,
            scopes: vec![],
            source: "alertmanager".to_string(),
        }
    }

    #[tokio::test]
    async fn test_first_alert_creates_incident() {
        let (store, engine) = engine();
        let admission = engine.admit_alert(alert("redis-prod")).await.unwrap();
        assert!(admission.is_new);

        let events = store.events_for(admission.incident.id).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Note);
    }

    #[tokio::test]
    async fn test_second_alert_dedupes_onto_open_incident() {
        let (store, engine) = engine();
        let first = engine.admit_alert(alert("redis-prod")).await.unwrap();
        let second = engine.admit_alert(alert("redis-prod")).await.unwrap();

        assert!(!second.is_new);
        assert_eq!(first.incident.id, second.incident.id);

        let events = store.events_for(first.incident.id).await;
        let dup_markers: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventKind::AlertReceived)
            .collect();
        assert_eq!(dup_markers.len(), 1);
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_resolved_incident_does_not_block_new_one() {
        let (store, engine) = engine();
        let first = engine.admit_alert(alert("redis-prod")).await.unwrap();
        store
            .resolve(first.incident.id, "alice", "restarted")
            .await
            .unwrap();

        let second = engine.admit_alert(alert("redis-prod")).await.unwrap();
        assert!(second.is_new);
        assert_ne!(first.incident.id, second.incident.id);
    }

    #[tokio::test]
    async fn test_unknown_service_falls_back_to_triage() {
        let (_store, engine) = engine();
        let admission = engine.admit_alert(alert("mystery-svc")).await.unwrap();
        assert!(admission.is_new);

        // A second alert for the same unknown service dedupes onto the
        // triage incident
        let again = engine.admit_alert(alert("mystery-svc")).await.unwrap();
        assert!(!again.is_new);
        assert_eq!(admission.incident.id, again.incident.id);
    }

    #[tokio::test]
    async fn test_scope_names_resolved_and_inactive_dropped() {
        let (_store, engine) = engine();
        let mut payload = alert("redis-prod");
        payload.scopes = vec![
            "GDPR".to_string(),
            "Retired".to_string(),
            "NoSuchScope".to_string(),
        ];

        let admission = engine.admit_alert(payload).await.unwrap();
        assert_eq!(admission.incident.impacted_scopes.len(), 1);
    }
}
