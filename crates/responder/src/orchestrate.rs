//! Orchestration coordinator: the once-per-incident setup workflow.
//!
//! Runs asynchronously after incident creation, off the ingestion path.
//! Best-effort fan-out, not a transaction: document creation, war-room
//! creation and the notification broadcast are independent steps, each
//! individually idempotent ("create if the link is still unset"), each
//! recorded in the timeline, and none able to block the others. Failed
//! steps are reported, not rolled back, and not retried here.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collaborators::{ChatCollaborator, DocumentCollaborator};
use crate::config::OrchestrationConfig;
use crate::directory::Directory;
use crate::error::ResponderError;
use crate::incident::{EventKind, Incident, IncidentEvent};
use crate::router::{record_outcomes, NotificationRouter};
use crate::store::IncidentStore;

/// Results of one orchestration run, mirrored into the timeline.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationReport {
    pub incident_id: Uuid,
    pub document_created: bool,
    pub war_room_created: bool,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
}

/// Orchestration coordinator.
pub struct Coordinator {
    store: Arc<IncidentStore>,
    directory: Arc<dyn Directory>,
    router: Arc<NotificationRouter>,
    documents: Option<Arc<dyn DocumentCollaborator>>,
    chat: Option<Arc<dyn ChatCollaborator>>,
    config: OrchestrationConfig,
}

impl Coordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(
        store: Arc<IncidentStore>,
        directory: Arc<dyn Directory>,
        router: Arc<NotificationRouter>,
        documents: Option<Arc<dyn DocumentCollaborator>>,
        chat: Option<Arc<dyn ChatCollaborator>>,
        config: OrchestrationConfig,
    ) -> Self {
        Self {
            store,
            directory,
            router,
            documents,
            chat,
            config,
        }
    }

    /// Fire-and-forget orchestration for a newly created incident.
    ///
    /// The creating request returns before any of this runs.
    pub fn spawn(self: &Arc<Self>, incident_id: Uuid) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            match coordinator.run(incident_id).await {
                Ok(report) => {
                    info!(
                        incident = %incident_id,
                        document = report.document_created,
                        war_room = report.war_room_created,
                        sent = report.notifications_sent,
                        "Orchestration completed"
                    );
                }
                Err(e) => warn!(incident = %incident_id, "Orchestration failed: {e}"),
            }
        });
    }

    /// Run the orchestration workflow for an incident.
    ///
    /// Safe to re-run: completed steps are skipped by their link guards.
    pub async fn run(&self, incident_id: Uuid) -> Result<OrchestrationReport, ResponderError> {
        let incident = self.store.get_required(incident_id).await?;
        info!(incident = %incident.short_id(), "Starting orchestration");

        let mut report = OrchestrationReport {
            incident_id,
            document_created: false,
            war_room_created: false,
            notifications_sent: 0,
            notifications_failed: 0,
        };

        // 1. Document creation
        report.document_created = self.create_document_step(&incident).await;

        // 2. War room, only for severities that warrant one
        if incident.severity.requires_war_room() {
            report.war_room_created = self.create_war_room_step(&incident).await;
        }

        // 3. Broadcast, with whichever links the earlier steps populated.
        //    An un-populated link is omitted, never waited for.
        let current = self.store.get_required(incident_id).await?;
        let recipients = self.router.compute_recipients(&current);
        if recipients.is_empty() {
            warn!(incident = %current.short_id(), "No recipients for broadcast");
        } else {
            let message = self.router.build_message(&current);
            let dispatch = self.router.dispatch(&recipients, &message).await;
            record_outcomes(&self.store, incident_id, "broadcast", &dispatch).await;
            report.notifications_sent = dispatch.sent();
            report.notifications_failed = dispatch.failed();
        }

        self.store
            .append_event(IncidentEvent::new(
                incident_id,
                EventKind::Note,
                "Orchestration completed",
            ))
            .await?;

        Ok(report)
    }

    /// Create the incident document unless a prior run already did.
    async fn create_document_step(&self, incident: &Incident) -> bool {
        if incident.document_link.is_some() {
            return true;
        }
        let Some(documents) = &self.documents else {
            debug!("No document collaborator configured, skipping");
            return false;
        };

        let bounded = timeout(
            Duration::from_secs(self.config.collaborator_timeout_secs),
            documents.create_document(incident),
        );

        match bounded.await {
            Ok(Ok(link)) => {
                if let Err(e) = self.store.set_document_link(incident.id, &link).await {
                    warn!("Failed to persist document link: {e}");
                    return false;
                }
                self.append(
                    incident.id,
                    EventKind::DocumentCreated,
                    format!("Incident document created: {link}"),
                )
                .await;
                true
            }
            Ok(Err(e)) => {
                self.append(
                    incident.id,
                    EventKind::DocumentFailed,
                    format!("Document creation failed: {e}"),
                )
                .await;
                false
            }
            Err(_) => {
                self.append(
                    incident.id,
                    EventKind::DocumentFailed,
                    format!(
                        "Document creation timed out after {}s",
                        self.config.collaborator_timeout_secs
                    ),
                )
                .await;
                false
            }
        }
    }

    /// Create the war room unless a prior run already did.
    async fn create_war_room_step(&self, incident: &Incident) -> bool {
        if incident.war_room_link.is_some() {
            return true;
        }
        let Some(chat) = &self.chat else {
            debug!("No chat collaborator configured, skipping");
            return false;
        };

        let invitees = self.war_room_invitees(incident);
        let bounded = timeout(
            Duration::from_secs(self.config.collaborator_timeout_secs),
            chat.create_channel(incident, &invitees),
        );

        match bounded.await {
            Ok(Ok((link, channel_id))) => {
                if let Err(e) = self.store.set_war_room(incident.id, &link, &channel_id).await {
                    warn!("Failed to persist war room: {e}");
                    return false;
                }
                self.append(
                    incident.id,
                    EventKind::WarRoomCreated,
                    format!("War room created: {link}"),
                )
                .await;
                true
            }
            Ok(Err(e)) => {
                self.append(
                    incident.id,
                    EventKind::WarRoomFailed,
                    format!("War room creation failed: {e}"),
                )
                .await;
                false
            }
            Err(_) => {
                self.append(
                    incident.id,
                    EventKind::WarRoomFailed,
                    format!(
                        "War room creation timed out after {}s",
                        self.config.collaborator_timeout_secs
                    ),
                )
                .await;
                false
            }
        }
    }

    /// Lead, team on-call and impacted-scope addresses.
    fn war_room_invitees(&self, incident: &Incident) -> Vec<String> {
        let mut invitees = vec![];

        if let Some(lead) = &incident.lead {
            invitees.push(lead.clone());
        }

        if let Some(service) = self.directory.service(incident.service_id) {
            if let Some(team) = self.directory.team_of(&service) {
                if let Some(on_call) = self.directory.on_call_of(&team) {
                    if !invitees.contains(&on_call.handle) {
                        invitees.push(on_call.handle);
                    }
                }
            }
        }

        for scope_id in &incident.impacted_scopes {
            if let Some(scope) = self.directory.scope(*scope_id) {
                if let Some(email) = scope.mandatory_notify_email {
                    if !invitees.contains(&email) {
                        invitees.push(email);
                    }
                }
            }
        }

        invitees
    }

    /// Schedule delayed war-room archival after an incident is resolved.
    ///
    /// The delay leaves room for post-incident discussion in the channel.
    pub fn schedule_war_room_archive(self: &Arc<Self>, incident_id: Uuid) {
        let Some(chat) = self.chat.clone() else {
            return;
        };
        let coordinator = Arc::clone(self);
        let delay = Duration::from_secs(coordinator.config.archive_after_minutes * 60);

        tokio::spawn(async move {
            sleep(delay).await;

            let Some(incident) = coordinator.store.get(incident_id).await else {
                return;
            };
            let Some(room_id) = incident.war_room_id.clone() else {
                return;
            };
            if incident.is_open() {
                // Reopened state surfaced between resolve and archive; leave
                // the channel alone.
                return;
            }

            match chat.archive_channel(&room_id).await {
                Ok(()) => {
                    coordinator
                        .append(
                            incident_id,
                            EventKind::WarRoomArchived,
                            format!("War room {room_id} archived"),
                        )
                        .await;
                }
                Err(e) => warn!(incident = %incident.short_id(), "War room archive failed: {e}"),
            }
        });

        debug!(
            incident = %incident_id,
            minutes = self.config.archive_after_minutes,
            at = %Utc::now(),
            "Scheduled war room archive"
        );
    }

    async fn append(&self, incident_id: Uuid, kind: EventKind, message: String) {
        if let Err(e) = self
            .store
            .append_event(IncidentEvent::new(incident_id, kind, message))
            .await
        {
            warn!("Failed to append orchestration event: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DirectoryConfig, ScopeConfig, ServiceConfig, TeamConfig, UserConfig};
    use crate::directory::StaticDirectory;
    use crate::incident::Severity;
    use async_trait::async_trait;
    use notify::ProviderRegistry;
    use std::sync::Mutex;

    struct StubDocuments {
        result: Result<String, String>,
    }

    #[async_trait]
    impl DocumentCollaborator for StubDocuments {
        async fn create_document(&self, _: &Incident) -> Result<String, ResponderError> {
            self.result
                .clone()
                .map_err(ResponderError::ExternalCollaborator)
        }
    }

    struct HangingDocuments;

    #[async_trait]
    impl DocumentCollaborator for HangingDocuments {
        async fn create_document(&self, _: &Incident) -> Result<String, ResponderError> {
            futures::future::pending().await
        }
    }

    struct StubChat {
        invitees_seen: Arc<Mutex<Vec<String>>>,
        archived: Arc<Mutex<Vec<String>>>,
    }

    impl StubChat {
        fn new() -> Self {
            Self {
                invitees_seen: Arc::new(Mutex::new(vec![])),
                archived: Arc::new(Mutex::new(vec![])),
            }
        }
    }

    #[async_trait]
    impl ChatCollaborator for StubChat {
        async fn create_channel(
            &self,
            incident: &Incident,
            invitees: &[String],
        ) -> Result<(String, String), ResponderError> {
            self.invitees_seen.lock().unwrap().extend_from_slice(invitees);
            Ok((
                format!("https://chat.example.com/inc-{}", incident.short_id()),
                "C-WAR".to_string(),
            ))
        }

        async fn archive_channel(&self, channel_id: &str) -> Result<(), ResponderError> {
            self.archived.lock().unwrap().push(channel_id.to_string());
            Ok(())
        }
    }

    fn directory() -> Arc<StaticDirectory> {
        let config = DirectoryConfig {
            teams: vec![TeamConfig {
                name: "SRE".to_string(),
                chat_channel: Some("C-SRE".to_string()),
                email: None,
                on_call: Some("alice".to_string()),
                members: vec!["alice".to_string()],
            }],
            services: vec![ServiceConfig {
                name: "redis-prod".to_string(),
                team: "SRE".to_string(),
                runbook_url: None,
            }],
            scopes: vec![ScopeConfig {
                name: "GDPR".to_string(),
                mandatory_notify_email: Some("dpo@example.com".to_string()),
                active: true,
            }],
            users: vec![UserConfig {
                handle: "alice".to_string(),
                name: None,
                email: None,
                chat_address: Some("U-ALICE".to_string()),
                phone: None,
            }],
            ..DirectoryConfig::default()
        };
        Arc::new(StaticDirectory::from_config(&config).unwrap())
    }

    struct Fixture {
        store: Arc<IncidentStore>,
        directory: Arc<StaticDirectory>,
        chat: Arc<StubChat>,
    }

    fn coordinator(
        fx: &Fixture,
        documents: Option<Arc<dyn DocumentCollaborator>>,
        timeout_secs: u64,
    ) -> Arc<Coordinator> {
        let router = Arc::new(NotificationRouter::new(
            Arc::clone(&fx.directory) as Arc<dyn Directory>,
            Arc::new(ProviderRegistry::empty()),
        ));
        Arc::new(Coordinator::new(
            Arc::clone(&fx.store),
            Arc::clone(&fx.directory) as Arc<dyn Directory>,
            router,
            documents,
            Some(Arc::clone(&fx.chat) as Arc<dyn ChatCollaborator>),
            OrchestrationConfig {
                collaborator_timeout_secs: timeout_secs,
                archive_after_minutes: 0,
            },
        ))
    }

    fn fixture() -> Fixture {
        Fixture {
            store: Arc::new(IncidentStore::new()),
            directory: directory(),
            chat: Arc::new(StubChat::new()),
        }
    }

    async fn create_incident(fx: &Fixture, severity: Severity) -> Incident {
        let service = fx.directory.service_by_name("redis-prod").unwrap();
        let mut incident = Incident::new("Redis down", "", service.id, severity, None);
        incident.lead = Some("bob".to_string());
        let scope = fx.directory.scope_by_name("GDPR").unwrap();
        incident.impacted_scopes = vec![scope.id];
        fx.store.insert(incident).await
    }

    #[tokio::test]
    async fn test_document_failure_does_not_block_war_room_or_broadcast() {
        let fx = fixture();
        let incident = create_incident(&fx, Severity::Critical).await;

        let coordinator = coordinator(
            &fx,
            Some(Arc::new(StubDocuments {
                result: Err("gateway timeout".to_string()),
            })),
            5,
        );
        let report = coordinator.run(incident.id).await.unwrap();

        assert!(!report.document_created);
        assert!(report.war_room_created);

        let current = fx.store.get(incident.id).await.unwrap();
        assert!(current.document_link.is_none());
        assert_eq!(current.war_room_id.as_deref(), Some("C-WAR"));

        let events = fx.store.events_for(incident.id).await;
        assert_eq!(
            events.iter().filter(|e| e.kind == EventKind::DocumentFailed).count(),
            1
        );
        assert_eq!(
            events.iter().filter(|e| e.kind == EventKind::WarRoomCreated).count(),
            1
        );
        // Broadcast still ran: one outcome event per recipient, all failed
        // here because no providers are registered
        assert!(events.iter().any(|e| e.kind == EventKind::NotificationFailed
            && e.message.starts_with("broadcast")));
    }

    #[tokio::test]
    async fn test_war_room_only_for_high_severities() {
        let fx = fixture();
        let incident = create_incident(&fx, Severity::Medium).await;

        let coordinator = coordinator(
            &fx,
            Some(Arc::new(StubDocuments {
                result: Ok("https://docs.example.com/d/1".to_string()),
            })),
            5,
        );
        let report = coordinator.run(incident.id).await.unwrap();

        assert!(report.document_created);
        assert!(!report.war_room_created);
        let current = fx.store.get(incident.id).await.unwrap();
        assert!(current.war_room_link.is_none());
        assert_eq!(
            current.document_link.as_deref(),
            Some("https://docs.example.com/d/1")
        );
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent_on_links() {
        let fx = fixture();
        let incident = create_incident(&fx, Severity::Critical).await;

        let coordinator = coordinator(
            &fx,
            Some(Arc::new(StubDocuments {
                result: Ok("https://docs.example.com/d/1".to_string()),
            })),
            5,
        );
        coordinator.run(incident.id).await.unwrap();
        coordinator.run(incident.id).await.unwrap();

        let events = fx.store.events_for(incident.id).await;
        // Re-running skips completed steps: one creation event each
        assert_eq!(
            events.iter().filter(|e| e.kind == EventKind::DocumentCreated).count(),
            1
        );
        assert_eq!(
            events.iter().filter(|e| e.kind == EventKind::WarRoomCreated).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_hanging_collaborator_is_bounded_by_timeout() {
        let fx = fixture();
        let incident = create_incident(&fx, Severity::Low).await;

        let coordinator = coordinator(&fx, Some(Arc::new(HangingDocuments)), 1);
        let report = coordinator.run(incident.id).await.unwrap();

        assert!(!report.document_created);
        let events = fx.store.events_for(incident.id).await;
        assert!(events
            .iter()
            .any(|e| e.kind == EventKind::DocumentFailed && e.message.contains("timed out")));
    }

    #[tokio::test]
    async fn test_war_room_invitees_cover_lead_oncall_and_scopes() {
        let fx = fixture();
        let incident = create_incident(&fx, Severity::High).await;

        let coordinator = coordinator(&fx, None, 5);
        coordinator.run(incident.id).await.unwrap();

        let invitees = fx.chat.invitees_seen.lock().unwrap().clone();
        assert!(invitees.contains(&"bob".to_string()));
        assert!(invitees.contains(&"alice".to_string()));
        assert!(invitees.contains(&"dpo@example.com".to_string()));
    }

    #[tokio::test]
    async fn test_archive_runs_after_resolution() {
        let fx = fixture();
        let incident = create_incident(&fx, Severity::Critical).await;

        let coordinator = coordinator(&fx, None, 5);
        coordinator.run(incident.id).await.unwrap();
        fx.store.resolve(incident.id, "alice", "fixed").await.unwrap();

        // archive_after_minutes is 0 in the fixture, so this completes fast
        coordinator.schedule_war_room_archive(incident.id);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(fx.chat.archived.lock().unwrap().as_slice(), ["C-WAR"]);
        let events = fx.store.events_for(incident.id).await;
        assert!(events.iter().any(|e| e.kind == EventKind::WarRoomArchived));
    }

    #[tokio::test]
    async fn test_archive_skipped_while_incident_open() {
        let fx = fixture();
        let incident = create_incident(&fx, Severity::Critical).await;

        let coordinator = coordinator(&fx, None, 5);
        coordinator.run(incident.id).await.unwrap();

        coordinator.schedule_war_room_archive(incident.id);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(fx.chat.archived.lock().unwrap().is_empty());
    }
}
