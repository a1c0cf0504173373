//! In-process incident store with atomic read-modify-write semantics.
//!
//! All components read and write through this store; incidents cross task
//! boundaries as owned clones, never as shared references. Mutations happen
//! in short write-lock sections, per-service mutexes serialize the dedup
//! engine's admit-or-create critical section, and a `(incident, step)`
//! claim set enforces exactly-once escalation firing even when sweep
//! executions overlap.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::ResponderError;
use crate::incident::{EventKind, Incident, IncidentEvent, IncidentStatus};

/// Outcome of a fired escalation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationOutcome {
    /// Row claimed, dispatch in flight
    Pending,
    /// At least one send succeeded
    Notified,
    /// Every send failed; the row still stands so the step is not retried
    Failed,
}

/// One row per (incident, step) firing.
///
/// The row's existence is the idempotency guard: it is claimed before
/// dispatch and never deleted, so a step can fire at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentEscalation {
    pub incident_id: Uuid,
    pub policy_id: Uuid,
    pub step_order: u32,
    pub fired_at: DateTime<Utc>,
    pub outcome: EscalationOutcome,
    /// Human-readable summary of who was notified (or why it failed)
    pub detail: String,
}

#[derive(Default)]
struct StoreInner {
    incidents: HashMap<Uuid, Incident>,
    events: HashMap<Uuid, Vec<IncidentEvent>>,
    escalations: HashMap<Uuid, Vec<IncidentEscalation>>,
    fired: HashSet<(Uuid, u32)>,
}

/// Durable-state stand-in for incidents, their timelines, and escalation
/// rows.
pub struct IncidentStore {
    inner: RwLock<StoreInner>,
    service_locks: StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl Default for IncidentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IncidentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            service_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Get the admit-or-create mutex for a service.
    ///
    /// The dedup engine holds this across its check-then-create sequence so
    /// concurrent alerts for one service cannot both observe "no open
    /// incident". Scoped per service key, not global.
    #[must_use]
    pub fn service_lock(&self, service_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.service_locks.lock().expect("service lock map poisoned");
        locks
            .entry(service_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Insert a new incident.
    pub async fn insert(&self, incident: Incident) -> Incident {
        let mut inner = self.inner.write().await;
        inner.events.entry(incident.id).or_default();
        inner.escalations.entry(incident.id).or_default();
        inner.incidents.insert(incident.id, incident.clone());
        incident
    }

    /// Fetch an incident by id.
    pub async fn get(&self, id: Uuid) -> Option<Incident> {
        self.inner.read().await.incidents.get(&id).cloned()
    }

    /// Fetch an incident, erroring when it does not exist.
    pub async fn get_required(&self, id: Uuid) -> Result<Incident, ResponderError> {
        self.get(id).await.ok_or(ResponderError::NotFound(id))
    }

    /// All incidents, newest first.
    pub async fn list(&self) -> Vec<Incident> {
        let inner = self.inner.read().await;
        let mut incidents: Vec<_> = inner.incidents.values().cloned().collect();
        incidents.sort_by_key(|i| std::cmp::Reverse(i.created_at));
        incidents
    }

    /// Incidents with status Triggered or Acknowledged, oldest first.
    pub async fn list_open(&self) -> Vec<Incident> {
        let inner = self.inner.read().await;
        let mut incidents: Vec<_> = inner
            .incidents
            .values()
            .filter(|i| i.status.blocks_new_incident())
            .cloned()
            .collect();
        incidents.sort_by_key(|i| i.created_at);
        incidents
    }

    /// Find the open incident covering a service, if any.
    pub async fn find_open_by_service(&self, service_id: Uuid) -> Option<Incident> {
        let inner = self.inner.read().await;
        inner
            .incidents
            .values()
            .find(|i| i.service_id == service_id && i.status.blocks_new_incident())
            .cloned()
    }

    /// Append a timeline event.
    pub async fn append_event(&self, event: IncidentEvent) -> Result<(), ResponderError> {
        let mut inner = self.inner.write().await;
        if !inner.incidents.contains_key(&event.incident_id) {
            return Err(ResponderError::NotFound(event.incident_id));
        }
        inner.events.entry(event.incident_id).or_default().push(event);
        Ok(())
    }

    /// Timeline for an incident, in append order.
    pub async fn events_for(&self, id: Uuid) -> Vec<IncidentEvent> {
        self.inner
            .read()
            .await
            .events
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    /// Most recent event of a kind for an incident.
    pub async fn last_event_of_kind(&self, id: Uuid, kind: EventKind) -> Option<IncidentEvent> {
        let inner = self.inner.read().await;
        inner
            .events
            .get(&id)?
            .iter()
            .rev()
            .find(|e| e.kind == kind)
            .cloned()
    }

    /// Apply a lifecycle transition and append the matching status-change
    /// event in one atomic update.
    pub async fn transition(
        &self,
        id: Uuid,
        to: IncidentStatus,
        actor: Option<&str>,
        message: String,
    ) -> Result<Incident, ResponderError> {
        let mut inner = self.inner.write().await;
        let incident = inner
            .incidents
            .get_mut(&id)
            .ok_or(ResponderError::NotFound(id))?;

        incident.apply_transition(to, actor, Utc::now())?;
        let updated = incident.clone();

        let mut event = IncidentEvent::new(id, EventKind::StatusChange, message);
        if let Some(actor) = actor {
            event = event.by(actor);
        }
        inner.events.entry(id).or_default().push(event);

        Ok(updated)
    }

    /// Acknowledge an incident.
    pub async fn acknowledge(&self, id: Uuid, actor: &str) -> Result<Incident, ResponderError> {
        self.transition(
            id,
            IncidentStatus::Acknowledged,
            Some(actor),
            format!("Incident acknowledged by {actor}"),
        )
        .await
    }

    /// Mark an incident mitigated.
    pub async fn mitigate(&self, id: Uuid, actor: &str) -> Result<Incident, ResponderError> {
        self.transition(
            id,
            IncidentStatus::Mitigated,
            Some(actor),
            format!("Incident mitigated by {actor}"),
        )
        .await
    }

    /// Resolve an incident. A resolution note is required.
    pub async fn resolve(
        &self,
        id: Uuid,
        actor: &str,
        note: &str,
    ) -> Result<Incident, ResponderError> {
        if note.trim().is_empty() {
            return Err(ResponderError::InvalidRequest(
                "resolution note is required".to_string(),
            ));
        }
        self.transition(
            id,
            IncidentStatus::Resolved,
            Some(actor),
            format!("Incident resolved by {actor}: {note}"),
        )
        .await
    }

    /// Assign the lead if none is set yet (manual creation path).
    pub async fn assign_lead(&self, id: Uuid, actor: &str) -> Result<(), ResponderError> {
        let mut inner = self.inner.write().await;
        let incident = inner
            .incidents
            .get_mut(&id)
            .ok_or(ResponderError::NotFound(id))?;
        if incident.lead.is_none() {
            incident.lead = Some(actor.to_string());
        }
        Ok(())
    }

    /// Set the document link if it is still unset.
    ///
    /// Returns `true` when this call set the link; `false` when a previous
    /// sub-step already did (the link is write-once).
    pub async fn set_document_link(
        &self,
        id: Uuid,
        link: &str,
    ) -> Result<bool, ResponderError> {
        let mut inner = self.inner.write().await;
        let incident = inner
            .incidents
            .get_mut(&id)
            .ok_or(ResponderError::NotFound(id))?;
        if incident.document_link.is_some() {
            return Ok(false);
        }
        incident.document_link = Some(link.to_string());
        Ok(true)
    }

    /// Set the war-room link and channel id if still unset (write-once).
    pub async fn set_war_room(
        &self,
        id: Uuid,
        link: &str,
        room_id: &str,
    ) -> Result<bool, ResponderError> {
        let mut inner = self.inner.write().await;
        let incident = inner
            .incidents
            .get_mut(&id)
            .ok_or(ResponderError::NotFound(id))?;
        if incident.war_room_link.is_some() || incident.war_room_id.is_some() {
            return Ok(false);
        }
        incident.war_room_link = Some(link.to_string());
        incident.war_room_id = Some(room_id.to_string());
        Ok(true)
    }

    /// Claim the escalation row for (incident, step).
    ///
    /// The claim happens before any dispatch so overlapping sweeps cannot
    /// both fire the same step; the loser gets `DuplicateEscalation` and
    /// must skip silently.
    pub async fn claim_escalation(
        &self,
        incident_id: Uuid,
        policy_id: Uuid,
        step_order: u32,
    ) -> Result<(), ResponderError> {
        let mut inner = self.inner.write().await;
        if !inner.incidents.contains_key(&incident_id) {
            return Err(ResponderError::NotFound(incident_id));
        }
        if !inner.fired.insert((incident_id, step_order)) {
            return Err(ResponderError::DuplicateEscalation {
                incident: incident_id,
                step: step_order,
            });
        }
        inner
            .escalations
            .entry(incident_id)
            .or_default()
            .push(IncidentEscalation {
                incident_id,
                policy_id,
                step_order,
                fired_at: Utc::now(),
                outcome: EscalationOutcome::Pending,
                detail: String::new(),
            });
        Ok(())
    }

    /// Record the outcome of a claimed escalation row.
    pub async fn complete_escalation(
        &self,
        incident_id: Uuid,
        step_order: u32,
        outcome: EscalationOutcome,
        detail: impl Into<String>,
    ) {
        let mut inner = self.inner.write().await;
        if let Some(rows) = inner.escalations.get_mut(&incident_id) {
            if let Some(row) = rows.iter_mut().find(|r| r.step_order == step_order) {
                row.outcome = outcome;
                row.detail = detail.into();
            }
        }
    }

    /// Escalation rows for an incident, in firing order.
    pub async fn escalations_for(&self, id: Uuid) -> Vec<IncidentEscalation> {
        self.inner
            .read()
            .await
            .escalations
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether a step has already fired for an incident.
    pub async fn escalation_fired(&self, incident_id: Uuid, step_order: u32) -> bool {
        self.inner
            .read()
            .await
            .fired
            .contains(&(incident_id, step_order))
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::Severity;

    fn incident(service_id: Uuid) -> Incident {
        Incident::new("Redis down", "", service_id, Severity::Critical, None)
    }

    #[tokio::test]
    async fn test_find_open_by_service_ignores_closed() {
        let store = IncidentStore::new();
        let service_id = Uuid::new_v4();

        let first = store.insert(incident(service_id)).await;
        assert_eq!(
            store.find_open_by_service(service_id).await.unwrap().id,
            first.id
        );

        store.resolve(first.id, "alice", "fixed").await.unwrap();
        assert!(store.find_open_by_service(service_id).await.is_none());

        // A mitigated incident does not block new ones either
        let second = store.insert(incident(service_id)).await;
        store.acknowledge(second.id, "alice").await.unwrap();
        store.mitigate(second.id, "alice").await.unwrap();
        assert!(store.find_open_by_service(service_id).await.is_none());
    }

    #[tokio::test]
    async fn test_transition_appends_status_event() {
        let store = IncidentStore::new();
        let inc = store.insert(incident(Uuid::new_v4())).await;

        store.acknowledge(inc.id, "alice").await.unwrap();
        let events = store.events_for(inc.id).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::StatusChange);
        assert!(events[0].message.contains("acknowledged by alice"));
        assert_eq!(events[0].actor.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_invalid_transition_leaves_incident_unchanged() {
        let store = IncidentStore::new();
        let inc = store.insert(incident(Uuid::new_v4())).await;

        let err = store.mitigate(inc.id, "alice").await.unwrap_err();
        assert!(matches!(err, ResponderError::InvalidTransition { .. }));

        let current = store.get(inc.id).await.unwrap();
        assert_eq!(current.status, IncidentStatus::Triggered);
        assert!(store.events_for(inc.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_requires_note() {
        let store = IncidentStore::new();
        let inc = store.insert(incident(Uuid::new_v4())).await;

        let err = store.resolve(inc.id, "alice", "  ").await.unwrap_err();
        assert!(matches!(err, ResponderError::InvalidRequest(_)));

        store.resolve(inc.id, "alice", "rebooted").await.unwrap();
        let current = store.get(inc.id).await.unwrap();
        assert_eq!(current.status, IncidentStatus::Resolved);
    }

    #[tokio::test]
    async fn test_links_are_write_once() {
        let store = IncidentStore::new();
        let inc = store.insert(incident(Uuid::new_v4())).await;

        assert!(store.set_document_link(inc.id, "https://docs/1").await.unwrap());
        assert!(!store.set_document_link(inc.id, "https://docs/2").await.unwrap());
        assert_eq!(
            store.get(inc.id).await.unwrap().document_link.as_deref(),
            Some("https://docs/1")
        );

        assert!(store.set_war_room(inc.id, "https://chat/1", "C1").await.unwrap());
        assert!(!store.set_war_room(inc.id, "https://chat/2", "C2").await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_escalation_exactly_once() {
        let store = IncidentStore::new();
        let inc = store.insert(incident(Uuid::new_v4())).await;
        let policy_id = Uuid::new_v4();

        store.claim_escalation(inc.id, policy_id, 1).await.unwrap();
        let err = store.claim_escalation(inc.id, policy_id, 1).await.unwrap_err();
        assert!(err.is_duplicate_escalation());

        // A different step is independent
        store.claim_escalation(inc.id, policy_id, 2).await.unwrap();
        assert_eq!(store.escalations_for(inc.id).await.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_only_one_wins() {
        let store = Arc::new(IncidentStore::new());
        let inc = store.insert(incident(Uuid::new_v4())).await;
        let policy_id = Uuid::new_v4();

        let mut handles = vec![];
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.claim_escalation(inc.id, policy_id, 7).await.is_ok()
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(store.escalations_for(inc.id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_complete_escalation_updates_row() {
        let store = IncidentStore::new();
        let inc = store.insert(incident(Uuid::new_v4())).await;
        let policy_id = Uuid::new_v4();

        store.claim_escalation(inc.id, policy_id, 1).await.unwrap();
        store
            .complete_escalation(inc.id, 1, EscalationOutcome::Notified, "notified alice")
            .await;

        let rows = store.escalations_for(inc.id).await;
        assert_eq!(rows[0].outcome, EscalationOutcome::Notified);
        assert_eq!(rows[0].detail, "notified alice");
    }
}
