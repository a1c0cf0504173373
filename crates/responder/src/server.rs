//! HTTP API: alert ingestion, manual incident management, and read access
//! for the UI layer.
//!
//! Ingestion handlers do store work only and return immediately; the
//! orchestration coordinator is spawned off the request path, and
//! escalation/orchestration failures surface only as timeline entries,
//! never as ingestion-time errors.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use anyhow::Result;

use crate::dedup::{AlertPayload, DedupEngine};
use crate::directory::Directory;
use crate::error::ResponderError;
use crate::incident::{Incident, IncidentStatus, Severity};
use crate::orchestrate::Coordinator;
use crate::store::{IncidentEscalation, IncidentStore};

/// Server state shared across handlers.
pub struct AppState {
    pub store: Arc<IncidentStore>,
    pub directory: Arc<dyn Directory>,
    pub dedup: DedupEngine,
    pub coordinator: Arc<Coordinator>,
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/alerts/alertmanager", post(alertmanager_handler))
        .route(
            "/api/incidents",
            post(create_incident_handler).get(list_incidents_handler),
        )
        .route("/api/incidents/{id}", get(get_incident_handler))
        .route("/api/incidents/{id}/acknowledge", post(acknowledge_handler))
        .route("/api/incidents/{id}/mitigate", post(mitigate_handler))
        .route("/api/incidents/{id}/resolve", post(resolve_handler))
        .route("/api/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
///
/// # Errors
///
/// Returns an error if the server fails to bind to the address.
pub async fn run_server(state: Arc<AppState>, addr: &str) -> Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Responder API listening on {addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Alertmanager ingestion
// ============================================================================

/// Alertmanager webhook payload.
///
/// Reference: <https://prometheus.io/docs/alerting/latest/configuration/#webhook_config>
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerPayload {
    /// Status: "firing" or "resolved"
    #[serde(default)]
    pub status: String,
    /// Receiver that matched this alert
    #[serde(default)]
    pub receiver: String,
    /// List of alerts in this notification
    pub alerts: Vec<AlertmanagerAlert>,
}

/// Individual alert from Alertmanager.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerAlert {
    /// Status: "firing" or "resolved"
    pub status: String,
    /// Alert labels
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Alert annotations
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    /// When the alert started firing
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
}

impl AlertmanagerAlert {
    /// Get the alert name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.labels.get("alertname").map_or("unknown", String::as_str)
    }

    /// Check if this is a firing alert.
    #[must_use]
    pub fn is_firing(&self) -> bool {
        self.status == "firing"
    }

    /// Normalize into the engine's alert payload.
    #[must_use]
    pub fn to_alert_payload(&self) -> AlertPayload {
        let service = self
            .labels
            .get("service")
            .cloned()
            .unwrap_or_else(|| self.name().to_string());

        let severity = self
            .labels
            .get("severity")
            .map_or(Severity::Medium, |s| Severity::from_alert_label(s));

        let title = self
            .annotations
            .get("summary")
            .cloned()
            .unwrap_or_else(|| self.name().to_string());

        let description = self
            .annotations
            .get("description")
            .cloned()
            .unwrap_or_default();

        let scopes = self
            .labels
            .get("scopes")
            .map(|s| s.split(',').map(|p| p.trim().to_string()).collect())
            .unwrap_or_default();

        AlertPayload {
            service,
            severity,
            title,
            description,
            detected_at: self.starts_at,
            scopes,
            source: "alertmanager".to_string(),
        }
    }
}

/// Response for the ingestion endpoint.
#[derive(Debug, Serialize)]
struct IngestResponse {
    status: &'static str,
    alerts_processed: usize,
    incidents: Vec<AdmissionView>,
    errors: Vec<String>,
}

#[derive(Debug, Serialize)]
struct AdmissionView {
    incident_id: Uuid,
    short_id: String,
    is_new: bool,
}

/// Alertmanager webhook handler.
///
/// Each alert is processed independently; a malformed payload is the only
/// way for ingestion to fail outright.
async fn alertmanager_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AlertmanagerPayload>,
) -> impl IntoResponse {
    let alert_count = payload.alerts.len();
    info!(
        "Received alertmanager webhook: {} alerts, status={}",
        alert_count, payload.status
    );

    let mut incidents = Vec::new();
    let mut errors = Vec::new();

    for alert in payload.alerts {
        if !alert.is_firing() {
            // Resolved alerts do not auto-resolve incidents; resolution
            // stays a human action.
            continue;
        }

        let alert_name = alert.name().to_string();
        match state.dedup.admit_alert(alert.to_alert_payload()).await {
            Ok(admission) => {
                if admission.is_new {
                    state.coordinator.spawn(admission.incident.id);
                }
                incidents.push(AdmissionView {
                    incident_id: admission.incident.id,
                    short_id: admission.incident.short_id(),
                    is_new: admission.is_new,
                });
            }
            Err(e) => {
                error!("Failed to admit alert {}: {e}", alert_name);
                errors.push(format!("{alert_name}: {e}"));
            }
        }
    }

    let status = if errors.is_empty() { "ok" } else { "partial" };

    (
        StatusCode::OK,
        Json(IngestResponse {
            status,
            alerts_processed: alert_count,
            incidents,
            errors,
        }),
    )
}

// ============================================================================
// Incident management
// ============================================================================

/// Manual incident creation request.
#[derive(Debug, Deserialize)]
pub struct CreateIncidentRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Service name
    pub service: String,
    pub severity: Severity,
    #[serde(default)]
    pub detected_at: Option<DateTime<Utc>>,
    /// Impact scope names
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Creating user; becomes the lead
    #[serde(default)]
    pub actor: Option<String>,
}

/// Manual incident creation.
///
/// Goes through the dedup engine like any alert, so a manual report during
/// an alert storm attaches to the open incident instead of duplicating it.
async fn create_incident_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateIncidentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.title.trim().is_empty() {
        return Err(ResponderError::InvalidRequest("title is required".to_string()).into());
    }

    let payload = AlertPayload {
        service: request.service,
        severity: request.severity,
        title: request.title,
        description: request.description,
        detected_at: request.detected_at,
        scopes: request.scopes,
        source: "manual".to_string(),
    };

    let admission = state.dedup.admit_alert(payload).await?;

    if admission.is_new {
        if let Some(actor) = &request.actor {
            state.store.assign_lead(admission.incident.id, actor).await?;
        }
        state.coordinator.spawn(admission.incident.id);
    }

    let incident = state
        .store
        .get_required(admission.incident.id)
        .await?;

    let code = if admission.is_new {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((code, Json(IncidentView::from_incident(&incident, state.directory.as_ref()))))
}

#[derive(Debug, Deserialize)]
struct ActorRequest {
    actor: String,
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    actor: String,
    note: String,
}

async fn acknowledge_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ActorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let incident = state.store.acknowledge(id, &request.actor).await?;
    Ok(Json(IncidentView::from_incident(&incident, state.directory.as_ref())))
}

async fn mitigate_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ActorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let incident = state.store.mitigate(id, &request.actor).await?;
    Ok(Json(IncidentView::from_incident(&incident, state.directory.as_ref())))
}

async fn resolve_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ResolveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let incident = state
        .store
        .resolve(id, &request.actor, &request.note)
        .await?;

    // Leave time for post-incident discussion, then archive the channel
    if incident.war_room_id.is_some() {
        state.coordinator.schedule_war_room_archive(incident.id);
    }

    Ok(Json(IncidentView::from_incident(&incident, state.directory.as_ref())))
}

// ============================================================================
// Read access
// ============================================================================

/// Incident representation for the API.
#[derive(Debug, Serialize)]
pub struct IncidentView {
    pub id: Uuid,
    pub short_id: String,
    pub title: String,
    pub description: String,
    pub service: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub lead: Option<String>,
    pub document_link: Option<String>,
    pub war_room_link: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Derived KPIs, in seconds
    pub mttd_seconds: i64,
    pub mtta_seconds: Option<i64>,
    pub mttr_seconds: Option<i64>,
}

impl IncidentView {
    fn from_incident(incident: &Incident, directory: &dyn Directory) -> Self {
        let service = directory
            .service(incident.service_id)
            .map_or_else(|| "unknown".to_string(), |s| s.name);

        Self {
            id: incident.id,
            short_id: incident.short_id(),
            title: incident.title.clone(),
            description: incident.description.clone(),
            service,
            severity: incident.severity,
            status: incident.status,
            lead: incident.lead.clone(),
            document_link: incident.document_link.clone(),
            war_room_link: incident.war_room_link.clone(),
            detected_at: incident.detected_at,
            created_at: incident.created_at,
            acknowledged_at: incident.acknowledged_at,
            resolved_at: incident.resolved_at,
            mttd_seconds: incident.mttd().num_seconds(),
            mtta_seconds: incident.mtta().map(|d| d.num_seconds()),
            mttr_seconds: incident.mttr().map(|d| d.num_seconds()),
        }
    }
}

/// Detail view: incident plus timeline and escalation rows.
#[derive(Debug, Serialize)]
struct IncidentDetailView {
    #[serde(flatten)]
    incident: IncidentView,
    events: Vec<EventView>,
    escalations: Vec<IncidentEscalation>,
}

#[derive(Debug, Serialize)]
struct EventView {
    kind: crate::incident::EventKind,
    message: String,
    actor: Option<String>,
    timestamp: DateTime<Utc>,
}

async fn list_incidents_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let incidents = state.store.list().await;
    let views: Vec<IncidentView> = incidents
        .iter()
        .map(|i| IncidentView::from_incident(i, state.directory.as_ref()))
        .collect();
    Json(views)
}

async fn get_incident_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let incident = state.store.get_required(id).await?;
    let events = state
        .store
        .events_for(id)
        .await
        .into_iter()
        .map(|e| EventView {
            kind: e.kind,
            message: e.message,
            actor: e.actor,
            timestamp: e.timestamp,
        })
        .collect();
    let escalations = state.store.escalations_for(id).await;

    Ok(Json(IncidentDetailView {
        incident: IncidentView::from_incident(&incident, state.directory.as_ref()),
        events,
        escalations,
    }))
}

// ============================================================================
// Health and status
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    open_incidents: usize,
    total_incidents: usize,
}

async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let open = state.store.list_open().await.len();
    let total = state.store.list().await.len();

    Json(StatusResponse {
        status: "ok",
        open_incidents: open,
        total_incidents: total,
    })
}

// ============================================================================
// Error mapping
// ============================================================================

/// Wrapper mapping engine errors onto HTTP responses.
struct ApiError(ResponderError);

impl From<ResponderError> for ApiError {
    fn from(err: ResponderError) -> Self {
        Self(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            ResponderError::NotFound(_) => StatusCode::NOT_FOUND,
            ResponderError::InvalidTransition { .. } => StatusCode::CONFLICT,
            ResponderError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ResponderError::UnresolvableReference(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ResponderError::ExternalCollaborator(_) | ResponderError::DuplicateEscalation { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}
