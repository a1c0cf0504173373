//! Error taxonomy for the responder engine.

use thiserror::Error;
use uuid::Uuid;

use crate::incident::IncidentStatus;

/// Errors produced by the incident engine.
///
/// Lifecycle and identity errors are returned to callers synchronously;
/// fan-out branch failures (one recipient, one coordinator sub-step) are
/// converted to timeline events at the call site and never propagate.
#[derive(Debug, Error)]
pub enum ResponderError {
    /// Illegal lifecycle move; the incident is left unchanged.
    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: IncidentStatus,
        to: IncidentStatus,
    },

    /// Unknown service/team/user reference. Ingestion degrades to the
    /// triage service instead of surfacing this; lookup paths skip.
    #[error("unresolvable reference: {0}")]
    UnresolvableReference(String),

    /// External collaborator call failed or timed out. Recorded as a
    /// failure event, never retried by this engine.
    #[error("external collaborator failure: {0}")]
    ExternalCollaborator(String),

    /// Attempt to fire an already-fired escalation step. Silently ignored
    /// at call sites; this is the exactly-once guard working as intended.
    #[error("escalation step {step} already fired for incident {incident}")]
    DuplicateEscalation { incident: Uuid, step: u32 },

    /// Incident does not exist.
    #[error("incident not found: {0}")]
    NotFound(Uuid),

    /// Request-level validation failure (missing required field).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ResponderError {
    /// Whether this error is the benign duplicate-escalation guard.
    #[must_use]
    pub const fn is_duplicate_escalation(&self) -> bool {
        matches!(self, Self::DuplicateEscalation { .. })
    }
}
