//! Incident response orchestration engine.
//!
//! Core pipeline: alerts enter the [`dedup::DedupEngine`], which either
//! attaches them to the open incident for the same service or creates a
//! new one; new incidents get a one-shot [`orchestrate::Coordinator`] run
//! (document, war room, broadcast) off the ingestion path; the
//! [`escalation::EscalationEngine`] sweeps all open incidents on a fixed
//! cadence and fires due policy steps until a human acknowledges.
//!
//! Correctness guarantees live in [`store::IncidentStore`]: per-service
//! serialization of admit-or-create, forward-only lifecycle transitions
//! with exactly-once timestamps, and an (incident, step) claim set that
//! makes escalation firing exactly-once under overlapping sweeps.

pub mod collaborators;
pub mod config;
pub mod dedup;
pub mod directory;
pub mod error;
pub mod escalation;
pub mod incident;
pub mod orchestrate;
pub mod router;
pub mod server;
pub mod store;

pub use config::ResponderConfig;
pub use dedup::{Admission, AlertPayload, DedupEngine};
pub use error::ResponderError;
pub use escalation::EscalationEngine;
pub use incident::{EventKind, Incident, IncidentEvent, IncidentStatus, Severity};
pub use orchestrate::Coordinator;
pub use router::NotificationRouter;
pub use store::{EscalationOutcome, IncidentEscalation, IncidentStore};
