//! Dispatch & SLA engine for emergency-response coordination.
//!
//! The engine matches reported incidents to the best available responder,
//! holds an exclusive claim on that responder for the duration of the
//! assignment, and recovers automatically when a response stalls:
//!
//! - [`ranking::CandidateRanker`] scores eligible (agency, responder) pairs
//!   for an incident with deterministic tie-breaks.
//! - [`assignment::AssignmentTransactor`] performs the atomic
//!   assign/acknowledge/decline transitions.
//! - [`autopilot::AutoPilot`] commits assignments for maximum-severity
//!   incidents without human input, behind strict gates.
//! - [`sla::SlaMonitor`] repairs stalled intake, unacknowledged
//!   assignments, and silent responders on a fixed cadence.
//!
//! Persistence is abstracted behind [`store::Store`]; [`store::MemoryStore`]
//! is the in-crate implementation. Notifications go through
//! [`events::Notifier`], audit and activity records through
//! [`audit::AuditLog`] and [`audit::ActivityLog`].

pub mod assignment;
pub mod audit;
pub mod autopilot;
pub mod config;
pub mod error;
pub mod events;
pub mod geo;
pub mod ranking;
pub mod sla;
pub mod store;
pub mod travel;

pub use assignment::{AssignmentTransactor, ReleasePolicy, ReleaseReason};
pub use audit::{ActivityKind, ActivityLog, ActivityRecord, Actor, AuditEntry, AuditLog};
pub use autopilot::{AutoPilot, AutoPilotConfig, AutoPilotOutcome, SkipReason};
pub use config::{ConfigError, DispatchConfig, TravelConfig};
pub use error::{DispatchError, DispatchResult};
pub use events::{DispatchEvent, Notification, NotificationScope, Notifier, SharedNotifier};
pub use geo::GeoPoint;
pub use ranking::{CandidateRanker, DispatchCandidate, RankingConfig};
pub use sla::{run_scheduler, SlaConfig, SlaMonitor, SlaReport};
pub use store::{
    Agency, AgencyId, AgencyKind, Incident, IncidentId, IncidentStatus, MemoryStore, Responder,
    ResponderId, ResponderStatus, Store, StoreError, StoreResult, StoreTxn, UserId,
};
pub use travel::{GeometricEstimator, OsrmEstimator, TravelEstimate, TravelEstimator};
