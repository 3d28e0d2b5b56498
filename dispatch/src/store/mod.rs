//! Storage contract for the dispatch engine.
//!
//! The engine never talks to a database directly: every read-modify-write
//! goes through [`Store::with_txn`], which runs a closure against a
//! [`StoreTxn`] view with all-or-nothing semantics. Reads that inform a
//! decision must be re-validated inside the transaction that commits it.

pub mod memory;
pub mod types;

use chrono::{DateTime, Utc};

pub use memory::MemoryStore;
pub use types::{
    Agency, AgencyId, AgencyKind, Incident, IncidentId, IncidentStatus, Responder, ResponderId,
    ResponderStatus, UserId,
};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("incident not found: {0}")]
    IncidentNotFound(IncidentId),

    #[error("responder not found: {0}")]
    ResponderNotFound(ResponderId),

    #[error("agency not found: {0}")]
    AgencyNotFound(AgencyId),

    /// Retryable transaction-layer failure (write skew, lost race).
    #[error("serialization conflict: {0}")]
    Serialization(String),

    #[error("lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Transactional view over the dispatch records.
///
/// Mutations become visible to other transactions only if the enclosing
/// closure returns `Ok`; on `Err` every write in the transaction is
/// discarded.
pub trait StoreTxn {
    fn incident(&self, id: &str) -> StoreResult<Incident>;
    fn put_incident(&mut self, incident: Incident);

    fn responder(&self, id: &str) -> StoreResult<Responder>;
    fn put_responder(&mut self, responder: Responder);

    fn agency(&self, id: &str) -> StoreResult<Agency>;
    fn put_agency(&mut self, agency: Agency);

    /// Agencies with the active flag set.
    fn active_agencies(&self) -> Vec<Agency>;

    /// Responders currently in status `Available`.
    fn available_responders(&self) -> Vec<Responder>;

    /// Incidents whose status is one of `statuses`.
    fn incidents_in_status(&self, statuses: &[IncidentStatus]) -> Vec<Incident>;

    /// Non-offline responders whose last heartbeat is older than `cutoff`.
    fn responders_silent_since(&self, cutoff: DateTime<Utc>) -> Vec<Responder>;
}

/// The storage contract the engine is written against.
///
/// Implementations must make `with_txn` a single isolated unit: no other
/// transaction may observe an intermediate state, and two racing
/// transactions touching the same record must serialize (or fail one with
/// [`StoreError::Serialization`], which the engine retries a bounded number
/// of times).
pub trait Store: Send + Sync {
    /// Run `f` inside an atomic read-modify-write transaction.
    fn with_txn<R, E: From<StoreError>>(
        &self,
        f: &mut dyn FnMut(&mut dyn StoreTxn) -> Result<R, E>,
    ) -> Result<R, E>;

    /// Run `f` against a read-only snapshot. Advisory only: anything decided
    /// here must be re-checked inside the committing transaction.
    fn with_read<R, E: From<StoreError>>(
        &self,
        f: &mut dyn FnMut(&dyn StoreTxn) -> Result<R, E>,
    ) -> Result<R, E>;
}
