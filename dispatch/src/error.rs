//! Error taxonomy for the dispatch engine.
//!
//! Callers (an HTTP layer, the monitor, tests) match on these kinds to map
//! them to status codes or retry decisions.

use crate::store::StoreError;

/// Errors surfaced by ranking and the assignment operations.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Incident, responder, or agency does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource is not in the state the operation requires
    /// (responder no longer available, incident already acknowledged).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Actor/responder mismatch against the incident's current assignment.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// An external collaborator failed. Internal only: callers of the public
    /// API see degraded values instead of this kind.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Storage-layer failure that is not a missing-row case.
    #[error("storage error: {0}")]
    Storage(StoreError),
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::IncidentNotFound(id) => Self::NotFound(format!("incident {id}")),
            StoreError::ResponderNotFound(id) => Self::NotFound(format!("responder {id}")),
            StoreError::AgencyNotFound(id) => Self::NotFound(format!("agency {id}")),
            other => Self::Storage(other),
        }
    }
}

impl DispatchError {
    /// Whether this error came from a retryable transaction-layer failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(StoreError::Serialization(_)))
    }
}
