//! Autonomous assignment for maximum-severity incidents.
//!
//! Runs once per incident, immediately after classification. Every gate
//! that fails defers silently to manual dispatch; the ranked recommendation
//! stays visible to operators either way.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::assignment::AssignmentTransactor;
use crate::audit::Actor;
use crate::error::{DispatchError, DispatchResult};
use crate::ranking::{CandidateRanker, DispatchCandidate};
use crate::store::{Incident, IncidentStatus, Store, StoreTxn};

/// Gates an incident must clear before the engine assigns without a human.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoPilotConfig {
    /// Minimum classified severity (0–5 scale).
    pub min_severity: u8,
    /// Maximum estimated distance to the top candidate, in km.
    pub max_distance_km: f64,
    /// Minimum total score of the top candidate.
    pub min_score: f64,
}

impl Default for AutoPilotConfig {
    fn default() -> Self {
        Self {
            min_severity: 5,
            max_distance_km: 2.0,
            min_score: 0.75,
        }
    }
}

/// Why the auto-pilot deferred to manual dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The incident is no longer waiting for dispatch.
    NotPending { status: IncidentStatus },
    /// Severity is unclassified or below the gate.
    BelowSeverity { severity: Option<u8> },
    /// Ranking produced no candidates at all.
    NoCandidates,
    /// The top candidate has no concrete unit.
    NoResponder,
    /// The top candidate's estimated distance misses the gate.
    TooFar { distance_km: Option<f64> },
    /// The top candidate's score misses the gate.
    ScoreBelowThreshold { score: f64 },
    /// The responder was claimed between ranking and commit.
    ResponderUnavailable,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotPending { status } => write!(f, "incident not pending ({status:?})"),
            Self::BelowSeverity { severity } => write!(f, "severity {severity:?} below gate"),
            Self::NoCandidates => write!(f, "no candidates"),
            Self::NoResponder => write!(f, "top candidate has no unit"),
            Self::TooFar { distance_km } => write!(f, "top candidate too far ({distance_km:?} km)"),
            Self::ScoreBelowThreshold { score } => write!(f, "score {score:.2} below gate"),
            Self::ResponderUnavailable => write!(f, "responder no longer available"),
        }
    }
}

/// Outcome of one auto-pilot evaluation. Deferral is a value, not an error.
#[derive(Debug, Clone)]
pub enum AutoPilotOutcome {
    /// The assignment was committed without human input.
    Assigned {
        incident: Incident,
        candidate: DispatchCandidate,
    },
    /// The auto-pilot deferred to manual dispatch.
    NotTriggered { reason: SkipReason },
}

impl AutoPilotOutcome {
    pub fn is_assigned(&self) -> bool {
        matches!(self, Self::Assigned { .. })
    }

    fn skipped(reason: SkipReason) -> Self {
        Self::NotTriggered { reason }
    }
}

/// Evaluates newly-classified incidents for autonomous assignment.
pub struct AutoPilot<S: Store> {
    store: Arc<S>,
    ranker: CandidateRanker<S>,
    transactor: Arc<AssignmentTransactor<S>>,
    config: AutoPilotConfig,
}

impl<S: Store> AutoPilot<S> {
    pub fn new(
        store: Arc<S>,
        ranker: CandidateRanker<S>,
        transactor: Arc<AssignmentTransactor<S>>,
        config: AutoPilotConfig,
    ) -> Self {
        Self {
            store,
            ranker,
            transactor,
            config,
        }
    }

    /// Evaluate `incident_id` and commit an assignment if every gate passes.
    ///
    /// `NotFound` is the only error surfaced; every other obstacle (unmet
    /// gates, a responder lost to a race) is a `NotTriggered` outcome.
    pub async fn try_auto_assign(&self, incident_id: &str) -> DispatchResult<AutoPilotOutcome> {
        let incident = self
            .store
            .with_read(&mut |txn: &dyn StoreTxn| -> DispatchResult<Incident> {
                Ok(txn.incident(incident_id)?)
            })?;

        if incident.status != IncidentStatus::Received {
            return Ok(AutoPilotOutcome::skipped(SkipReason::NotPending {
                status: incident.status,
            }));
        }
        match incident.severity {
            Some(severity) if severity >= self.config.min_severity => {}
            severity => {
                return Ok(AutoPilotOutcome::skipped(SkipReason::BelowSeverity {
                    severity,
                }))
            }
        }

        let candidates = self.ranker.rank(incident_id).await?;
        let Some(top) = candidates.into_iter().next() else {
            return Ok(AutoPilotOutcome::skipped(SkipReason::NoCandidates));
        };
        let Some(responder_id) = top.responder_id.clone() else {
            return Ok(AutoPilotOutcome::skipped(SkipReason::NoResponder));
        };
        match top.distance_km {
            Some(distance) if distance <= self.config.max_distance_km => {}
            distance_km => {
                return Ok(AutoPilotOutcome::skipped(SkipReason::TooFar { distance_km }))
            }
        }
        if top.total_score < self.config.min_score {
            return Ok(AutoPilotOutcome::skipped(SkipReason::ScoreBelowThreshold {
                score: top.total_score,
            }));
        }

        // Ranking is advisory; the claim transaction re-verifies the
        // responder and may lose the race. Losing is a deferral, not an
        // error.
        match self.transactor.assign(
            incident_id,
            &top.agency_id,
            Some(&responder_id),
            Actor::AutoPilot,
        ) {
            Ok(incident) => {
                info!(
                    incident_id,
                    responder_id,
                    score = top.total_score,
                    "auto-pilot committed assignment"
                );
                Ok(AutoPilotOutcome::Assigned {
                    incident,
                    candidate: top,
                })
            }
            Err(DispatchError::Conflict(_)) => {
                info!(incident_id, responder_id, "auto-pilot lost the claim race");
                Ok(AutoPilotOutcome::skipped(SkipReason::ResponderUnavailable))
            }
            Err(other) => Err(other),
        }
    }
}
