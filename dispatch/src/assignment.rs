//! Atomic assignment transitions: assign, acknowledge, decline.
//!
//! All three operations run as single all-or-nothing transactions against
//! the storage contract. The claim and release primitives here are the only
//! code paths that move a responder in or out of a committed state; the
//! auto-pilot and the SLA monitor reuse them with their own actor metadata
//! rather than duplicating check-then-set logic.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::{ActivityKind, ActivityLog, Actor, AuditLog};
use crate::error::{DispatchError, DispatchResult};
use crate::events::{DispatchEvent, NotificationScope, SharedNotifier};
use crate::store::{Incident, IncidentStatus, Responder, ResponderStatus, Store, StoreTxn};

/// Bounded retries for retryable transaction-layer failures.
const TXN_MAX_ATTEMPTS: u32 = 3;

/// What happens to the assigned agency id when an assignment is released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleasePolicy {
    /// Keep the agency on the incident so re-dispatch stays agency-scoped.
    #[default]
    RetainAgencyScope,
    /// Clear the agency and return the incident to the open pool.
    ReleaseToPool,
}

/// Why an assignment is being released. Only a human refusal marks the
/// responder as declined for the incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    /// The responder refused the assignment.
    Declined { reason: String },
    /// The responder never acknowledged within the SLA window.
    AckTimeout,
    /// The responder went silent and was marked offline.
    ResponderOffline,
}

impl ReleaseReason {
    pub fn is_refusal(&self) -> bool {
        matches!(self, Self::Declined { .. })
    }

    /// Status the responder is released into.
    fn released_status(&self) -> ResponderStatus {
        match self {
            Self::ResponderOffline => ResponderStatus::Offline,
            _ => ResponderStatus::Available,
        }
    }
}

/// Result of releasing an assignment inside a transaction.
#[derive(Debug, Clone)]
pub(crate) struct ReleaseOutcome {
    pub incident: Incident,
    pub responder: Option<Responder>,
}

/// Run `f` in a transaction, retrying retryable storage failures a bounded
/// number of times. Exhaustion surfaces as `Conflict`.
pub(crate) fn run_txn<S: Store, R>(
    store: &S,
    mut f: impl FnMut(&mut dyn StoreTxn) -> Result<R, DispatchError>,
) -> DispatchResult<R> {
    let mut attempts = 0;
    loop {
        match store.with_txn(&mut f) {
            Err(err) if err.is_retryable() => {
                attempts += 1;
                if attempts >= TXN_MAX_ATTEMPTS {
                    return Err(DispatchError::Conflict(format!(
                        "transaction retries exhausted after {attempts} attempts"
                    )));
                }
                warn!(attempts, "retrying serialization conflict");
            }
            other => return other,
        }
    }
}

/// Claim a responder (or an agency alone) for an incident.
///
/// Availability is checked here, inside the committing transaction, never
/// trusted from an earlier read. Exactly one of any set of racing claims
/// can observe `Available` and win.
pub(crate) fn commit_claim(
    txn: &mut dyn StoreTxn,
    incident_id: &str,
    agency_id: &str,
    responder_id: Option<&str>,
) -> Result<Incident, DispatchError> {
    let mut incident = txn.incident(incident_id)?;
    if !incident.status.is_dispatchable() {
        return Err(DispatchError::Conflict(format!(
            "incident {incident_id} is not dispatchable (status {:?})",
            incident.status
        )));
    }

    let agency = txn.agency(agency_id)?;
    if !agency.active {
        return Err(DispatchError::Conflict(format!(
            "agency {agency_id} is not active"
        )));
    }

    if let Some(responder_id) = responder_id {
        let mut responder = txn.responder(responder_id)?;
        if responder.status != ResponderStatus::Available {
            return Err(DispatchError::Conflict(format!(
                "responder {responder_id} is not available (status {:?})",
                responder.status
            )));
        }
        if responder.agency_id != agency_id {
            return Err(DispatchError::Conflict(format!(
                "responder {responder_id} does not belong to agency {agency_id}"
            )));
        }
        responder.status = ResponderStatus::Assigned;
        responder.incident_id = Some(incident.id.clone());
        txn.put_responder(responder);
    }

    incident.status = IncidentStatus::Assigned;
    incident.assigned_agency_id = Some(agency.id);
    incident.assigned_responder_id = responder_id.map(str::to_string);
    incident.dispatched_at = Some(Utc::now());
    incident.acknowledged_at = None;
    txn.put_incident(incident.clone());
    Ok(incident)
}

/// Release an assignment back to a re-dispatchable state.
///
/// Shared by decline, the acknowledgment-timeout repair, and the offline
/// sweep; only `ReleaseReason::Declined` touches the declined set.
pub(crate) fn release_assignment(
    txn: &mut dyn StoreTxn,
    incident_id: &str,
    reason: &ReleaseReason,
    policy: ReleasePolicy,
) -> Result<ReleaseOutcome, DispatchError> {
    let mut incident = txn.incident(incident_id)?;
    if incident.status != IncidentStatus::Assigned {
        return Err(DispatchError::Conflict(format!(
            "incident {incident_id} has no releasable assignment (status {:?})",
            incident.status
        )));
    }

    let responder_id = incident.assigned_responder_id.take();
    incident.status = IncidentStatus::Received;
    incident.dispatched_at = None;
    incident.acknowledged_at = None;
    if policy == ReleasePolicy::ReleaseToPool {
        incident.assigned_agency_id = None;
    }
    if reason.is_refusal() {
        if let Some(id) = &responder_id {
            incident.declined_responders.insert(id.clone());
        }
    }
    txn.put_incident(incident.clone());

    let mut released = None;
    if let Some(id) = &responder_id {
        match txn.responder(id) {
            Ok(mut responder) => {
                responder.status = reason.released_status();
                responder.incident_id = None;
                txn.put_responder(responder.clone());
                released = Some(responder);
            }
            // A dangling responder id must not block repairing the incident.
            Err(err) => warn!(%err, incident_id, "released incident held a missing responder"),
        }
    }

    Ok(ReleaseOutcome {
        incident,
        responder: released,
    })
}

/// The three externally-visible assignment operations.
pub struct AssignmentTransactor<S: Store> {
    store: Arc<S>,
    audit: Arc<AuditLog>,
    activity: Arc<ActivityLog>,
    notifier: SharedNotifier,
    policy: ReleasePolicy,
}

impl<S: Store> AssignmentTransactor<S> {
    pub fn new(
        store: Arc<S>,
        audit: Arc<AuditLog>,
        activity: Arc<ActivityLog>,
        notifier: SharedNotifier,
        policy: ReleasePolicy,
    ) -> Self {
        Self {
            store,
            audit,
            activity,
            notifier,
            policy,
        }
    }

    /// Claim `responder_id` (or the agency alone) for `incident_id`.
    ///
    /// Fails with `Conflict` if another assignment won the race for the
    /// responder or the incident is no longer dispatchable.
    pub fn assign(
        &self,
        incident_id: &str,
        agency_id: &str,
        responder_id: Option<&str>,
        actor: Actor,
    ) -> DispatchResult<Incident> {
        let incident = run_txn(self.store.as_ref(), |txn| {
            commit_claim(txn, incident_id, agency_id, responder_id)
        })?;

        let kind = if actor == Actor::AutoPilot {
            ActivityKind::AutoAssigned
        } else {
            ActivityKind::Assigned
        };
        let unit = responder_id.unwrap_or("no unit");
        self.audit.append(
            actor.clone(),
            "incident.assign",
            incident_id,
            Some(format!("agency {agency_id}, unit {unit}")),
        );
        self.activity.append(
            incident_id,
            actor,
            kind,
            &format!("Dispatched to agency {agency_id} (unit: {unit})"),
        );
        self.notify_incident(&incident);
        info!(incident_id, agency_id, responder_id, "incident assigned");
        Ok(incident)
    }

    /// Record the responder's confirmation of an assignment.
    pub fn acknowledge(
        &self,
        incident_id: &str,
        responder_id: &str,
        actor: Actor,
    ) -> DispatchResult<Incident> {
        let incident = run_txn(self.store.as_ref(), |txn| {
            let mut incident = txn.incident(incident_id)?;
            if incident.assigned_responder_id.as_deref() != Some(responder_id) {
                return Err(DispatchError::Forbidden(format!(
                    "responder {responder_id} is not assigned to incident {incident_id}"
                )));
            }
            if incident.acknowledged_at.is_some() {
                return Err(DispatchError::Conflict(format!(
                    "incident {incident_id} is already acknowledged"
                )));
            }
            incident.acknowledged_at = Some(Utc::now());
            txn.put_incident(incident.clone());
            Ok(incident)
        })?;

        self.activity.append(
            incident_id,
            actor,
            ActivityKind::Acknowledged,
            &format!("Assignment acknowledged by unit {responder_id}"),
        );
        self.notify_incident(&incident);
        info!(incident_id, responder_id, "assignment acknowledged");
        Ok(incident)
    }

    /// Refuse an assignment: re-queue the incident, release the responder,
    /// and remember the refusal so ranking skips this unit from now on.
    pub fn decline(
        &self,
        incident_id: &str,
        responder_id: &str,
        reason: &str,
        actor: Actor,
    ) -> DispatchResult<Incident> {
        let policy = self.policy;
        let outcome = run_txn(self.store.as_ref(), |txn| {
            let incident = txn.incident(incident_id)?;
            if incident.assigned_responder_id.as_deref() != Some(responder_id) {
                return Err(DispatchError::Forbidden(format!(
                    "responder {responder_id} is not assigned to incident {incident_id}"
                )));
            }
            release_assignment(
                txn,
                incident_id,
                &ReleaseReason::Declined {
                    reason: reason.to_string(),
                },
                policy,
            )
        })?;

        self.audit.append(
            actor.clone(),
            "incident.decline",
            incident_id,
            Some(format!("unit {responder_id}: {reason}")),
        );
        self.activity.append(
            incident_id,
            actor,
            ActivityKind::Declined,
            &format!("Unit {responder_id} declined: {reason}"),
        );
        self.notify_incident(&outcome.incident);
        info!(incident_id, responder_id, reason, "assignment declined");
        Ok(outcome.incident)
    }

    /// Publish an incident-updated event scoped to the assigned agency (when
    /// known) and to administrators. Runs strictly after commit.
    pub(crate) fn notify_incident(&self, incident: &Incident) {
        let mut scopes = vec![NotificationScope::Admins];
        if let Some(agency_id) = &incident.assigned_agency_id {
            scopes.push(NotificationScope::Agency(agency_id.clone()));
        }
        self.notifier.publish(
            scopes,
            DispatchEvent::IncidentUpdated {
                incident_id: incident.id.clone(),
                status: incident.status,
                timestamp: Utc::now(),
            },
        );
    }
}
