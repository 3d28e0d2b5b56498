//! Background SLA monitoring and repair.
//!
//! Three independent sweeps run on every pass: intake escalation (signal
//! only), acknowledgment-timeout repair (re-queue and release), and the
//! heartbeat sweep (mark silent responders offline). A failure repairing one
//! record is logged and never aborts the rest of the pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::assignment::{release_assignment, run_txn, ReleasePolicy, ReleaseReason};
use crate::audit::{ActivityKind, ActivityLog, Actor, AuditLog};
use crate::error::DispatchResult;
use crate::events::{DispatchEvent, NotificationScope, SharedNotifier};
use crate::store::{Incident, IncidentStatus, Responder, ResponderStatus, Store, StoreTxn};

/// Timing thresholds for the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaConfig {
    /// Intake escalation threshold in seconds.
    pub intake_threshold_secs: u64,
    /// Acknowledgment deadline in seconds.
    pub ack_threshold_secs: u64,
    /// Responder heartbeat silence threshold in seconds.
    pub heartbeat_threshold_secs: u64,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            intake_threshold_secs: 600,
            ack_threshold_secs: 90,
            heartbeat_threshold_secs: 300,
        }
    }
}

/// Counts from one monitor pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaReport {
    /// Incidents newly flagged for intake escalation.
    pub intake_flagged: usize,
    /// Assignments re-queued after acknowledgment timeout.
    pub requeued: usize,
    /// Responders marked offline by the heartbeat sweep.
    pub marked_offline: usize,
    /// Per-record repair failures (logged, not propagated).
    pub errors: usize,
}

/// Periodic monitor detecting and repairing stalled state.
pub struct SlaMonitor<S: Store> {
    store: Arc<S>,
    audit: Arc<AuditLog>,
    activity: Arc<ActivityLog>,
    notifier: SharedNotifier,
    policy: ReleasePolicy,
    config: SlaConfig,
}

impl<S: Store> SlaMonitor<S> {
    pub fn new(
        store: Arc<S>,
        audit: Arc<AuditLog>,
        activity: Arc<ActivityLog>,
        notifier: SharedNotifier,
        policy: ReleasePolicy,
        config: SlaConfig,
    ) -> Self {
        Self {
            store,
            audit,
            activity,
            notifier,
            policy,
            config,
        }
    }

    /// Run all sweeps once. Callable by the scheduler and directly by
    /// operational tooling and tests.
    pub fn run_sla_checks(&self) -> SlaReport {
        let mut report = SlaReport::default();
        self.intake_sweep(&mut report);
        self.acknowledgment_sweep(&mut report);
        self.heartbeat_sweep(&mut report);
        if report != SlaReport::default() {
            info!(?report, "sla pass finished");
        }
        report
    }

    /// Flag incidents stuck before dispatch. Signal only, no transition;
    /// the activity-kind presence check makes the flag idempotent.
    fn intake_sweep(&self, report: &mut SlaReport) {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.intake_threshold_secs as i64);
        let pending = match self.store.with_read(&mut |txn: &dyn StoreTxn| {
            Ok::<_, crate::store::StoreError>(
                txn.incidents_in_status(&[IncidentStatus::Received, IncidentStatus::UnderReview]),
            )
        }) {
            Ok(pending) => pending,
            Err(err) => {
                error!(%err, "intake sweep could not read incidents");
                report.errors += 1;
                return;
            }
        };

        for incident in pending {
            if incident.reported_at >= cutoff {
                continue;
            }
            if self.activity.has_kind(&incident.id, ActivityKind::SlaBreach) {
                continue;
            }
            warn!(incident_id = %incident.id, "intake SLA breached");
            self.activity.append(
                &incident.id,
                Actor::SlaMonitor,
                ActivityKind::SlaBreach,
                &format!(
                    "SLA Breach: pending for more than {}s — escalate to supervisor",
                    self.config.intake_threshold_secs
                ),
            );
            self.notifier.publish(
                vec![NotificationScope::Admins],
                DispatchEvent::IncidentUpdated {
                    incident_id: incident.id.clone(),
                    status: incident.status,
                    timestamp: Utc::now(),
                },
            );
            report.intake_flagged += 1;
        }
    }

    /// Re-queue assignments whose acknowledgment window elapsed.
    fn acknowledgment_sweep(&self, report: &mut SlaReport) {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.ack_threshold_secs as i64);
        let assigned = match self.store.with_read(&mut |txn: &dyn StoreTxn| {
            Ok::<_, crate::store::StoreError>(txn.incidents_in_status(&[IncidentStatus::Assigned]))
        }) {
            Ok(assigned) => assigned,
            Err(err) => {
                error!(%err, "acknowledgment sweep could not read incidents");
                report.errors += 1;
                return;
            }
        };

        for incident in assigned {
            let timed_out = incident.acknowledged_at.is_none()
                && incident.dispatched_at.is_some_and(|at| at < cutoff);
            if !timed_out {
                continue;
            }
            match self.requeue_timed_out(&incident) {
                Ok(true) => report.requeued += 1,
                Ok(false) => {}
                Err(err) => {
                    error!(%err, incident_id = %incident.id, "acknowledgment repair failed");
                    report.errors += 1;
                }
            }
        }
    }

    /// Repair one timed-out assignment. Returns false if a racing update
    /// made the incident ineligible by commit time.
    fn requeue_timed_out(&self, stale: &Incident) -> DispatchResult<bool> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.ack_threshold_secs as i64);
        let policy = self.policy;
        let outcome = run_txn(self.store.as_ref(), |txn| {
            let incident = txn.incident(&stale.id)?;
            let still_timed_out = incident.status == IncidentStatus::Assigned
                && incident.acknowledged_at.is_none()
                && incident.dispatched_at.is_some_and(|at| at < cutoff);
            if !still_timed_out {
                return Ok(None);
            }
            release_assignment(txn, &incident.id, &ReleaseReason::AckTimeout, policy).map(Some)
        })?;

        let Some(outcome) = outcome else {
            return Ok(false);
        };
        warn!(incident_id = %stale.id, "assignment acknowledgment timed out, re-queued");
        self.audit.append(
            Actor::SlaMonitor,
            "incident.requeue",
            &stale.id,
            Some("acknowledgment timeout".to_string()),
        );
        self.activity.append(
            &stale.id,
            Actor::SlaMonitor,
            ActivityKind::AssignmentTimeout,
            "Assignment Timeout: no acknowledgment within the SLA window — re-queued",
        );

        let mut scopes = vec![NotificationScope::Admins];
        if let Some(agency_id) = &outcome.incident.assigned_agency_id {
            scopes.push(NotificationScope::Agency(agency_id.clone()));
        }
        self.notifier.publish(
            scopes,
            DispatchEvent::IncidentUpdated {
                incident_id: outcome.incident.id.clone(),
                status: outcome.incident.status,
                timestamp: Utc::now(),
            },
        );
        Ok(true)
    }

    /// Mark silent responders offline. Units already responding
    /// (EnRoute/OnScene) or holding an acknowledged assignment stay
    /// committed: a radio gap does not recall a unit from a scene.
    fn heartbeat_sweep(&self, report: &mut SlaReport) {
        let cutoff =
            Utc::now() - chrono::Duration::seconds(self.config.heartbeat_threshold_secs as i64);
        let silent = match self.store.with_read(&mut |txn: &dyn StoreTxn| {
            Ok::<_, crate::store::StoreError>(txn.responders_silent_since(cutoff))
        }) {
            Ok(silent) => silent,
            Err(err) => {
                error!(%err, "heartbeat sweep could not read responders");
                report.errors += 1;
                return;
            }
        };

        for responder in silent {
            match self.mark_offline(&responder) {
                Ok(true) => report.marked_offline += 1,
                Ok(false) => {}
                Err(err) => {
                    error!(%err, responder_id = %responder.id, "heartbeat repair failed");
                    report.errors += 1;
                }
            }
        }
    }

    /// Take one silent responder offline. Returns false when the unit is
    /// exempt (responding, acknowledged, or refreshed since the listing).
    fn mark_offline(&self, stale: &Responder) -> DispatchResult<bool> {
        let cutoff =
            Utc::now() - chrono::Duration::seconds(self.config.heartbeat_threshold_secs as i64);
        let policy = self.policy;
        let released = run_txn(self.store.as_ref(), |txn| {
            let mut responder = txn.responder(&stale.id)?;
            if responder.status == ResponderStatus::Offline || responder.last_seen_at >= cutoff {
                return Ok(None);
            }
            match responder.status {
                ResponderStatus::Available => {
                    responder.status = ResponderStatus::Offline;
                    txn.put_responder(responder.clone());
                    Ok(Some((responder, None)))
                }
                ResponderStatus::Assigned => {
                    let incident_id = responder.incident_id.clone();
                    let unacknowledged = match &incident_id {
                        Some(id) => {
                            let incident = txn.incident(id)?;
                            incident.status == IncidentStatus::Assigned
                                && incident.acknowledged_at.is_none()
                        }
                        None => false,
                    };
                    if !unacknowledged {
                        return Ok(None);
                    }
                    let incident_id = incident_id.unwrap_or_default();
                    let outcome = release_assignment(
                        txn,
                        &incident_id,
                        &ReleaseReason::ResponderOffline,
                        policy,
                    )?;
                    Ok(Some((
                        outcome.responder.unwrap_or_else(|| {
                            let mut r = stale.clone();
                            r.status = ResponderStatus::Offline;
                            r.incident_id = None;
                            r
                        }),
                        Some(outcome.incident),
                    )))
                }
                // EnRoute / OnScene: leave the unit committed.
                _ => Ok(None),
            }
        })?;

        let Some((responder, requeued)) = released else {
            return Ok(false);
        };
        warn!(responder_id = %responder.id, "responder heartbeat timed out, marked offline");
        self.audit.append(
            Actor::SlaMonitor,
            "responder.offline",
            &responder.id,
            Some("heartbeat timeout".to_string()),
        );
        self.notifier.publish(
            vec![
                NotificationScope::Agency(responder.agency_id.clone()),
                NotificationScope::Admins,
            ],
            DispatchEvent::ResponderStatusChanged {
                responder_id: responder.id.clone(),
                agency_id: responder.agency_id.clone(),
                status: responder.status,
                timestamp: Utc::now(),
            },
        );

        if let Some(incident) = requeued {
            self.activity.append(
                &incident.id,
                Actor::SlaMonitor,
                ActivityKind::ResponderOffline,
                &format!("Unit {} went offline before acknowledging — re-queued", responder.id),
            );
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
        Ok(true)
    }
}

/// Drive the monitor on a fixed cadence until the task is aborted.
pub async fn run_scheduler<S: Store>(monitor: Arc<SlaMonitor<S>>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(period_secs = period.as_secs(), "sla scheduler started");
    loop {
        interval.tick().await;
        let report = monitor.run_sla_checks();
        debug!(?report, "sla tick");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Notifier;
    use crate::store::{Agency, AgencyKind, MemoryStore, StoreResult};

    fn monitor(store: Arc<MemoryStore>, activity: Arc<ActivityLog>) -> SlaMonitor<MemoryStore> {
        SlaMonitor::new(
            store,
            AuditLog::new().shared(),
            activity,
            Notifier::new().shared(),
            ReleasePolicy::default(),
            SlaConfig::default(),
        )
    }

    #[test]
    fn test_intake_flag_is_idempotent() {
        let store = MemoryStore::new().shared();
        let activity = ActivityLog::new().shared();
        let incident_id = store
            .with_txn(&mut |txn: &mut dyn StoreTxn| -> StoreResult<String> {
                let mut incident = Incident::new("unreviewed report");
                incident.reported_at = Utc::now() - chrono::Duration::minutes(15);
                let id = incident.id.clone();
                txn.put_incident(incident);
                Ok(id)
            })
            .unwrap();

        let m = monitor(Arc::clone(&store), Arc::clone(&activity));
        let first = m.run_sla_checks();
        assert_eq!(first.intake_flagged, 1);
        let second = m.run_sla_checks();
        assert_eq!(second.intake_flagged, 0);
        assert_eq!(activity.for_incident(&incident_id).len(), 1);
    }

    #[test]
    fn test_fresh_incident_not_flagged() {
        let store = MemoryStore::new().shared();
        let activity = ActivityLog::new().shared();
        store
            .with_txn(&mut |txn: &mut dyn StoreTxn| -> StoreResult<()> {
                txn.put_incident(Incident::new("just reported"));
                Ok(())
            })
            .unwrap();

        let report = monitor(store, activity).run_sla_checks();
        assert_eq!(report.intake_flagged, 0);
    }

    #[test]
    fn test_heartbeat_marks_available_unit_offline() {
        let store = MemoryStore::new().shared();
        let activity = ActivityLog::new().shared();
        let responder_id = store
            .with_txn(&mut |txn: &mut dyn StoreTxn| -> StoreResult<String> {
                let agency = Agency::new("Central", AgencyKind::Police);
                let mut responder = Responder::new(agency.id.clone(), "Unit 1");
                responder.last_seen_at = Utc::now() - chrono::Duration::minutes(10);
                let id = responder.id.clone();
                txn.put_agency(agency);
                txn.put_responder(responder);
                Ok(id)
            })
            .unwrap();

        let report = monitor(Arc::clone(&store), activity).run_sla_checks();
        assert_eq!(report.marked_offline, 1);
        store
            .with_read(&mut |txn: &dyn StoreTxn| -> StoreResult<()> {
                assert_eq!(txn.responder(&responder_id)?.status, ResponderStatus::Offline);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_heartbeat_leaves_en_route_unit_committed() {
        let store = MemoryStore::new().shared();
        let activity = ActivityLog::new().shared();
        let responder_id = store
            .with_txn(&mut |txn: &mut dyn StoreTxn| -> StoreResult<String> {
                let agency = Agency::new("Central", AgencyKind::Police);
                let mut responder = Responder::new(agency.id.clone(), "Unit 1");
                responder.status = ResponderStatus::EnRoute;
                responder.incident_id = Some("inc-1".to_string());
                responder.last_seen_at = Utc::now() - chrono::Duration::minutes(10);
                let id = responder.id.clone();
                txn.put_agency(agency);
                txn.put_responder(responder);
                Ok(id)
            })
            .unwrap();

        let report = monitor(Arc::clone(&store), activity).run_sla_checks();
        assert_eq!(report.marked_offline, 0);
        store
            .with_read(&mut |txn: &dyn StoreTxn| -> StoreResult<()> {
                assert_eq!(txn.responder(&responder_id)?.status, ResponderStatus::EnRoute);
                Ok(())
            })
            .unwrap();
    }
}
