//! Integration tests for the autonomous assignment path.

use std::sync::Arc;

use dispatch::{
    ActivityKind, ActivityLog, AssignmentTransactor, AuditLog, AutoPilot, AutoPilotConfig,
    AutoPilotOutcome, Agency, AgencyKind, CandidateRanker, GeoPoint, GeometricEstimator,
    Incident, IncidentStatus, MemoryStore, NotificationScope, Notifier, RankingConfig,
    ReleasePolicy, Responder, ResponderStatus, SkipReason, Store, StoreResult, StoreTxn,
    TravelEstimator,
};

struct Harness {
    store: Arc<MemoryStore>,
    activity: Arc<ActivityLog>,
    audit: Arc<AuditLog>,
    notifier: Arc<Notifier>,
    autopilot: AutoPilot<MemoryStore>,
}

fn harness() -> Harness {
    let store = MemoryStore::new().shared();
    let audit = AuditLog::new().shared();
    let activity = ActivityLog::new().shared();
    let notifier = Notifier::new().shared();
    let estimator: Arc<dyn TravelEstimator> = Arc::new(GeometricEstimator);
    let ranker = CandidateRanker::new(
        Arc::clone(&store),
        estimator,
        RankingConfig::default(),
    );
    let transactor = Arc::new(AssignmentTransactor::new(
        Arc::clone(&store),
        Arc::clone(&audit),
        Arc::clone(&activity),
        Arc::clone(&notifier),
        ReleasePolicy::default(),
    ));
    let autopilot = AutoPilot::new(
        Arc::clone(&store),
        ranker,
        transactor,
        AutoPilotConfig::default(),
    );
    Harness {
        store,
        activity,
        audit,
        notifier,
        autopilot,
    }
}

/// A severity-5 fire with a fire engine ~1.25 km of estimated road away.
fn seed_critical_fire(h: &Harness) -> (String, String, String) {
    h.store
        .with_txn(
            &mut |txn: &mut dyn StoreTxn| -> StoreResult<(String, String, String)> {
                let agency = Agency::new("Central Fire Brigade", AgencyKind::Fire);
                let engine = Responder::new(agency.id.clone(), "Engine 1")
                    .with_location(GeoPoint::new(9.008, 38.7));
                let incident = Incident::new("apartment block fire")
                    .with_location(GeoPoint::new(9.0, 38.7))
                    .with_classification(5, "Fire");
                let ids = (incident.id.clone(), agency.id.clone(), engine.id.clone());
                txn.put_agency(agency);
                txn.put_responder(engine);
                txn.put_incident(incident);
                Ok(ids)
            },
        )
        .unwrap()
}

#[tokio::test]
async fn test_critical_fire_assigned_without_human_input() {
    let h = harness();
    let (incident_id, agency_id, responder_id) = seed_critical_fire(&h);

    let mut agency_rx = h
        .notifier
        .subscribe_scope(NotificationScope::Agency(agency_id.clone()));

    let outcome = h.autopilot.try_auto_assign(&incident_id).await.unwrap();
    let candidate = match outcome {
        AutoPilotOutcome::Assigned { incident, candidate } => {
            assert_eq!(incident.status, IncidentStatus::Assigned);
            assert_eq!(
                incident.assigned_responder_id.as_deref(),
                Some(responder_id.as_str())
            );
            assert!(incident.dispatched_at.is_some());
            candidate
        }
        other => panic!("expected autonomous assignment, got {other:?}"),
    };
    assert!(candidate.total_score >= 0.75);
    assert!(candidate.distance_km.unwrap() <= 2.0);

    // The responder is claimed and no longer available.
    h.store
        .with_read(&mut |txn: &dyn StoreTxn| -> StoreResult<()> {
            let responder = txn.responder(&responder_id)?;
            assert_eq!(responder.status, ResponderStatus::Assigned);
            assert_eq!(responder.incident_id.as_deref(), Some(incident_id.as_str()));
            Ok(())
        })
        .unwrap();

    // The action is attributed to the automated system, not a human.
    let records = h.activity.for_incident(&incident_id);
    assert!(records
        .iter()
        .any(|r| r.kind == ActivityKind::AutoAssigned && r.actor.is_system()));
    assert!(h.audit.entries().iter().any(|e| e.actor.is_system()));

    // Downstream notification went out to the agency scope.
    let notification = agency_rx.recv().await.unwrap();
    assert_eq!(notification.event.event_type(), "incident_updated");
}

#[tokio::test]
async fn test_second_evaluation_is_a_no_op() {
    let h = harness();
    let (incident_id, _, _) = seed_critical_fire(&h);

    let first = h.autopilot.try_auto_assign(&incident_id).await.unwrap();
    assert!(first.is_assigned());

    let second = h.autopilot.try_auto_assign(&incident_id).await.unwrap();
    match second {
        AutoPilotOutcome::NotTriggered { reason } => {
            assert_eq!(
                reason,
                SkipReason::NotPending {
                    status: IncidentStatus::Assigned
                }
            );
        }
        other => panic!("expected deferral on re-evaluation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unclassified_incident_defers() {
    let h = harness();
    let incident_id = h
        .store
        .with_txn(&mut |txn: &mut dyn StoreTxn| -> StoreResult<String> {
            let agency = Agency::new("Central Fire Brigade", AgencyKind::Fire);
            let engine = Responder::new(agency.id.clone(), "Engine 1")
                .with_location(GeoPoint::new(9.0, 38.7));
            let incident = Incident::new("unclassified report")
                .with_location(GeoPoint::new(9.0, 38.7));
            let id = incident.id.clone();
            txn.put_agency(agency);
            txn.put_responder(engine);
            txn.put_incident(incident);
            Ok(id)
        })
        .unwrap();

    let outcome = h.autopilot.try_auto_assign(&incident_id).await.unwrap();
    match outcome {
        AutoPilotOutcome::NotTriggered { reason } => {
            assert_eq!(reason, SkipReason::BelowSeverity { severity: None });
        }
        other => panic!("expected deferral, got {other:?}"),
    }

    // Nothing moved.
    h.store
        .with_read(&mut |txn: &dyn StoreTxn| -> StoreResult<()> {
            assert_eq!(txn.incident(&incident_id)?.status, IncidentStatus::Received);
            Ok(())
        })
        .unwrap();
}
