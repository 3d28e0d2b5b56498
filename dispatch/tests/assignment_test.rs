//! Integration tests for assignment transitions against the public API:
//! claim races, decline re-routing, and ranking determinism.

use std::sync::Arc;

use dispatch::{
    ActivityLog, Actor, Agency, AgencyKind, AssignmentTransactor, AuditLog, CandidateRanker,
    DispatchError, GeoPoint, GeometricEstimator, Incident, IncidentStatus, MemoryStore, Notifier,
    RankingConfig, ReleasePolicy, Responder, ResponderStatus, Store, StoreResult, StoreTxn,
    TravelEstimator,
};

fn transactor(store: Arc<MemoryStore>) -> AssignmentTransactor<MemoryStore> {
    AssignmentTransactor::new(
        store,
        AuditLog::new().shared(),
        ActivityLog::new().shared(),
        Notifier::new().shared(),
        ReleasePolicy::default(),
    )
}

fn ranker(store: Arc<MemoryStore>) -> CandidateRanker<MemoryStore> {
    let estimator: Arc<dyn TravelEstimator> = Arc::new(GeometricEstimator);
    CandidateRanker::new(store, estimator, RankingConfig::default())
}

fn dispatcher() -> Actor {
    Actor::User("dispatcher-1".to_string())
}

#[test]
fn test_concurrent_assigns_have_exactly_one_winner() {
    let store = MemoryStore::new().shared();
    let (agency_id, responder_id, incident_ids) = store
        .with_txn(
            &mut |txn: &mut dyn StoreTxn| -> StoreResult<(String, String, Vec<String>)> {
                let agency = Agency::new("Central", AgencyKind::Police);
                let responder = Responder::new(agency.id.clone(), "Unit 1");
                let agency_id = agency.id.clone();
                let responder_id = responder.id.clone();
                txn.put_agency(agency);
                txn.put_responder(responder);

                let incident_ids = (0..8)
                    .map(|n| {
                        let incident = Incident::new(format!("incident {n}"));
                        let id = incident.id.clone();
                        txn.put_incident(incident);
                        id
                    })
                    .collect();
                Ok((agency_id, responder_id, incident_ids))
            },
        )
        .unwrap();

    let transactor = Arc::new(transactor(Arc::clone(&store)));
    let handles: Vec<_> = incident_ids
        .iter()
        .map(|incident_id| {
            let transactor = Arc::clone(&transactor);
            let incident_id = incident_id.clone();
            let agency_id = agency_id.clone();
            let responder_id = responder_id.clone();
            std::thread::spawn(move || {
                transactor.assign(&incident_id, &agency_id, Some(&responder_id), dispatcher())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one racing assign may win");
    for result in &results {
        if let Err(err) = result {
            assert!(matches!(err, DispatchError::Conflict(_)), "{err:?}");
        }
    }

    let winner_incident = results
        .iter()
        .find_map(|r| r.as_ref().ok())
        .expect("one winner")
        .id
        .clone();
    store
        .with_read(&mut |txn: &dyn StoreTxn| -> StoreResult<()> {
            let responder = txn.responder(&responder_id)?;
            assert_eq!(responder.status, ResponderStatus::Assigned);
            assert_eq!(responder.incident_id.as_deref(), Some(winner_incident.as_str()));

            // Single-holder invariant across all incidents.
            let holders = txn
                .incidents_in_status(&[IncidentStatus::Assigned])
                .into_iter()
                .filter(|i| i.assigned_responder_id.as_deref() == Some(responder_id.as_str()))
                .count();
            assert_eq!(holders, 1);
            Ok(())
        })
        .unwrap();
}

#[tokio::test]
async fn test_decline_reroutes_to_runner_up() {
    let store = MemoryStore::new().shared();
    let scene = GeoPoint::new(9.0, 38.7);
    let (agency_id, near_id, far_id, incident_id) = store
        .with_txn(
            &mut |txn: &mut dyn StoreTxn| -> StoreResult<(String, String, String, String)> {
                let agency = Agency::new("Central", AgencyKind::Police);
                // ~0.11 km and ~5 km straight-line from the scene.
                let near = Responder::new(agency.id.clone(), "Unit A")
                    .with_location(GeoPoint::new(9.001, 38.7));
                let far = Responder::new(agency.id.clone(), "Unit B")
                    .with_location(GeoPoint::new(9.045, 38.7));
                let incident = Incident::new("robbery in progress")
                    .with_location(scene)
                    .with_classification(4, "Robbery");
                let ids = (
                    agency.id.clone(),
                    near.id.clone(),
                    far.id.clone(),
                    incident.id.clone(),
                );
                txn.put_agency(agency);
                txn.put_responder(near);
                txn.put_responder(far);
                txn.put_incident(incident);
                Ok(ids)
            },
        )
        .unwrap();

    let ranker = ranker(Arc::clone(&store));
    let transactor = transactor(Arc::clone(&store));

    let before = ranker.rank(&incident_id).await.unwrap();
    assert_eq!(before[0].responder_id.as_deref(), Some(near_id.as_str()));
    assert!(before[0].total_score > before[1].total_score);

    transactor
        .assign(&incident_id, &agency_id, Some(&near_id), dispatcher())
        .unwrap();
    transactor
        .decline(&incident_id, &near_id, "unit needed elsewhere", dispatcher())
        .unwrap();

    let after = ranker.rank(&incident_id).await.unwrap();
    assert_eq!(after[0].responder_id.as_deref(), Some(far_id.as_str()));
    assert!(
        after.iter().all(|c| c.responder_id.as_deref() != Some(near_id.as_str())),
        "declined responder must never be ranked again"
    );

    // The freed unit is available for other incidents.
    store
        .with_read(&mut |txn: &dyn StoreTxn| -> StoreResult<()> {
            assert_eq!(txn.responder(&near_id)?.status, ResponderStatus::Available);
            Ok(())
        })
        .unwrap();
}

#[tokio::test]
async fn test_rank_is_deterministic_without_state_changes() {
    let store = MemoryStore::new().shared();
    let scene = GeoPoint::new(9.0, 38.7);
    let incident_id = store
        .with_txn(&mut |txn: &mut dyn StoreTxn| -> StoreResult<String> {
            let police = Agency::new("Patrol", AgencyKind::Police);
            let medical = Agency::new("City Medical", AgencyKind::Medical);
            for (agency, name, lat) in [
                (&police, "Unit A", 9.004),
                (&police, "Unit B", 9.02),
                (&medical, "Ambulance 1", 9.01),
            ] {
                txn.put_responder(
                    Responder::new(agency.id.clone(), name)
                        .with_location(GeoPoint::new(lat, 38.7)),
                );
            }
            txn.put_agency(police);
            txn.put_agency(medical);

            let incident = Incident::new("pedestrian injured")
                .with_location(scene)
                .with_classification(4, "Injury");
            let id = incident.id.clone();
            txn.put_incident(incident);
            Ok(id)
        })
        .unwrap();

    let ranker = ranker(Arc::clone(&store));
    let first = ranker.rank(&incident_id).await.unwrap();
    let second = ranker.rank(&incident_id).await.unwrap();
    assert_eq!(first, second, "identical ordering and scores expected");
    assert!(!first.is_empty());
}
