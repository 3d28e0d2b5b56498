//! dispatchd — runs the SLA monitor on a fixed cadence.
//!
//! The HTTP surface lives outside this crate; this binary wires the engine
//! against the in-memory store for operational tooling and local runs.
//!
//! ```bash
//! # Defaults (30s cadence)
//! dispatchd
//!
//! # Custom profile and cadence, with demo records seeded
//! dispatchd --config dispatch.toml --interval 5 --demo
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dispatch::{
    run_scheduler, ActivityLog, Agency, AgencyKind, AssignmentTransactor, AuditLog, AutoPilot,
    CandidateRanker, DispatchConfig, GeoPoint, GeometricEstimator, Incident, MemoryStore,
    Notifier, OsrmEstimator, Responder, SlaMonitor, Store, StoreResult, StoreTxn,
    TravelEstimator,
};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration profile
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Seconds between monitor passes (overrides the profile)
    #[arg(long)]
    interval: Option<u64>,

    /// Seed demo records and run one auto-pilot evaluation
    #[arg(long, default_value_t = false)]
    demo: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => DispatchConfig::from_path(path)?,
        None => DispatchConfig::default(),
    };
    let interval = args.interval.unwrap_or(config.monitor_interval_secs);

    let store = MemoryStore::new().shared();
    let audit = AuditLog::new().shared();
    let activity = ActivityLog::new().shared();
    let notifier = Notifier::new().shared();

    let estimator: Arc<dyn TravelEstimator> = match &config.travel.routing_url {
        Some(url) => Arc::new(OsrmEstimator::new(
            url.clone(),
            Duration::from_millis(config.travel.timeout_ms),
        )),
        None => Arc::new(GeometricEstimator),
    };

    if args.demo {
        seed_demo(&store)?;
        let ranker = CandidateRanker::new(
            Arc::clone(&store),
            Arc::clone(&estimator),
            config.ranking.clone(),
        );
        let transactor = Arc::new(AssignmentTransactor::new(
            Arc::clone(&store),
            Arc::clone(&audit),
            Arc::clone(&activity),
            Arc::clone(&notifier),
            config.release_policy,
        ));
        let autopilot = AutoPilot::new(
            Arc::clone(&store),
            ranker,
            transactor,
            config.autopilot.clone(),
        );
        let incident_id = store.with_read(&mut |txn: &dyn StoreTxn| {
            Ok::<_, dispatch::StoreError>(
                txn.incidents_in_status(&[dispatch::IncidentStatus::Received])
                    .first()
                    .map(|i| i.id.clone()),
            )
        })?;
        if let Some(incident_id) = incident_id {
            let outcome = autopilot.try_auto_assign(&incident_id).await?;
            info!(?outcome, "demo auto-pilot evaluation");
        }
    }

    let monitor = Arc::new(SlaMonitor::new(
        Arc::clone(&store),
        audit,
        activity,
        notifier,
        config.release_policy,
        config.sla.clone(),
    ));

    run_scheduler(monitor, Duration::from_secs(interval)).await;
    Ok(())
}

/// Seed one fire agency, two units, and a critical incident.
fn seed_demo(store: &MemoryStore) -> Result<()> {
    store.with_txn(&mut |txn: &mut dyn StoreTxn| -> StoreResult<()> {
        let agency = Agency::new("Central Fire Brigade", AgencyKind::Fire);
        let engine = Responder::new(agency.id.clone(), "Engine 1")
            .with_location(GeoPoint::new(9.005, 38.7));
        let ladder = Responder::new(agency.id.clone(), "Ladder 2")
            .with_location(GeoPoint::new(9.06, 38.75));
        let incident = Incident::new("warehouse fire, visible smoke")
            .with_location(GeoPoint::new(9.0, 38.7))
            .with_classification(5, "Fire");
        txn.put_agency(agency);
        txn.put_responder(engine);
        txn.put_responder(ladder);
        txn.put_incident(incident);
        Ok(())
    })?;
    info!("demo records seeded");
    Ok(())
}
