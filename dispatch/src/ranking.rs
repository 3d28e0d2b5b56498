//! Candidate ranking — multi-factor scoring of (agency, responder) pairs.
//!
//! Ranking is read-only and advisory: it performs no writes, may be called
//! repeatedly and concurrently, and anything it concludes about responder
//! availability is re-checked inside the committing transaction.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DispatchResult;
use crate::geo::{point_in_polygon, GeoPoint};
use crate::store::{
    Agency, AgencyId, AgencyKind, Incident, Responder, ResponderId, Store, StoreTxn,
};
use crate::travel::{TravelEstimate, TravelEstimator};

/// Weight of the jurisdiction score for per-responder candidates.
const JURISDICTION_WEIGHT: f64 = 0.35;
/// Weight of the normalized severity for per-responder candidates.
const SEVERITY_WEIGHT: f64 = 0.30;
/// Weight of the proximity score for per-responder candidates.
const PROXIMITY_WEIGHT: f64 = 0.25;
/// Jurisdiction weight when an agency has no available responders.
const AGENCY_ONLY_JURISDICTION_WEIGHT: f64 = 0.5;
/// Severity weight when an agency has no available responders.
const AGENCY_ONLY_SEVERITY_WEIGHT: f64 = 0.4;
/// Penalty applied when the estimated travel duration is excessive.
const DURATION_PENALTY: f64 = 0.2;

/// Category-affinity rule: keyword hits against an agency kind earn a bonus.
struct AffinityRule {
    kind: AgencyKind,
    keywords: &'static [&'static str],
    bonus: f64,
}

/// Static affinity table. Kept as data so tie-break behavior stays auditable.
const CATEGORY_AFFINITY: &[AffinityRule] = &[
    AffinityRule {
        kind: AgencyKind::Fire,
        keywords: &["fire", "smoke"],
        bonus: 0.2,
    },
    AffinityRule {
        kind: AgencyKind::Medical,
        keywords: &["medical", "injury", "ambulance"],
        bonus: 0.2,
    },
    AffinityRule {
        kind: AgencyKind::Police,
        keywords: &["crime", "assault", "robbery"],
        bonus: 0.15,
    },
    AffinityRule {
        kind: AgencyKind::Traffic,
        keywords: &["traffic", "accident", "crash"],
        bonus: 0.15,
    },
    AffinityRule {
        kind: AgencyKind::Utility,
        keywords: &["construction", "utility", "infrastructure", "outage"],
        bonus: 0.3,
    },
];

/// Bonus for an incident category against an agency kind.
pub(crate) fn category_bonus(category: Option<&str>, kind: AgencyKind) -> f64 {
    let Some(category) = category else {
        return 0.0;
    };
    let category = category.to_lowercase();
    CATEGORY_AFFINITY
        .iter()
        .filter(|rule| rule.kind == kind)
        .find(|rule| rule.keywords.iter().any(|k| category.contains(k)))
        .map(|rule| rule.bonus)
        .unwrap_or(0.0)
}

/// Tunable ranking thresholds. Weights are fixed; only horizons move.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Distance at which proximity stops contributing, in km.
    pub proximity_horizon_km: f64,
    /// Estimated minutes above which the duration penalty applies.
    pub duration_penalty_threshold_min: f64,
    /// Severity assumed for unclassified incidents.
    pub default_severity: u8,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            proximity_horizon_km: 15.0,
            duration_penalty_threshold_min: 30.0,
            default_severity: 3,
        }
    }
}

/// A transient scored (agency, responder) pairing. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchCandidate {
    pub agency_id: AgencyId,
    /// `None` for an agency-level candidate with no available unit.
    pub responder_id: Option<ResponderId>,
    pub jurisdiction_score: f64,
    pub severity_score: f64,
    pub proximity_score: f64,
    pub category_bonus: f64,
    pub distance_km: Option<f64>,
    pub duration_min: Option<f64>,
    pub total_score: f64,
}

/// Ranks eligible agencies and responders for an incident.
pub struct CandidateRanker<S: Store> {
    store: Arc<S>,
    estimator: Arc<dyn TravelEstimator>,
    config: RankingConfig,
}

impl<S: Store> CandidateRanker<S> {
    pub fn new(store: Arc<S>, estimator: Arc<dyn TravelEstimator>, config: RankingConfig) -> Self {
        Self {
            store,
            estimator,
            config,
        }
    }

    /// Produce candidates for `incident_id`, best first.
    ///
    /// Ordering is fully deterministic: total score descending, then
    /// distance ascending (unknown distance last), then agency id, then
    /// responder id.
    pub async fn rank(&self, incident_id: &str) -> DispatchResult<Vec<DispatchCandidate>> {
        let (incident, agencies, responders) = self.snapshot(incident_id)?;

        let severity = incident.severity.unwrap_or(self.config.default_severity);
        let severity_norm = (f64::from(severity) / 5.0).clamp(0.0, 1.0);

        // Declined units never re-enter candidate generation; units without
        // a known position cannot be ranked against a location.
        let eligible: Vec<&Responder> = responders
            .iter()
            .filter(|r| r.location.is_some() && !incident.has_declined(&r.id))
            .collect();

        let estimates = self.estimate_all(&incident, &eligible).await;

        let mut by_agency: HashMap<&str, Vec<(&Responder, Option<TravelEstimate>)>> =
            HashMap::new();
        for (responder, estimate) in eligible.iter().copied().zip(estimates) {
            by_agency
                .entry(responder.agency_id.as_str())
                .or_default()
                .push((responder, estimate));
        }

        let sole_agency = agencies.len() == 1;
        let mut candidates = Vec::new();
        for agency in &agencies {
            let jurisdiction =
                jurisdiction_score(agency, incident.location, sole_agency);
            let bonus = category_bonus(incident.category.as_deref(), agency.kind);

            match by_agency.get(agency.id.as_str()) {
                None => candidates.push(self.agency_only_candidate(
                    agency,
                    jurisdiction,
                    severity_norm,
                    bonus,
                )),
                Some(units) => {
                    for (responder, estimate) in units {
                        candidates.push(self.responder_candidate(
                            agency,
                            responder,
                            *estimate,
                            jurisdiction,
                            severity_norm,
                            bonus,
                        ));
                    }
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.total_score
                .total_cmp(&a.total_score)
                .then_with(|| {
                    let da = a.distance_km.unwrap_or(f64::INFINITY);
                    let db = b.distance_km.unwrap_or(f64::INFINITY);
                    da.total_cmp(&db)
                })
                .then_with(|| a.agency_id.cmp(&b.agency_id))
                .then_with(|| a.responder_id.cmp(&b.responder_id))
        });

        debug!(
            incident_id,
            candidates = candidates.len(),
            "ranked dispatch candidates"
        );
        Ok(candidates)
    }

    fn snapshot(
        &self,
        incident_id: &str,
    ) -> DispatchResult<(Incident, Vec<Agency>, Vec<Responder>)> {
        self.store
            .with_read(&mut |txn: &dyn StoreTxn| {
                let incident = txn.incident(incident_id)?;
                Ok((incident, txn.active_agencies(), txn.available_responders()))
            })
    }

    /// Travel estimates for every eligible responder, in input order.
    /// `None` when either side lacks a location.
    async fn estimate_all(
        &self,
        incident: &Incident,
        responders: &[&Responder],
    ) -> Vec<Option<TravelEstimate>> {
        let Some(incident_location) = incident.location else {
            return vec![None; responders.len()];
        };
        let futures = responders.iter().map(|responder| {
            let estimator = Arc::clone(&self.estimator);
            let origin = responder.location;
            async move {
                match origin {
                    Some(origin) => Some(estimator.estimate(origin, incident_location).await),
                    None => None,
                }
            }
        });
        join_all(futures).await
    }

    fn agency_only_candidate(
        &self,
        agency: &Agency,
        jurisdiction: f64,
        severity_norm: f64,
        bonus: f64,
    ) -> DispatchCandidate {
        let total = jurisdiction * AGENCY_ONLY_JURISDICTION_WEIGHT
            + severity_norm * AGENCY_ONLY_SEVERITY_WEIGHT
            + bonus;
        DispatchCandidate {
            agency_id: agency.id.clone(),
            responder_id: None,
            jurisdiction_score: jurisdiction,
            severity_score: severity_norm,
            proximity_score: 0.0,
            category_bonus: bonus,
            distance_km: None,
            duration_min: None,
            total_score: total,
        }
    }

    fn responder_candidate(
        &self,
        agency: &Agency,
        responder: &Responder,
        estimate: Option<TravelEstimate>,
        jurisdiction: f64,
        severity_norm: f64,
        bonus: f64,
    ) -> DispatchCandidate {
        let proximity = match estimate {
            Some(e) => {
                1.0 - (e.distance_km / self.config.proximity_horizon_km).clamp(0.0, 1.0)
            }
            None => 0.0,
        };
        let duration_penalty = match estimate {
            Some(e) if e.duration_min > self.config.duration_penalty_threshold_min => {
                DURATION_PENALTY
            }
            _ => 0.0,
        };
        let total = jurisdiction * JURISDICTION_WEIGHT
            + severity_norm * SEVERITY_WEIGHT
            + proximity * PROXIMITY_WEIGHT
            + bonus
            - duration_penalty;
        DispatchCandidate {
            agency_id: agency.id.clone(),
            responder_id: Some(responder.id.clone()),
            jurisdiction_score: jurisdiction,
            severity_score: severity_norm,
            proximity_score: proximity,
            category_bonus: bonus,
            distance_km: estimate.map(|e| e.distance_km),
            duration_min: estimate.map(|e| e.duration_min),
            total_score: total,
        }
    }
}

/// 1.0 inside the agency's jurisdiction (or for a polygonless sole agency),
/// else 0.5. Agencies are penalized, never hard-excluded.
fn jurisdiction_score(agency: &Agency, location: Option<GeoPoint>, sole_agency: bool) -> f64 {
    match (&agency.jurisdiction, location) {
        (Some(ring), Some(point)) if point_in_polygon(point, ring) => 1.0,
        (None, _) if sole_agency => 1.0,
        _ => 0.5,
    }
}
