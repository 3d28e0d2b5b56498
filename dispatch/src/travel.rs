//! Travel estimation with graceful degradation.
//!
//! Estimators never raise to callers: a failed provider degrades to the
//! geometric heuristic, and unusable inputs degrade to a zero estimate, so
//! ranking gets worse rather than aborting.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DispatchError, DispatchResult};
use crate::geo::{haversine_km, GeoPoint};

/// Road-distance multiplier applied to the great-circle distance.
const ROAD_TORTUOSITY: f64 = 1.4;

/// Assumed urban average speed in km/h.
const URBAN_SPEED_KMH: f64 = 25.0;

/// An estimated road distance and travel duration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TravelEstimate {
    pub distance_km: f64,
    pub duration_min: f64,
}

impl TravelEstimate {
    /// Zero estimate used when no meaningful estimate can be produced.
    pub const ZERO: Self = Self {
        distance_km: 0.0,
        duration_min: 0.0,
    };
}

/// Contract for travel estimation. Implementations must not block
/// indefinitely and must not fail: degrade to a coarse value instead.
#[async_trait]
pub trait TravelEstimator: Send + Sync {
    async fn estimate(&self, origin: GeoPoint, dest: GeoPoint) -> TravelEstimate;
}

/// Deterministic great-circle heuristic: haversine × tortuosity at urban
/// average speed.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeometricEstimator;

impl GeometricEstimator {
    pub fn compute(&self, origin: GeoPoint, dest: GeoPoint) -> TravelEstimate {
        if !origin.is_valid() || !dest.is_valid() {
            return TravelEstimate::ZERO;
        }
        let distance_km = haversine_km(origin, dest) * ROAD_TORTUOSITY;
        let duration_min = distance_km / URBAN_SPEED_KMH * 60.0;
        TravelEstimate {
            distance_km,
            duration_min,
        }
    }
}

#[async_trait]
impl TravelEstimator for GeometricEstimator {
    async fn estimate(&self, origin: GeoPoint, dest: GeoPoint) -> TravelEstimate {
        self.compute(origin, dest)
    }
}

/// Network-backed estimator against an OSRM routing endpoint.
///
/// Every call is bounded by `timeout`; timeouts, transport errors, and
/// empty route sets all fall back to [`GeometricEstimator`].
pub struct OsrmEstimator {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    fallback: GeometricEstimator,
}

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    /// Metres.
    distance: f64,
    /// Seconds.
    duration: f64,
}

impl OsrmEstimator {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout,
            fallback: GeometricEstimator,
        }
    }

    async fn fetch(&self, origin: GeoPoint, dest: GeoPoint) -> DispatchResult<TravelEstimate> {
        let url = format!(
            "{}/{},{};{},{}?overview=false&alternatives=false",
            self.base_url, origin.lng, origin.lat, dest.lng, dest.lat
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DispatchError::UpstreamUnavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| DispatchError::UpstreamUnavailable(e.to_string()))?;
        let body: OsrmResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::UpstreamUnavailable(e.to_string()))?;
        let route = body.routes.first().ok_or_else(|| {
            DispatchError::UpstreamUnavailable("no route returned".to_string())
        })?;
        Ok(TravelEstimate {
            distance_km: route.distance / 1000.0,
            duration_min: route.duration / 60.0,
        })
    }
}

#[async_trait]
impl TravelEstimator for OsrmEstimator {
    async fn estimate(&self, origin: GeoPoint, dest: GeoPoint) -> TravelEstimate {
        match tokio::time::timeout(self.timeout, self.fetch(origin, dest)).await {
            Ok(Ok(estimate)) => estimate,
            Ok(Err(err)) => {
                warn!(%err, "route provider failed, using geometric estimate");
                self.fallback.compute(origin, dest)
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "route provider timed out");
                self.fallback.compute(origin, dest)
            }
        }
    }
}
