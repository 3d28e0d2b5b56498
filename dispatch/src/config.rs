//! Engine configuration.
//!
//! Every threshold ships with the production default; a TOML profile can
//! override any subset of fields.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::assignment::ReleasePolicy;
use crate::autopilot::AutoPilotConfig;
use crate::ranking::RankingConfig;
use crate::sla::SlaConfig;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Seconds between monitor passes.
    pub monitor_interval_secs: u64,
    pub release_policy: ReleasePolicy,
    pub ranking: RankingConfig,
    pub autopilot: AutoPilotConfig,
    pub sla: SlaConfig,
    pub travel: TravelConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            monitor_interval_secs: 30,
            release_policy: ReleasePolicy::default(),
            ranking: RankingConfig::default(),
            autopilot: AutoPilotConfig::default(),
            sla: SlaConfig::default(),
            travel: TravelConfig::default(),
        }
    }
}

/// Travel-estimator settings. With no routing endpoint configured the
/// engine uses the geometric heuristic alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TravelConfig {
    /// OSRM-compatible routing endpoint, e.g.
    /// `http://localhost:5000/route/v1/driving`.
    pub routing_url: Option<String>,
    /// Upper bound on one routing call, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for TravelConfig {
    fn default() -> Self {
        Self {
            routing_url: None,
            timeout_ms: 1500,
        }
    }
}

impl DispatchConfig {
    /// Load a TOML profile from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}
