//! Deployment-tunable engine configuration.
//!
//! Every ranking, thresholding, and fan-out parameter lives here rather than
//! in component logic, so the precision/recall and overload tradeoffs can be
//! tuned per deployment without code changes.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Relative weights for composite confidence. Normalized at use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverWeights {
    pub similarity: f32,
    pub geo_temporal: f32,
    pub source_reliability: f32,
}

impl Default for ResolverWeights {
    fn default() -> Self {
        Self {
            similarity: 0.6,
            geo_temporal: 0.25,
            source_reliability: 0.15,
        }
    }
}

impl ResolverWeights {
    pub fn sum(&self) -> f32 {
        self.similarity + self.geo_temporal + self.source_reliability
    }
}

/// Approximate-index construction and search parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexParams {
    /// Embedding dimensionality `D`; submissions of any other length are rejected.
    pub dimension: usize,
    /// Max neighbors per node per layer.
    pub m: usize,
    /// Candidate-list width during insertion.
    pub ef_construction: usize,
    /// Candidate-list width during search; the recall/latency knob.
    pub ef_search: usize,
    /// How many most-recent records the exact-scan fallback covers when the
    /// approximate structure is unavailable.
    pub fallback_scan_window: usize,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            dimension: 512,
            m: 16,
            ef_construction: 200,
            ef_search: 64,
            fallback_scan_window: 50_000,
        }
    }
}

/// Match-resolver thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverParams {
    /// Candidates below this raw similarity are suppressed outright.
    pub similarity_floor: f32,
    /// Floor applied by the duplicate check before corroboration.
    pub duplicate_similarity_floor: f32,
    /// Max distance between last-seen locations for duplicate corroboration.
    pub duplicate_max_distance_meters: f64,
    /// Distance at which geo-temporal proximity decays to zero.
    pub geo_decay_meters: f64,
    /// Age at which temporal proximity decays to zero.
    pub temporal_decay_hours: f64,
}

impl Default for ResolverParams {
    fn default() -> Self {
        Self {
            similarity_floor: 0.55,
            duplicate_similarity_floor: 0.90,
            duplicate_max_distance_meters: 50_000.0,
            geo_decay_meters: 200_000.0,
            temporal_decay_hours: 720.0,
        }
    }
}

/// Alert-dispatch limits and retry policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchParams {
    /// Max recipients per standard-mode dispatch cycle.
    pub fanout_cap: usize,
    /// Alert radius around the last-seen location on case publication.
    pub publish_radius_meters: f64,
    /// Per-(subscriber, case) cool-down; repeat alerts inside it are suppressed.
    pub suppression_cooldown_secs: u64,
    /// Batch size for disaster-broadcast emission.
    pub disaster_batch_size: usize,
    /// Pause between disaster batches, the backpressure pacing knob.
    pub disaster_batch_pause_ms: u64,
    /// Per-call transport deadline; a timeout is a retryable failure.
    pub transport_deadline_ms: u64,
    /// Bounded retry attempts before a recipient is surfaced as undelivered.
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    pub backoff_base_ms: u64,
}

impl Default for DispatchParams {
    fn default() -> Self {
        Self {
            fanout_cap: 2_000,
            publish_radius_meters: 25_000.0,
            suppression_cooldown_secs: 3_600,
            disaster_batch_size: 500,
            disaster_batch_pause_ms: 200,
            transport_deadline_ms: 2_000,
            max_attempts: 4,
            backoff_base_ms: 100,
        }
    }
}

/// Audit-ledger persistence tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerParams {
    /// Checkpoint snapshot cadence in appended events.
    pub checkpoint_interval: u64,
}

impl Default for LedgerParams {
    fn default() -> Self {
        Self {
            checkpoint_interval: 1_024,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub index: IndexParams,
    pub weights: ResolverWeights,
    pub resolver: ResolverParams,
    pub dispatch: DispatchParams,
    pub ledger: LedgerParams,
}

impl EngineConfig {
    /// Load configuration from a JSON file, filling absent fields with defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.index.dimension == 0 {
            return Err(ConfigError::Invalid("index.dimension must be > 0".into()));
        }
        if self.weights.sum() <= 0.0 {
            return Err(ConfigError::Invalid(
                "resolver weights must sum to a positive value".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.resolver.similarity_floor) {
            return Err(ConfigError::Invalid(
                "resolver.similarity_floor must be in [0, 1]".into(),
            ));
        }
        if self.dispatch.fanout_cap == 0 {
            return Err(ConfigError::Invalid("dispatch.fanout_cap must be > 0".into()));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.max_attempts must be > 0".into(),
            ));
        }
        Ok(())
    }
}
