//! Configuration for chainflow-ai
//!
//! Resolution: TOML file (see `chainflow_common::config`) → environment
//! overrides → validation. Every tunable boundary of the pipeline (completeness
//! threshold, quality thresholds and deduction weights, backoff, rate policy)
//! lives here rather than in the components that use it.
//!
//! Validation runs once at startup; an invalid value is a fatal
//! configuration error, never a per-task failure.

use chainflow_common::config::LoggingConfig;
use chainflow_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Module name used for config file lookup
pub const MODULE_NAME: &str = "chainflow-ai";

/// Upper bound on worker count accepted by validation
pub const MAX_WORKERS: usize = 16;

/// Top-level TOML document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainflowConfig {
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub pipeline: PipelineConfig,
    pub inference: InferenceConfig,
    pub database: DatabaseConfig,
}

impl ChainflowConfig {
    /// Apply `CHAINFLOW_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(workers) = std::env::var("CHAINFLOW_WORKERS") {
            self.pipeline.workers = workers.trim().parse().map_err(|_| {
                Error::Config(format!("CHAINFLOW_WORKERS is not a number: {:?}", workers))
            })?;
            info!(workers = self.pipeline.workers, "Worker count from environment");
        }
        if let Ok(endpoint) = std::env::var("CHAINFLOW_INFERENCE_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.inference.endpoint = endpoint;
            }
        }
        if let Ok(model) = std::env::var("CHAINFLOW_INFERENCE_MODEL") {
            if !model.trim().is_empty() {
                self.inference.model = model;
            }
        }
        Ok(())
    }

    /// Fail fast on any invalid value
    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        self.inference.validate()?;
        Ok(())
    }
}

/// `[pipeline]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Boundary separating complete from incomplete chains
    pub completeness_threshold: f64,
    /// Chains with fewer messages are never complete
    pub min_messages_for_complete: usize,
    /// Parallel workers (each with its own inference session)
    pub workers: usize,
    /// Scheduler-level attempts per message before parking
    pub max_task_retries: u32,
    /// Fingerprint cache entries held in memory
    pub cache_capacity: usize,
    /// Metrics push interval
    pub metrics_interval_secs: u64,
    pub quality: QualityConfig,
    pub backoff: BackoffConfig,
    pub rate: RateConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            completeness_threshold: 0.70,
            min_messages_for_complete: 2,
            workers: 4,
            max_task_retries: 3,
            cache_capacity: 10_000,
            metrics_interval_secs: 10,
            quality: QualityConfig::default(),
            backoff: BackoffConfig::default(),
            rate: RateConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.completeness_threshold) {
            return Err(Error::Config(format!(
                "completeness_threshold must be within 0.0-1.0, got {}",
                self.completeness_threshold
            )));
        }
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(Error::Config(format!(
                "workers must be within 1-{}, got {}",
                MAX_WORKERS, self.workers
            )));
        }
        if self.max_task_retries == 0 {
            return Err(Error::Config("max_task_retries must be at least 1".to_string()));
        }
        if self.cache_capacity == 0 {
            return Err(Error::Config("cache_capacity must be at least 1".to_string()));
        }
        if self.metrics_interval_secs == 0 {
            return Err(Error::Config("metrics_interval_secs must be at least 1".to_string()));
        }
        self.quality.validate()?;
        self.backoff.validate()?;
        self.rate.validate()?;
        Ok(())
    }
}

/// `[pipeline.quality]` section: decision thresholds and deduction weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// `total >= accept_threshold` → USE_GENERATED
    pub accept_threshold: f32,
    /// `hybrid_threshold <= total < accept_threshold` → USE_HYBRID
    pub hybrid_threshold: f32,
    /// Confidence outside `[min_confidence, max_confidence]` is implausible
    pub min_confidence: f32,
    pub max_confidence: f32,
    /// Shortest meaningful classification / risk text
    pub min_classification_len: usize,
    pub min_risk_len: usize,
    /// More entities than this is implausible
    pub max_entities: usize,
    pub weights: DeductionWeights,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            accept_threshold: 6.0,
            hybrid_threshold: 4.0,
            min_confidence: 0.30,
            max_confidence: 0.95,
            min_classification_len: 10,
            min_risk_len: 20,
            max_entities: 25,
            weights: DeductionWeights::default(),
        }
    }
}

impl QualityConfig {
    pub fn validate(&self) -> Result<()> {
        let in_range = |v: f32| (0.0..=10.0).contains(&v);
        if !in_range(self.accept_threshold) || !in_range(self.hybrid_threshold) {
            return Err(Error::Config(format!(
                "quality thresholds must be within 0-10 (accept {}, hybrid {})",
                self.accept_threshold, self.hybrid_threshold
            )));
        }
        if self.hybrid_threshold > self.accept_threshold {
            return Err(Error::Config(format!(
                "hybrid_threshold ({}) must not exceed accept_threshold ({})",
                self.hybrid_threshold, self.accept_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.min_confidence)
            || !(0.0..=1.0).contains(&self.max_confidence)
            || self.min_confidence >= self.max_confidence
        {
            return Err(Error::Config(format!(
                "confidence bounds invalid: min {} max {}",
                self.min_confidence, self.max_confidence
            )));
        }
        self.weights.validate()
    }
}

/// Points deducted from 10 per failed check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeductionWeights {
    /// Classification empty or a generic failure phrase
    pub invalid_classification: f32,
    /// Classification shorter than `min_classification_len`
    pub short_classification: f32,
    /// No new entities and no overlap with the rule baseline
    pub suspicious_entities: f32,
    /// More than `max_entities`
    pub excessive_entities: f32,
    /// Confidence outside the plausible band
    pub implausible_confidence: f32,
    /// Risk text missing, generic or too short
    pub unspecific_risk: f32,
    /// High-priority message without risk or action items
    pub missing_priority_fields: f32,
    /// Error sentinel in the category field
    pub category_sentinel: f32,
}

impl Default for DeductionWeights {
    fn default() -> Self {
        Self {
            invalid_classification: 3.0,
            short_classification: 1.5,
            suspicious_entities: 1.5,
            excessive_entities: 1.0,
            implausible_confidence: 3.0,
            unspecific_risk: 3.5,
            missing_priority_fields: 4.5,
            category_sentinel: 4.0,
        }
    }
}

impl DeductionWeights {
    fn validate(&self) -> Result<()> {
        let all = [
            self.invalid_classification,
            self.short_classification,
            self.suspicious_entities,
            self.excessive_entities,
            self.implausible_confidence,
            self.unspecific_risk,
            self.missing_priority_fields,
            self.category_sentinel,
        ];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::Config("deduction weights must be non-negative".to_string()));
        }
        Ok(())
    }
}

/// `[pipeline.backoff]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Model-call attempts per phase (first try included)
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl BackoffConfig {
    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("backoff.max_attempts must be at least 1".to_string()));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::Config(format!(
                "backoff.multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::Config("backoff.max_delay_ms below base_delay_ms".to_string()));
        }
        Ok(())
    }
}

/// `[pipeline.rate]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// Calls faster than this are throttled
    pub floor_ms: u64,
    /// Minimum spacing between consecutive requests of one worker
    pub min_spacing_ms: u64,
    /// Optional ceiling across all workers
    pub max_requests_per_minute: Option<u32>,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            floor_ms: 15_000,
            min_spacing_ms: 15_000,
            max_requests_per_minute: None,
        }
    }
}

impl RateConfig {
    fn validate(&self) -> Result<()> {
        if self.max_requests_per_minute == Some(0) {
            return Err(Error::Config("rate.max_requests_per_minute must be positive".to_string()));
        }
        Ok(())
    }
}

/// `[inference]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Per-call timeout (independent of shutdown)
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            max_tokens: 1024,
            temperature: 0.2,
            timeout_secs: 120,
        }
    }
}

impl InferenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::Config("inference.endpoint must not be empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config("inference.timeout_secs must be at least 1".to_string()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::Config(format!(
                "inference.temperature must be within 0.0-2.0, got {}",
                self.temperature
            )));
        }
        Ok(())
    }
}

/// `[database]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Total time spent retrying "database is locked"
    pub max_lock_wait_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_lock_wait_ms: 5000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ChainflowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.completeness_threshold, 0.70);
        assert_eq!(config.pipeline.quality.accept_threshold, 6.0);
        assert_eq!(config.pipeline.quality.hybrid_threshold, 4.0);
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut config = ChainflowConfig::default();
        config.pipeline.completeness_threshold = 1.5;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_inverted_quality_thresholds_rejected() {
        let mut config = ChainflowConfig::default();
        config.pipeline.quality.hybrid_threshold = 7.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = ChainflowConfig::default();
        config.pipeline.workers = 0;
        assert!(config.validate().is_err());
        config.pipeline.workers = MAX_WORKERS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_multiplier_below_one_rejected() {
        let mut config = ChainflowConfig::default();
        config.pipeline.backoff.multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: ChainflowConfig = toml::from_str(
            r#"
            [pipeline]
            workers = 3
            completeness_threshold = 0.8

            [pipeline.quality]
            accept_threshold = 7.0
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline.workers, 3);
        assert_eq!(config.pipeline.completeness_threshold, 0.8);
        assert_eq!(config.pipeline.quality.accept_threshold, 7.0);
        assert_eq!(config.pipeline.quality.hybrid_threshold, 4.0);
        assert_eq!(config.pipeline.backoff.max_attempts, 3);
        assert!(config.validate().is_ok());
    }
}
