//! Configuration types for the acquisition pipeline.

use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;

use crate::error::ConfigError;

/// Adaptive delay and hard request budget for the rate governor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateConfig {
    /// Delay the governor starts with.
    pub initial_delay: Duration,

    /// Lowest delay clean fetches can decay to.
    pub floor_delay: Duration,

    /// Ceiling for backoff. Delay never exceeds this.
    pub max_delay: Duration,

    /// Multiplier applied on each detection-risk signal (> 1.0).
    pub backoff_factor: f64,

    /// Multiplier applied after `decay_after` clean outcomes (0.0 < f < 1.0).
    pub decay_factor: f64,

    /// Consecutive clean outcomes needed before the delay decays.
    pub decay_after: u32,

    /// Random extra wait, as a fraction of the current delay (0.0 = none).
    pub jitter: f64,

    /// Hard cap on requests per minute, independent of the adaptive delay.
    pub requests_per_minute: Option<NonZeroU32>,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            floor_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
            backoff_factor: 2.0,
            decay_factor: 0.75,
            decay_after: 3,
            jitter: 0.5,
            requests_per_minute: Some(nonzero!(20u32)),
        }
    }
}

impl RateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set floor, initial and max delay in one go.
    pub fn with_delays(mut self, floor: Duration, initial: Duration, max: Duration) -> Self {
        self.floor_delay = floor;
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_decay(mut self, factor: f64, after: u32) -> Self {
        self.decay_factor = factor;
        self.decay_after = after;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_requests_per_minute(mut self, rpm: Option<NonZeroU32>) -> Self {
        self.requests_per_minute = rpm;
        self
    }

    /// Check the bounds the governor relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.floor_delay > self.max_delay {
            return Err(ConfigError::InvertedBounds {
                floor: self.floor_delay,
                max: self.max_delay,
            });
        }
        if self.initial_delay < self.floor_delay || self.initial_delay > self.max_delay {
            return Err(ConfigError::InitialOutOfRange {
                initial: self.initial_delay,
                floor: self.floor_delay,
                max: self.max_delay,
            });
        }
        if !(self.backoff_factor > 1.0) {
            return Err(ConfigError::BackoffFactor(self.backoff_factor));
        }
        if !(self.decay_factor > 0.0 && self.decay_factor < 1.0) {
            return Err(ConfigError::DecayFactor(self.decay_factor));
        }
        if self.decay_after == 0 {
            return Err(ConfigError::DecayAfter);
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Jitter(self.jitter));
        }
        Ok(())
    }
}

/// Session manager tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Silent refresh attempts before giving up with `AuthExpired`.
    pub refresh_attempts: u32,

    /// Pause between refresh attempts.
    pub refresh_backoff: Duration,

    /// Persist session grants so later runs can resume them.
    pub persist: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_attempts: 2,
            refresh_backoff: Duration::from_secs(5),
            persist: true,
        }
    }
}

impl SessionConfig {
    pub fn with_refresh_attempts(mut self, attempts: u32) -> Self {
        self.refresh_attempts = attempts;
        self
    }

    pub fn with_refresh_backoff(mut self, backoff: Duration) -> Self {
        self.refresh_backoff = backoff;
        self
    }

    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }
}

/// Fetch-extract worker tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// How long to wait for the readiness predicate.
    pub ready_timeout: Duration,

    /// How often to re-read the DOM while waiting.
    pub poll_interval: Duration,

    /// Latency above which a fetch counts as a detection-risk signal.
    pub slow_threshold: Duration,

    /// Scroll/expand lazily-loaded sections before extraction.
    pub expand_sections: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            slow_threshold: Duration::from_secs(15),
            expand_sections: true,
        }
    }
}

impl FetchConfig {
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    pub fn with_expand_sections(mut self, expand: bool) -> Self {
        self.expand_sections = expand;
        self
    }
}

/// How per-chunk summaries are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Join chunk summaries in order.
    Concatenate,
    /// Re-summarize the joined chunk summaries, re-chunking as needed.
    #[default]
    Hierarchical,
}

/// Parameters passed through to the summarization model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model: String,

    /// Maximum input tokens accepted by one summarization call.
    pub token_budget: usize,

    /// System instructions for the call.
    pub instructions: String,

    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            token_budget: 2048,
            instructions: String::new(),
            temperature: 0.2,
        }
    }
}

impl ModelConfig {
    pub fn new(model: impl Into<String>, token_budget: usize) -> Self {
        Self {
            model: model.into(),
            token_budget,
            ..Default::default()
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Chunking summarizer tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkConfig {
    pub model: ModelConfig,
    pub merge: MergeStrategy,

    /// Re-summarization rounds allowed before giving up.
    pub max_merge_depth: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            merge: MergeStrategy::default(),
            max_merge_depth: 3,
        }
    }
}

impl ChunkConfig {
    pub fn new(model: ModelConfig) -> Self {
        Self {
            model,
            ..Default::default()
        }
    }

    pub fn with_merge(mut self, merge: MergeStrategy) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_max_merge_depth(mut self, depth: usize) -> Self {
        self.max_merge_depth = depth;
        self
    }

    pub fn token_budget(&self) -> usize {
        self.model.token_budget
    }
}

/// Orchestrator settings for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Targets processed in parallel.
    pub concurrency: usize,

    /// Fetch attempts per target, first attempt included.
    pub max_attempts: u32,

    /// Base delay between attempts of the same target (doubles each time).
    pub retry_delay: Duration,

    /// Upper bound for one attempt, counted from the granted rate slot.
    pub target_timeout: Duration,

    /// Re-process DONE entries.
    pub force_refresh: bool,

    /// Re-process FAILED entries.
    pub retry_failed: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            target_timeout: Duration::from_secs(180),
            force_refresh: false,
            retry_failed: false,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_target_timeout(mut self, timeout: Duration) -> Self {
        self.target_timeout = timeout;
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn retry_failed(mut self) -> Self {
        self.retry_failed = true;
        self
    }
}

/// Options passed through to the browser automation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserOptions {
    pub headless: bool,

    /// Per-navigation timeout enforced by the driver.
    pub nav_timeout: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            nav_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rate_config_is_valid() {
        assert!(RateConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rate_config_rejects_inverted_bounds() {
        let config = RateConfig::default().with_delays(
            Duration::from_secs(10),
            Duration::from_secs(10),
            Duration::from_secs(1),
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvertedBounds { .. })
        ));
    }

    #[test]
    fn test_rate_config_rejects_bad_factors() {
        assert_eq!(
            RateConfig::default().with_backoff_factor(1.0).validate(),
            Err(ConfigError::BackoffFactor(1.0))
        );
        assert_eq!(
            RateConfig::default().with_decay(1.5, 3).validate(),
            Err(ConfigError::DecayFactor(1.5))
        );
        assert_eq!(
            RateConfig::default().with_decay(0.5, 0).validate(),
            Err(ConfigError::DecayAfter)
        );
        assert_eq!(
            RateConfig::default().with_jitter(1.5).validate(),
            Err(ConfigError::Jitter(1.5))
        );
    }

    #[test]
    fn test_pipeline_config_clamps() {
        let config = PipelineConfig::new().with_concurrency(0).with_max_attempts(0);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.max_attempts, 1);
    }
}
