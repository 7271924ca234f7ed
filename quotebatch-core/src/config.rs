//! Engine configuration.
//!
//! A `BatchConfig` is built once per engine and never changes afterwards.
//! Durations are stored as seconds (`f64`) so TOML files stay readable;
//! accessor methods hand out `Duration`s.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors from loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config TOML: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Shares of a batch that decide its status. Comparisons are strict `>`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchThresholds {
    /// Batch is `RateLimited` when rate-limited items exceed this share.
    pub rate_limited_share: f64,
    /// Batch is `Failed` when error plus rate-limited items exceed this share.
    pub failed_share: f64,
}

impl Default for BatchThresholds {
    fn default() -> Self {
        Self {
            rate_limited_share: 0.5,
            failed_share: 0.8,
        }
    }
}

/// Tunables for the cache-aware (smart) variant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SmartThresholds {
    /// Successful calls faster than this are taken to be cache hits.
    pub fast_ms: u64,
    /// Successful calls slower than this are taken to be fresh fetches.
    pub slow_ms: u64,
    /// Cached run length after which the next fresh item gets `streak_delay_secs`.
    pub cached_streak: usize,
    pub streak_delay_secs: f64,
    /// No inter-batch delay above this cache hit rate.
    pub skip_share: f64,
    /// Reduced inter-batch delay above this cache hit rate.
    pub reduce_share: f64,
    /// Multiplier applied to `delay_per_batch` in the reduced band.
    pub reduce_factor: f64,
    /// A batch above this cache hit rate counts towards the cache-heavy streak.
    pub cache_heavy_share: f64,
    /// Consecutive cache-heavy batches after which inter-batch delay drops to zero.
    pub cache_heavy_batches: u32,
}

impl Default for SmartThresholds {
    fn default() -> Self {
        Self {
            fast_ms: 100,
            slow_ms: 1000,
            cached_streak: 5,
            streak_delay_secs: 0.1,
            skip_share: 0.8,
            reduce_share: 0.5,
            reduce_factor: 0.3,
            cache_heavy_share: 0.7,
            cache_heavy_batches: 3,
        }
    }
}

impl SmartThresholds {
    pub fn fast(&self) -> Duration {
        Duration::from_millis(self.fast_ms)
    }

    pub fn slow(&self) -> Duration {
        Duration::from_millis(self.slow_ms)
    }

    pub fn streak_delay(&self) -> Duration {
        secs(self.streak_delay_secs)
    }
}

/// Configuration for one batch engine instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    /// Items per batch. The last batch may be shorter.
    pub batch_size: usize,
    /// Pause between two items of the same batch.
    pub delay_per_item_secs: f64,
    /// Pause between two batches.
    pub delay_per_batch_secs: f64,
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Growth factor of the transient-error backoff.
    pub backoff_multiplier: f64,
    /// Circuit breaker cool-down, also the base of the pause after a
    /// batch that saw rate limiting.
    pub rate_limit_cooldown_secs: f64,
    /// Base of the sleep before retrying a rate-limited item.
    pub rate_limit_delay_secs: f64,
    /// Consecutive failed batches that open the circuit breaker.
    pub circuit_breaker_threshold: u32,
    /// Seeds the backoff jitter. `None` draws from OS entropy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_seed: Option<u64>,
    pub thresholds: BatchThresholds,
    pub smart: SmartThresholds,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            delay_per_item_secs: 0.5,
            delay_per_batch_secs: 2.0,
            max_retries: 2,
            backoff_multiplier: 2.0,
            rate_limit_cooldown_secs: 60.0,
            rate_limit_delay_secs: 5.0,
            circuit_breaker_threshold: 3,
            jitter_seed: None,
            thresholds: BatchThresholds::default(),
            smart: SmartThresholds::default(),
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from a TOML string. Missing keys take their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Render the config as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Deterministic BLAKE3 hash of the configuration.
    ///
    /// Two engines built from equal configs report the same fingerprint.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&json).to_hex().to_string()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be at least 1"));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(invalid("circuit_breaker_threshold", "must be at least 1"));
        }
        for (field, value) in [
            ("delay_per_item_secs", self.delay_per_item_secs),
            ("delay_per_batch_secs", self.delay_per_batch_secs),
            ("rate_limit_cooldown_secs", self.rate_limit_cooldown_secs),
            ("rate_limit_delay_secs", self.rate_limit_delay_secs),
            ("smart.streak_delay_secs", self.smart.streak_delay_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(field, format!("must be a non-negative number, got {value}")));
            }
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(invalid(
                "backoff_multiplier",
                format!("must be >= 1.0, got {}", self.backoff_multiplier),
            ));
        }
        for (field, value) in [
            ("thresholds.rate_limited_share", self.thresholds.rate_limited_share),
            ("thresholds.failed_share", self.thresholds.failed_share),
            ("smart.skip_share", self.smart.skip_share),
            ("smart.reduce_share", self.smart.reduce_share),
            ("smart.reduce_factor", self.smart.reduce_factor),
            ("smart.cache_heavy_share", self.smart.cache_heavy_share),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(field, format!("must be within [0, 1], got {value}")));
            }
        }
        if self.smart.fast_ms > self.smart.slow_ms {
            return Err(invalid(
                "smart.fast_ms",
                format!("must not exceed smart.slow_ms ({})", self.smart.slow_ms),
            ));
        }
        Ok(())
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_delay_per_item(mut self, delay: Duration) -> Self {
        self.delay_per_item_secs = delay.as_secs_f64();
        self
    }

    pub fn with_delay_per_batch(mut self, delay: Duration) -> Self {
        self.delay_per_batch_secs = delay.as_secs_f64();
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_rate_limit_cooldown(mut self, cooldown: Duration) -> Self {
        self.rate_limit_cooldown_secs = cooldown.as_secs_f64();
        self
    }

    pub fn with_rate_limit_delay(mut self, delay: Duration) -> Self {
        self.rate_limit_delay_secs = delay.as_secs_f64();
        self
    }

    pub fn with_circuit_breaker_threshold(mut self, threshold: u32) -> Self {
        self.circuit_breaker_threshold = threshold;
        self
    }

    pub fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = Some(seed);
        self
    }

    pub fn with_thresholds(mut self, thresholds: BatchThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_smart(mut self, smart: SmartThresholds) -> Self {
        self.smart = smart;
        self
    }

    pub fn delay_per_item(&self) -> Duration {
        secs(self.delay_per_item_secs)
    }

    pub fn delay_per_batch(&self) -> Duration {
        secs(self.delay_per_batch_secs)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        secs(self.rate_limit_cooldown_secs)
    }

    pub fn rate_limit_delay(&self) -> Duration {
        secs(self.rate_limit_delay_secs)
    }

    /// Pause after a batch in which `rate_limited_share` of the processed
    /// items were rate limited: the cool-down scaled by that share, never
    /// shorter than the regular inter-batch delay.
    pub fn rate_limited_batch_delay(&self, rate_limited_share: f64) -> Duration {
        let scaled = secs(self.rate_limit_cooldown_secs * rate_limited_share.clamp(0.0, 1.0));
        scaled.max(self.delay_per_batch())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Seconds to `Duration`. Negative values and NaN become zero; values past
/// the `Duration` range saturate to `Duration::MAX`.
pub(crate) fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}
