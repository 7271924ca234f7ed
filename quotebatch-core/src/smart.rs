//! Cache-aware delay policies for the smart variant.
//!
//! When results come out of a local cache the upstream is not being hit, so
//! the pauses that protect it can shrink or disappear. Fresh (and unknown)
//! results keep the configured pauses.

use std::time::Duration;

use crate::config::BatchConfig;
use crate::origin::DataOrigin;
use crate::record::CacheSummary;

/// Per-item pause within one batch.
#[derive(Debug, Default)]
pub struct ItemDelayPolicy {
    cached_streak: usize,
}

impl ItemDelayPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause to take after an item of the given origin.
    ///
    /// Cached items need none. A fresh item that ends a cached run longer
    /// than `smart.cached_streak` gets the short streak pause; other fresh
    /// items get `delay_per_item`.
    pub fn delay_after(&mut self, origin: DataOrigin, config: &BatchConfig) -> Duration {
        if origin.is_cached() {
            self.cached_streak += 1;
            return Duration::ZERO;
        }
        let delay = if self.cached_streak > config.smart.cached_streak {
            config.smart.streak_delay()
        } else {
            config.delay_per_item()
        };
        self.cached_streak = 0;
        delay
    }

    pub fn cached_streak(&self) -> usize {
        self.cached_streak
    }
}

/// Why the smart variant chose an inter-batch pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchDelayReason {
    RateLimited,
    CacheDominated,
    CacheHeavyStreak,
    MostlyCached,
    Regular,
}

/// Inter-batch pause across one smart run.
#[derive(Debug, Default)]
pub struct BatchDelayPolicy {
    cache_heavy_batches: u32,
}

impl BatchDelayPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a batch that never ran (breaker skip); it breaks the streak.
    pub fn observe_skipped(&mut self) {
        self.cache_heavy_batches = 0;
    }

    /// Choose the pause after a processed batch, updating the cache-heavy streak.
    ///
    /// Precedence: rate limiting, then hit rate above `skip_share`, then the
    /// cache-heavy streak, then the reduced band above `reduce_share`.
    pub fn next_delay(
        &mut self,
        summary: &CacheSummary,
        rate_limited_share: f64,
        config: &BatchConfig,
    ) -> (Duration, BatchDelayReason) {
        let smart = &config.smart;
        let rate = summary.cache_hit_rate;
        if rate > smart.cache_heavy_share {
            self.cache_heavy_batches = self.cache_heavy_batches.saturating_add(1);
        } else {
            self.cache_heavy_batches = 0;
        }

        if rate_limited_share > 0.0 {
            (
                config.rate_limited_batch_delay(rate_limited_share),
                BatchDelayReason::RateLimited,
            )
        } else if rate > smart.skip_share {
            (Duration::ZERO, BatchDelayReason::CacheDominated)
        } else if self.cache_heavy_batches >= smart.cache_heavy_batches {
            (Duration::ZERO, BatchDelayReason::CacheHeavyStreak)
        } else if rate > smart.reduce_share {
            (
                config.delay_per_batch().mul_f64(smart.reduce_factor),
                BatchDelayReason::MostlyCached,
            )
        } else {
            (config.delay_per_batch(), BatchDelayReason::Regular)
        }
    }

    pub fn cache_heavy_batches(&self) -> u32 {
        self.cache_heavy_batches
    }
}
