//! Simulated quote source with a local cache.
//!
//! Cache hits answer immediately. Misses pay the configured fetch latency and
//! may hit injected faults: every `rate_limit_every`-th fresh fetch is
//! rate limited and every `fail_every`-th one times out.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use quotebatch_core::{FetchError, Sleeper, Sourced};

/// Last price of one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub as_of: DateTime<Utc>,
}

/// Behaviour of the simulated upstream.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Share of symbols already in the local cache before the run.
    pub cache_ratio: f64,
    pub fetch_latency: Duration,
    pub rate_limit_every: Option<u32>,
    pub fail_every: Option<u32>,
    pub seed: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            cache_ratio: 0.5,
            fetch_latency: Duration::from_millis(150),
            rate_limit_every: None,
            fail_every: None,
            seed: 42,
        }
    }
}

impl SourceSettings {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.cache_ratio) {
            bail!("cache ratio must be within 0.0..=1.0, got {}", self.cache_ratio);
        }
        Ok(())
    }
}

pub struct SimulatedQuotes {
    settings: SourceSettings,
    cache: HashMap<String, Quote>,
    rng: StdRng,
    sleeper: Arc<dyn Sleeper>,
    fresh_fetches: u32,
}

impl SimulatedQuotes {
    pub fn new(settings: SourceSettings, sleeper: Arc<dyn Sleeper>) -> Self {
        let rng = StdRng::seed_from_u64(settings.seed);
        Self {
            settings,
            cache: HashMap::new(),
            rng,
            sleeper,
            fresh_fetches: 0,
        }
    }

    /// Pre-populate the cache with roughly `cache_ratio` of `symbols`.
    pub fn warm(&mut self, symbols: &[String]) {
        let ratio = if self.settings.cache_ratio.is_nan() {
            0.0
        } else {
            self.settings.cache_ratio.clamp(0.0, 1.0)
        };
        for symbol in symbols {
            if self.rng.gen_bool(ratio) {
                let quote = self.synthesize(symbol);
                self.cache.insert(symbol.clone(), quote);
            }
        }
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    pub fn fresh_fetches(&self) -> u32 {
        self.fresh_fetches
    }

    pub fn fetch(&mut self, symbol: &str) -> Result<Sourced<Quote>, FetchError> {
        if let Some(quote) = self.cache.get(symbol) {
            return Ok(Sourced::cached(quote.clone()));
        }
        if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
            return Err(FetchError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }

        self.fresh_fetches += 1;
        if !self.settings.fetch_latency.is_zero() {
            self.sleeper.sleep(self.settings.fetch_latency);
        }
        if hits(self.settings.rate_limit_every, self.fresh_fetches) {
            return Err(FetchError::RateLimited { retry_after_secs: 1 });
        }
        if hits(self.settings.fail_every, self.fresh_fetches) {
            return Err(FetchError::Timeout {
                elapsed_ms: self.settings.fetch_latency.as_millis() as u64,
            });
        }

        let quote = self.synthesize(symbol);
        self.cache.insert(symbol.to_string(), quote.clone());
        Ok(Sourced::fresh(quote))
    }

    fn synthesize(&mut self, symbol: &str) -> Quote {
        let price: f64 = self.rng.gen_range(5.0..500.0);
        Quote {
            symbol: symbol.to_string(),
            price: (price * 100.0).round() / 100.0,
            as_of: Utc::now(),
        }
    }
}

fn hits(every: Option<u32>, count: u32) -> bool {
    matches!(every, Some(n) if n > 0 && count % n == 0)
}
