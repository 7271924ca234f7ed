//! Item executor: one processing call with bounded retries.
//!
//! Retry policy per failure class:
//! - rate limited: sleep `rate_limit_delay * attempt`, retry; `RateLimited` once exhausted
//! - transient: sleep `delay_per_item * backoff^(attempt - 1)` with ±50% jitter,
//!   retry; `Error` once exhausted
//! - permanent: `Error` immediately
//!
//! Only the final attempt is recorded; `attempts` says how many were made.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::classify::{Classify, ErrorClass};
use crate::config::BatchConfig;
use crate::origin::DataOrigin;
use crate::sleep::Sleeper;

/// Final status of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    Success,
    Error,
    RateLimited,
}

/// Message recorded for items of a batch skipped by the circuit breaker.
pub const BREAKER_SKIP_MESSAGE: &str = "skipped: circuit breaker open";

/// Result of processing one item.
#[derive(Debug, Clone, Serialize)]
pub struct ItemOutcome<T, R> {
    /// Position of the item in the run's input.
    pub index: usize,
    pub item: T,
    pub status: ItemStatus,
    /// Present on `Success`.
    pub value: Option<R>,
    /// Display text of the last error, or the skip reason.
    pub error: Option<String>,
    /// Processing calls made. Zero for skipped items.
    pub attempts: u32,
    /// Wall time spent on the item, including retry pauses.
    pub elapsed: Duration,
    pub origin: DataOrigin,
}

impl<T, R> ItemOutcome<T, R> {
    /// Outcome for an item whose batch was never attempted.
    pub fn skipped(index: usize, item: T) -> Self {
        Self {
            index,
            item,
            status: ItemStatus::RateLimited,
            value: None,
            error: Some(BREAKER_SKIP_MESSAGE.to_string()),
            attempts: 0,
            elapsed: Duration::ZERO,
            origin: DataOrigin::Unknown,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ItemStatus::Success
    }
}

/// Runs a processing function against single items.
///
/// Borrows the engine's configuration, jitter RNG, sleeper and cancellation
/// token for the duration of a batch.
pub struct ItemExecutor<'a> {
    config: &'a BatchConfig,
    sleeper: &'a dyn Sleeper,
    rng: &'a mut StdRng,
    cancel: &'a CancelToken,
}

impl<'a> ItemExecutor<'a> {
    pub fn new(
        config: &'a BatchConfig,
        sleeper: &'a dyn Sleeper,
        rng: &'a mut StdRng,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            config,
            sleeper,
            rng,
            cancel,
        }
    }

    /// Process `item`, retrying as the failure class allows.
    ///
    /// A cancellation seen before a retry pause ends the item with its
    /// current failure instead of retrying.
    pub fn execute<T, R, E, F>(&mut self, index: usize, item: T, process: &mut F) -> ItemOutcome<T, R>
    where
        F: FnMut(&T) -> Result<R, E>,
        E: Classify,
    {
        let started = Instant::now();
        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let err = match process(&item) {
                Ok(value) => {
                    return ItemOutcome {
                        index,
                        item,
                        status: ItemStatus::Success,
                        value: Some(value),
                        error: None,
                        attempts,
                        elapsed: started.elapsed(),
                        origin: DataOrigin::Unknown,
                    };
                }
                Err(err) => err,
            };

            let class = err.classify();
            let message = err.to_string();
            let exhausted = attempts >= max_attempts;
            let final_status = match class {
                ErrorClass::RateLimited => ItemStatus::RateLimited,
                ErrorClass::Transient | ErrorClass::Permanent => ItemStatus::Error,
            };

            if class == ErrorClass::Permanent || exhausted || self.cancel.is_cancelled() {
                if final_status == ItemStatus::RateLimited {
                    warn!(index, attempts, error = %message, "item rate limited");
                } else {
                    debug!(index, attempts, ?class, error = %message, "item failed");
                }
                return ItemOutcome {
                    index,
                    item,
                    status: final_status,
                    value: None,
                    error: Some(message),
                    attempts,
                    elapsed: started.elapsed(),
                    origin: DataOrigin::Unknown,
                };
            }

            let pause = match class {
                ErrorClass::RateLimited => self.rate_limit_pause(attempts),
                _ => self.transient_backoff(attempts - 1),
            };
            debug!(
                index,
                attempt = attempts,
                ?class,
                pause_ms = pause.as_millis() as u64,
                error = %message,
                "retrying item"
            );
            if !pause.is_zero() {
                self.sleeper.sleep(pause);
            }
        }
    }

    /// Linear pause before retry number `attempt` of a rate-limited item.
    fn rate_limit_pause(&self, attempt: u32) -> Duration {
        self.config.rate_limit_delay().saturating_mul(attempt)
    }

    /// Jittered exponential pause after the failed attempt with 0-based
    /// index `attempt_index`.
    fn transient_backoff(&mut self, attempt_index: u32) -> Duration {
        let exponent = i32::try_from(attempt_index).unwrap_or(i32::MAX);
        let base = self.config.delay_per_item_secs * self.config.backoff_multiplier.powi(exponent);
        let jitter: f64 = self.rng.gen_range(0.5..=1.5);
        crate::config::secs(base * jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::FetchError;
    use crate::sleep::RecordingSleeper;
    use rand::SeedableRng;

    fn config() -> BatchConfig {
        BatchConfig::new()
            .with_max_retries(2)
            .with_delay_per_item(Duration::from_millis(100))
            .with_rate_limit_delay(Duration::from_secs(5))
    }

    fn run<F>(config: &BatchConfig, sleeper: &RecordingSleeper, mut f: F) -> ItemOutcome<&'static str, u32>
    where
        F: FnMut(&&'static str) -> Result<u32, String>,
    {
        let mut rng = StdRng::seed_from_u64(7);
        let cancel = CancelToken::new();
        let mut exec = ItemExecutor::new(config, sleeper, &mut rng, &cancel);
        exec.execute(0, "AAPL", &mut f)
    }

    #[test]
    fn success_on_first_attempt() {
        let sleeper = RecordingSleeper::new();
        let out = run(&config(), &sleeper, |_| Ok(42));
        assert_eq!(out.status, ItemStatus::Success);
        assert_eq!(out.value, Some(42));
        assert_eq!(out.attempts, 1);
        assert!(out.error.is_none());
        assert_eq!(sleeper.count(), 0);
    }

    #[test]
    fn rate_limit_exhaustion_sleeps_linearly() {
        let sleeper = RecordingSleeper::new();
        let out = run(&config(), &sleeper, |_| Err("Rate limit exceeded".to_string()));
        assert_eq!(out.status, ItemStatus::RateLimited);
        assert_eq!(out.attempts, 3);
        assert_eq!(out.error.as_deref(), Some("Rate limit exceeded"));
        assert_eq!(
            sleeper.sleeps(),
            vec![Duration::from_secs(5), Duration::from_secs(10)]
        );
    }

    #[test]
    fn transient_recovers_with_jittered_backoff() {
        let sleeper = RecordingSleeper::new();
        let mut calls = 0;
        let out = run(&config(), &sleeper, |_| {
            calls += 1;
            if calls < 3 {
                Err("connection reset".to_string())
            } else {
                Ok(1)
            }
        });
        assert_eq!(out.status, ItemStatus::Success);
        assert_eq!(out.attempts, 3);
        let sleeps = sleeper.sleeps();
        assert_eq!(sleeps.len(), 2);
        // 100ms * 2^0 and 100ms * 2^1, each within ±50%.
        assert!(sleeps[0] >= Duration::from_millis(50) && sleeps[0] <= Duration::from_millis(150));
        assert!(sleeps[1] >= Duration::from_millis(100) && sleeps[1] <= Duration::from_millis(300));
    }

    #[test]
    fn transient_exhaustion_is_error() {
        let sleeper = RecordingSleeper::new();
        let out = run(&config(), &sleeper, |_| Err("network unreachable".to_string()));
        assert_eq!(out.status, ItemStatus::Error);
        assert_eq!(out.attempts, 3);
    }

    #[test]
    fn overflowing_backoff_saturates_instead_of_vanishing() {
        let sleeper = RecordingSleeper::new();
        let config = config().with_max_retries(1100);
        let out = run(&config, &sleeper, |_| Err("connection reset".to_string()));
        assert_eq!(out.attempts, 1101);
        let sleeps = sleeper.sleeps();
        assert_eq!(sleeps.len(), 1100);
        assert!(sleeps.iter().all(|d| !d.is_zero()));
        assert_eq!(sleeps.last(), Some(&Duration::MAX));
        assert_eq!(sleeper.total(), Duration::MAX);
    }

    #[test]
    fn permanent_error_is_not_retried() {
        let sleeper = RecordingSleeper::new();
        let out = run(&config(), &sleeper, |_| Err("symbol delisted".to_string()));
        assert_eq!(out.status, ItemStatus::Error);
        assert_eq!(out.attempts, 1);
        assert_eq!(sleeper.count(), 0);
    }

    #[test]
    fn zero_retries_means_single_attempt() {
        let sleeper = RecordingSleeper::new();
        let out = run(&config().with_max_retries(0), &sleeper, |_| {
            Err("429 Too Many Requests".to_string())
        });
        assert_eq!(out.status, ItemStatus::RateLimited);
        assert_eq!(out.attempts, 1);
        assert_eq!(sleeper.count(), 0);
    }

    #[test]
    fn typed_errors_skip_text_matching() {
        let config = config();
        let sleeper = RecordingSleeper::new();
        let mut rng = StdRng::seed_from_u64(1);
        let cancel = CancelToken::new();
        let mut exec = ItemExecutor::new(&config, &sleeper, &mut rng, &cancel);
        let mut process = |_: &&str| -> Result<u32, FetchError> {
            Err(FetchError::RateLimited { retry_after_secs: 1 })
        };
        let out = exec.execute(3, "MSFT", &mut process);
        assert_eq!(out.index, 3);
        assert_eq!(out.status, ItemStatus::RateLimited);
        assert_eq!(out.attempts, 3);
    }

    #[test]
    fn cancellation_stops_retries() {
        let config = config();
        let sleeper = RecordingSleeper::new();
        let mut rng = StdRng::seed_from_u64(1);
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let mut exec = ItemExecutor::new(&config, &sleeper, &mut rng, &cancel);
        let mut process = |_: &&str| -> Result<u32, String> {
            trigger.cancel();
            Err("timeout".to_string())
        };
        let out = exec.execute(0, "IBM", &mut process);
        assert_eq!(out.status, ItemStatus::Error);
        assert_eq!(out.attempts, 1);
        assert_eq!(sleeper.count(), 0);
    }

    #[test]
    fn same_seed_same_backoff() {
        let sleeper_a = RecordingSleeper::new();
        let sleeper_b = RecordingSleeper::new();
        run(&config(), &sleeper_a, |_| Err("timed out".to_string()));
        run(&config(), &sleeper_b, |_| Err("timed out".to_string()));
        assert_eq!(sleeper_a.sleeps(), sleeper_b.sleeps());
    }

    #[test]
    fn skipped_outcome_shape() {
        let out: ItemOutcome<&str, u32> = ItemOutcome::skipped(9, "TSLA");
        assert_eq!(out.status, ItemStatus::RateLimited);
        assert_eq!(out.attempts, 0);
        assert_eq!(out.elapsed, Duration::ZERO);
        assert_eq!(out.error.as_deref(), Some(BREAKER_SKIP_MESSAGE));
    }
}
