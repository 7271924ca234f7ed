//! Batch runner: partitions input, drives the item executor, consults the
//! circuit breaker and chooses the pauses between items and batches.
//!
//! Runs are strictly sequential. Every pause blocks the calling thread
//! through the engine's [`Sleeper`].

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::breaker::CircuitBreaker;
use crate::cancel::CancelToken;
use crate::classify::Classify;
use crate::config::{BatchConfig, ConfigError, SmartThresholds};
use crate::executor::{ItemExecutor, ItemOutcome};
use crate::origin::{infer_origin, DataOrigin, OriginHint};
use crate::record::{partition, BatchRecord, BatchStatus, CacheSummary};
use crate::sleep::{Sleeper, ThreadSleeper};
use crate::smart::{BatchDelayPolicy, ItemDelayPolicy};
use crate::stats::{Aggregator, RunStatistics};

type OriginFn<T, R> = fn(&ItemOutcome<T, R>, &SmartThresholds) -> DataOrigin;

/// Adaptive batch engine.
///
/// Owns the circuit breaker and the run statistics; both persist across
/// calls until [`reset_breaker`](Self::reset_breaker) or
/// [`reset_statistics`](Self::reset_statistics).
pub struct BatchEngine {
    config: BatchConfig,
    fingerprint: String,
    breaker: CircuitBreaker,
    stats: Aggregator,
    rng: StdRng,
    sleeper: Box<dyn Sleeper>,
    cancel: CancelToken,
}

impl BatchEngine {
    /// Build an engine. Rejects invalid configurations.
    pub fn new(config: BatchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let rng = match config.jitter_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            fingerprint: config.fingerprint(),
            breaker: CircuitBreaker::from_config(&config),
            stats: Aggregator::new(),
            rng,
            sleeper: Box::new(ThreadSleeper),
            cancel: CancelToken::new(),
            config,
        })
    }

    /// Replace the sleeper used for every pause.
    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    /// Share a cancellation token with the caller.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Process `items` in batches with fixed delays.
    ///
    /// Never fails: item and batch failures are reported in the records.
    pub fn process_batch<T, R, E, F>(
        &mut self,
        items: Vec<T>,
        process: F,
        name: &str,
    ) -> Vec<BatchRecord<T, R>>
    where
        F: FnMut(&T) -> Result<R, E>,
        E: Classify,
    {
        self.run(items, process, name, None)
    }

    /// Process `items` in batches, shrinking delays when results come from a cache.
    ///
    /// The cache-heavy batch streak starts at zero on every call. Only the
    /// circuit breaker and the statistics carry over between runs.
    pub fn process_batch_smart<T, R, E, F>(
        &mut self,
        items: Vec<T>,
        process: F,
        name: &str,
    ) -> Vec<BatchRecord<T, R>>
    where
        F: FnMut(&T) -> Result<R, E>,
        E: Classify,
        R: OriginHint,
    {
        self.run(items, process, name, Some(infer_origin::<T, R> as OriginFn<T, R>))
    }

    /// Close the breaker and clear its failure count.
    pub fn reset_breaker(&mut self) {
        self.breaker.reset();
        info!("circuit breaker reset");
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Cumulative statistics, with the current breaker state.
    pub fn statistics(&self) -> RunStatistics {
        let mut stats = self.stats.snapshot();
        stats.breaker = Some(self.breaker.snapshot());
        stats.config_fingerprint = Some(self.fingerprint.clone());
        stats
    }

    pub fn reset_statistics(&mut self) {
        self.stats.reset();
    }

    fn run<T, R, E, F>(
        &mut self,
        items: Vec<T>,
        mut process: F,
        name: &str,
        origin_of: Option<OriginFn<T, R>>,
    ) -> Vec<BatchRecord<T, R>>
    where
        F: FnMut(&T) -> Result<R, E>,
        E: Classify,
    {
        let run_started = Instant::now();
        let smart = origin_of.is_some();
        let item_count = items.len();
        let chunks = partition(items, self.config.batch_size);
        let batch_total = chunks.len();
        info!(
            run = name,
            items = item_count,
            batches = batch_total,
            batch_size = self.config.batch_size,
            smart,
            config = %self.fingerprint,
            "starting batch run"
        );

        let mut records = Vec::with_capacity(batch_total);
        let mut batch_delays = BatchDelayPolicy::new();
        let mut next_index = 0;

        for (batch_index, chunk) in chunks.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(run = name, completed = records.len(), "run cancelled");
                break;
            }
            let batch_id = format!("{}-{}", name, batch_index + 1);
            let first_index = next_index;
            next_index += chunk.len();

            if !self.breaker.should_attempt() {
                warn!(
                    batch = %batch_id,
                    items = chunk.len(),
                    cooldown_left_secs = self.breaker.remaining_cooldown().as_secs_f64(),
                    "circuit breaker open, skipping batch"
                );
                batch_delays.observe_skipped();
                let record = BatchRecord::skipped(batch_id, batch_index, first_index, chunk);
                self.stats.record_batch(&record);
                records.push(record);
                continue;
            }

            let mut record =
                self.run_batch(batch_id, batch_index, first_index, chunk, &mut process, origin_of);

            if !record.interrupted {
                self.report_to_breaker(&record);
            }

            let is_last = batch_index + 1 == batch_total;
            let delay = if record.interrupted {
                Duration::ZERO
            } else {
                let planned = match &record.cache {
                    Some(cache) => {
                        let (delay, reason) = batch_delays.next_delay(
                            cache,
                            record.rate_limited_share(),
                            &self.config,
                        );
                        debug!(batch = %record.batch_id, ?reason, delay_ms = delay.as_millis() as u64, "smart batch delay");
                        delay
                    }
                    None if record.rate_limited_count > 0 => {
                        self.config.rate_limited_batch_delay(record.rate_limited_share())
                    }
                    None => self.config.delay_per_batch(),
                };
                if is_last || self.cancel.is_cancelled() {
                    Duration::ZERO
                } else {
                    planned
                }
            };
            record.delay_after = delay;

            debug!(
                batch = %record.batch_id,
                status = ?record.status,
                success = record.success_count,
                errors = record.error_count,
                rate_limited = record.rate_limited_count,
                elapsed_ms = record.elapsed.as_millis() as u64,
                "batch finished"
            );
            self.stats.record_batch(&record);
            let interrupted = record.interrupted;
            records.push(record);
            if interrupted {
                info!(run = name, completed = records.len(), "run cancelled mid-batch");
                break;
            }
            self.pause(delay);
        }

        let elapsed = run_started.elapsed();
        self.stats.close_run(elapsed);
        let completed = records
            .iter()
            .filter(|r| r.status == BatchStatus::Completed)
            .count();
        info!(
            run = name,
            batches = records.len(),
            completed,
            elapsed_secs = elapsed.as_secs_f64(),
            breaker_open = self.breaker.is_open(),
            "batch run finished"
        );
        records
    }

    fn run_batch<T, R, E, F>(
        &mut self,
        batch_id: String,
        batch_index: usize,
        first_index: usize,
        chunk: Vec<T>,
        process: &mut F,
        origin_of: Option<OriginFn<T, R>>,
    ) -> BatchRecord<T, R>
    where
        F: FnMut(&T) -> Result<R, E>,
        E: Classify,
    {
        let started_at = Utc::now();
        let started = Instant::now();
        let len = chunk.len();
        let mut item_delays = ItemDelayPolicy::new();
        let mut outcomes = Vec::with_capacity(len);
        let mut interrupted = false;

        for (offset, item) in chunk.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                interrupted = true;
                break;
            }
            let mut outcome = ItemExecutor::new(
                &self.config,
                self.sleeper.as_ref(),
                &mut self.rng,
                &self.cancel,
            )
            .execute(first_index + offset, item, process);

            let delay = match origin_of {
                Some(origin_of) => {
                    outcome.origin = origin_of(&outcome, &self.config.smart);
                    item_delays.delay_after(outcome.origin, &self.config)
                }
                None => self.config.delay_per_item(),
            };
            outcomes.push(outcome);

            if offset + 1 < len && !self.pause(delay) {
                interrupted = true;
                break;
            }
        }

        let elapsed = started.elapsed();
        let mut record = BatchRecord::from_outcomes(
            batch_id,
            batch_index,
            outcomes,
            started_at,
            elapsed,
            &self.config.thresholds,
        );
        record.interrupted = interrupted;
        if origin_of.is_some() {
            record.cache = Some(CacheSummary::from_outcomes(&record.outcomes, elapsed));
        }
        record
    }

    fn report_to_breaker<T, R>(&mut self, record: &BatchRecord<T, R>) {
        if record.status.is_failure() {
            if self.breaker.record_failure() {
                warn!(
                    batch = %record.batch_id,
                    status = ?record.status,
                    consecutive_failures = self.breaker.consecutive_failures(),
                    cooldown_secs = self.config.rate_limit_cooldown_secs,
                    "circuit breaker opened"
                );
            }
        } else if self.breaker.record_success() {
            info!(batch = %record.batch_id, "circuit breaker closed");
        }
    }

    /// Sleep for `delay` unless cancelled. Returns `false` if cancellation
    /// was observed. Zero delays never reach the sleeper.
    fn pause(&self, delay: Duration) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if !delay.is_zero() {
            self.sleeper.sleep(delay);
        }
        true
    }
}

impl std::fmt::Debug for BatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEngine")
            .field("config", &self.config)
            .field("fingerprint", &self.fingerprint)
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}
