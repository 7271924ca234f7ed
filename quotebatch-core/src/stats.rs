//! Run-level statistics folded from batch records.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::breaker::BreakerSnapshot;
use crate::record::{BatchRecord, BatchStatus};

/// Cumulative counters across every batch an engine has processed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStatistics {
    pub runs: u64,
    pub total_batches: u64,
    pub completed_batches: u64,
    pub failed_batches: u64,
    pub rate_limited_batches: u64,
    /// Batches refused by the circuit breaker (also counted as rate limited).
    pub skipped_batches: u64,
    pub interrupted_batches: u64,
    pub total_items: u64,
    pub success_items: u64,
    pub error_items: u64,
    pub rate_limited_items: u64,
    pub total_attempts: u64,
    pub cache_hits: u64,
    pub fresh_calls: u64,
    pub average_item_latency_ms: f64,
    pub total_elapsed_secs: f64,
    pub breaker: Option<BreakerSnapshot>,
    pub config_fingerprint: Option<String>,
}

impl RunStatistics {
    /// Share of batches that completed, 0.0 when nothing ran.
    pub fn completion_rate(&self) -> f64 {
        ratio(self.completed_batches, self.total_batches)
    }

    pub fn success_rate(&self) -> f64 {
        ratio(self.success_items, self.total_items)
    }

    /// Cache hit rate over smart batches, if any were processed.
    pub fn cache_hit_rate(&self) -> Option<f64> {
        let observed = self.cache_hits + self.fresh_calls;
        (observed > 0).then(|| ratio(self.cache_hits, observed))
    }

    /// Multi-line human-readable report.
    pub fn summary(&self) -> String {
        let mut report = format!(
            "Runs: {}  Batches: {} (completed {}, failed {}, rate-limited {}, skipped {}, interrupted {})\n",
            self.runs,
            self.total_batches,
            self.completed_batches,
            self.failed_batches,
            self.rate_limited_batches,
            self.skipped_batches,
            self.interrupted_batches,
        );
        report.push_str(&format!(
            "Items: {}  success {} ({:.1}%), error {} ({:.1}%), rate-limited {} ({:.1}%)\n",
            self.total_items,
            self.success_items,
            100.0 * ratio(self.success_items, self.total_items),
            self.error_items,
            100.0 * ratio(self.error_items, self.total_items),
            self.rate_limited_items,
            100.0 * ratio(self.rate_limited_items, self.total_items),
        ));
        report.push_str(&format!(
            "Attempts: {}  Avg item latency: {:.1} ms  Elapsed: {:.2}s\n",
            self.total_attempts, self.average_item_latency_ms, self.total_elapsed_secs,
        ));
        if let Some(rate) = self.cache_hit_rate() {
            report.push_str(&format!(
                "Cache: {} hits, {} fresh ({:.1}% hit rate)\n",
                self.cache_hits,
                self.fresh_calls,
                100.0 * rate,
            ));
        }
        if let Some(breaker) = &self.breaker {
            let state = if breaker.is_open {
                format!("OPEN ({:.1}s cool-down left)", breaker.remaining_cooldown_secs)
            } else {
                "closed".to_string()
            };
            report.push_str(&format!(
                "Circuit breaker: {}  failures {}/{}\n",
                state, breaker.consecutive_failures, breaker.failure_threshold,
            ));
        }
        if let Some(fingerprint) = &self.config_fingerprint {
            let short: String = fingerprint.chars().take(12).collect();
            report.push_str(&format!("Config: {}\n", short));
        }
        report
    }
}

impl fmt::Display for RunStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Folds batch records into [`RunStatistics`]. Never mutates the records.
#[derive(Debug, Default)]
pub struct Aggregator {
    stats: RunStatistics,
    processed_items: u64,
    item_latency: Duration,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch<T, R>(&mut self, record: &BatchRecord<T, R>) {
        let stats = &mut self.stats;
        stats.total_batches += 1;
        match record.status {
            BatchStatus::Completed => stats.completed_batches += 1,
            BatchStatus::Failed => stats.failed_batches += 1,
            BatchStatus::RateLimited => stats.rate_limited_batches += 1,
        }
        if record.skipped {
            stats.skipped_batches += 1;
        }
        if record.interrupted {
            stats.interrupted_batches += 1;
        }
        stats.total_items += record.len() as u64;
        stats.success_items += record.success_count as u64;
        stats.error_items += record.error_count as u64;
        stats.rate_limited_items += record.rate_limited_count as u64;
        stats.total_attempts += record.total_attempts();
        if let Some(cache) = &record.cache {
            stats.cache_hits += cache.cache_hits as u64;
            stats.fresh_calls += cache.fresh_calls as u64;
        }

        for outcome in record.outcomes.iter().filter(|o| o.attempts > 0) {
            self.processed_items += 1;
            self.item_latency = self.item_latency.saturating_add(outcome.elapsed);
        }
        stats.average_item_latency_ms = if self.processed_items == 0 {
            0.0
        } else {
            self.item_latency.as_secs_f64() * 1000.0 / self.processed_items as f64
        };
    }

    /// Mark the end of a run and add its wall time.
    pub fn close_run(&mut self, elapsed: Duration) {
        self.stats.runs += 1;
        self.stats.total_elapsed_secs += elapsed.as_secs_f64();
    }

    /// Fold a whole run produced elsewhere. Wall time is the sum of batch
    /// processing time and the pauses between batches.
    pub fn record_run<T, R>(&mut self, records: &[BatchRecord<T, R>]) {
        let mut elapsed = Duration::ZERO;
        for record in records {
            self.record_batch(record);
            elapsed = elapsed
                .saturating_add(record.elapsed)
                .saturating_add(record.delay_after);
        }
        self.close_run(elapsed);
    }

    pub fn snapshot(&self) -> RunStatistics {
        self.stats.clone()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchThresholds;
    use crate::executor::{ItemOutcome, ItemStatus};
    use crate::origin::DataOrigin;
    use crate::record::CacheSummary;
    use chrono::Utc;

    fn outcome(status: ItemStatus, ms: u64) -> ItemOutcome<u32, u32> {
        ItemOutcome {
            index: 0,
            item: 0,
            status,
            value: None,
            error: None,
            attempts: 1,
            elapsed: Duration::from_millis(ms),
            origin: DataOrigin::Fresh,
        }
    }

    fn record(outcomes: Vec<ItemOutcome<u32, u32>>) -> BatchRecord<u32, u32> {
        BatchRecord::from_outcomes(
            "run-1".into(),
            0,
            outcomes,
            Utc::now(),
            Duration::from_millis(100),
            &BatchThresholds::default(),
        )
    }

    #[test]
    fn empty_statistics() {
        let stats = Aggregator::new().snapshot();
        assert_eq!(stats.total_batches, 0);
        assert_eq!(stats.completion_rate(), 0.0);
        assert_eq!(stats.cache_hit_rate(), None);
        assert!(stats.summary().contains("Batches: 0"));
    }

    #[test]
    fn folds_batch_counts() {
        let mut agg = Aggregator::new();
        agg.record_batch(&record(vec![
            outcome(ItemStatus::Success, 10),
            outcome(ItemStatus::Success, 30),
        ]));
        agg.record_batch(&record(vec![
            outcome(ItemStatus::RateLimited, 20),
            outcome(ItemStatus::RateLimited, 20),
        ]));
        agg.record_batch(&BatchRecord::<u32, u32>::skipped("run-3".into(), 2, 4, vec![1, 2]));
        agg.close_run(Duration::from_secs(3));

        let stats = agg.snapshot();
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.total_batches, 3);
        assert_eq!(stats.completed_batches, 1);
        assert_eq!(stats.rate_limited_batches, 2);
        assert_eq!(stats.skipped_batches, 1);
        assert_eq!(stats.total_items, 6);
        assert_eq!(stats.success_items, 2);
        assert_eq!(stats.rate_limited_items, 4);
        assert_eq!(stats.total_attempts, 4);
        // Skipped items do not dilute latency.
        assert_eq!(stats.average_item_latency_ms, 20.0);
        assert_eq!(stats.total_elapsed_secs, 3.0);
    }

    #[test]
    fn record_run_counts_one_run() {
        let mut agg = Aggregator::new();
        let mut first = record(vec![outcome(ItemStatus::Success, 5)]);
        first.delay_after = Duration::from_secs(2);
        let second = record(vec![outcome(ItemStatus::Error, 5)]);
        agg.record_run(&[first, second]);
        let stats = agg.snapshot();
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.total_batches, 2);
        assert!((stats.total_elapsed_secs - 2.2).abs() < 1e-9);
    }

    #[test]
    fn cache_counts_and_summary() {
        let mut agg = Aggregator::new();
        let mut smart = record(vec![outcome(ItemStatus::Success, 1)]);
        smart.cache = Some(CacheSummary {
            cache_hits: 3,
            fresh_calls: 1,
            cache_hit_rate: 0.75,
            items_per_second: 10.0,
        });
        agg.record_batch(&smart);
        let mut stats = agg.snapshot();
        assert_eq!(stats.cache_hit_rate(), Some(0.75));
        stats.config_fingerprint = Some("abcdef0123456789".into());
        let text = stats.to_string();
        assert!(text.contains("75.0% hit rate"));
        assert!(text.contains("Config: abcdef012345"));
    }

    #[test]
    fn reset_clears_everything() {
        let mut agg = Aggregator::new();
        agg.record_batch(&record(vec![outcome(ItemStatus::Success, 5)]));
        agg.reset();
        assert_eq!(agg.snapshot(), RunStatistics::default());
    }
}
