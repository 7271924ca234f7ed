//! Batch records and input partitioning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::BatchThresholds;
use crate::executor::{ItemOutcome, ItemStatus};

/// Status of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchStatus {
    Completed,
    Failed,
    RateLimited,
}

impl BatchStatus {
    /// Whether the circuit breaker counts this batch as a failure.
    pub fn is_failure(self) -> bool {
        !matches!(self, BatchStatus::Completed)
    }
}

/// Classify a batch from its item counts.
///
/// `RateLimited` when rate-limited items exceed `rate_limited_share`,
/// otherwise `Failed` when errors plus rate-limited items exceed
/// `failed_share`, otherwise `Completed`. Both comparisons are strict.
pub fn classify_batch(
    error_count: usize,
    rate_limited_count: usize,
    total: usize,
    thresholds: &BatchThresholds,
) -> BatchStatus {
    if total == 0 {
        return BatchStatus::Completed;
    }
    let n = total as f64;
    if rate_limited_count as f64 / n > thresholds.rate_limited_share {
        BatchStatus::RateLimited
    } else if (error_count + rate_limited_count) as f64 / n > thresholds.failed_share {
        BatchStatus::Failed
    } else {
        BatchStatus::Completed
    }
}

/// Cache accounting of a smart batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheSummary {
    pub cache_hits: usize,
    /// Processed items not classified as cached (fresh or unknown).
    pub fresh_calls: usize,
    pub cache_hit_rate: f64,
    pub items_per_second: f64,
}

impl CacheSummary {
    pub fn from_outcomes<T, R>(outcomes: &[ItemOutcome<T, R>], elapsed: Duration) -> Self {
        let processed = outcomes.iter().filter(|o| o.attempts > 0).count();
        let cache_hits = outcomes
            .iter()
            .filter(|o| o.attempts > 0 && o.origin.is_cached())
            .count();
        let cache_hit_rate = if processed == 0 {
            0.0
        } else {
            cache_hits as f64 / processed as f64
        };
        let secs = elapsed.as_secs_f64();
        let items_per_second = if secs > 0.0 {
            processed as f64 / secs
        } else {
            0.0
        };
        Self {
            cache_hits,
            fresh_calls: processed - cache_hits,
            cache_hit_rate,
            items_per_second,
        }
    }
}

/// Everything recorded about one batch. Immutable once the batch finishes.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRecord<T, R> {
    /// `"{run name}-{1-based batch number}"`.
    pub batch_id: String,
    pub batch_index: usize,
    pub status: BatchStatus,
    /// The circuit breaker was open; nothing was attempted.
    pub skipped: bool,
    /// Cancelled mid-batch; `outcomes` holds only the items that ran.
    pub interrupted: bool,
    pub outcomes: Vec<ItemOutcome<T, R>>,
    pub success_count: usize,
    pub error_count: usize,
    pub rate_limited_count: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Processing time, excluding the pause after the batch.
    pub elapsed: Duration,
    /// Pause taken after this batch (zero after the last one).
    pub delay_after: Duration,
    /// Smart variant only.
    pub cache: Option<CacheSummary>,
}

impl<T, R> BatchRecord<T, R> {
    /// Build a record from processed outcomes, counting and classifying them.
    pub fn from_outcomes(
        batch_id: String,
        batch_index: usize,
        outcomes: Vec<ItemOutcome<T, R>>,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        thresholds: &BatchThresholds,
    ) -> Self {
        let (mut success_count, mut error_count, mut rate_limited_count) = (0, 0, 0);
        for outcome in &outcomes {
            match outcome.status {
                ItemStatus::Success => success_count += 1,
                ItemStatus::Error => error_count += 1,
                ItemStatus::RateLimited => rate_limited_count += 1,
            }
        }
        let status = classify_batch(error_count, rate_limited_count, outcomes.len(), thresholds);
        Self {
            batch_id,
            batch_index,
            status,
            skipped: false,
            interrupted: false,
            outcomes,
            success_count,
            error_count,
            rate_limited_count,
            started_at,
            ended_at: Utc::now(),
            elapsed,
            delay_after: Duration::ZERO,
            cache: None,
        }
    }

    /// Record for a batch the circuit breaker refused: every item is
    /// rate limited with zero attempts.
    pub fn skipped(batch_id: String, batch_index: usize, first_index: usize, items: Vec<T>) -> Self {
        let now = Utc::now();
        let outcomes: Vec<_> = items
            .into_iter()
            .enumerate()
            .map(|(offset, item)| ItemOutcome::skipped(first_index + offset, item))
            .collect();
        Self {
            batch_id,
            batch_index,
            status: BatchStatus::RateLimited,
            skipped: true,
            interrupted: false,
            rate_limited_count: outcomes.len(),
            outcomes,
            success_count: 0,
            error_count: 0,
            started_at: now,
            ended_at: now,
            elapsed: Duration::ZERO,
            delay_after: Duration::ZERO,
            cache: None,
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Items the processing function actually ran on.
    pub fn processed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.attempts > 0).count()
    }

    pub fn total_attempts(&self) -> u64 {
        self.outcomes.iter().map(|o| u64::from(o.attempts)).sum()
    }

    /// Share of processed items that ended rate limited.
    pub fn rate_limited_share(&self) -> f64 {
        let processed = self.processed_count();
        if processed == 0 {
            0.0
        } else {
            self.rate_limited_count as f64 / processed as f64
        }
    }
}

/// Number of batches `len` items split into at `batch_size` per batch.
pub fn batch_count(len: usize, batch_size: usize) -> usize {
    len.div_ceil(batch_size.max(1))
}

/// Split `items` into consecutive chunks of `batch_size`, preserving order.
/// Only the last chunk may be shorter.
pub fn partition<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let size = batch_size.max(1);
    let mut chunks = Vec::with_capacity(batch_count(items.len(), size));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(size).collect());
    }
    chunks
}
