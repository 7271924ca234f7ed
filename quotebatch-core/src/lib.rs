//! Quotebatch Core: adaptive batch processing against a fragile, rate-limited upstream.
//!
//! This crate contains the engine:
//! - Configuration with TOML loading and a BLAKE3 fingerprint
//! - Item executor with per-class retry and jittered backoff
//! - Batch runner with a single engine-wide circuit breaker
//! - Smart variant that shrinks delays when results come from a cache
//! - Run statistics folded from batch records
//!
//! The engine is synchronous. All pauses go through a [`Sleeper`] and every
//! run can be stopped early through a [`CancelToken`].

pub mod breaker;
pub mod cancel;
pub mod classify;
pub mod config;
pub mod engine;
pub mod executor;
pub mod origin;
pub mod record;
pub mod sleep;
pub mod smart;
pub mod stats;

pub use breaker::{BreakerSnapshot, CircuitBreaker};
pub use cancel::CancelToken;
pub use classify::{classify_message, Classify, ErrorClass, FetchError};
pub use config::{BatchConfig, BatchThresholds, ConfigError, SmartThresholds};
pub use engine::BatchEngine;
pub use executor::{ItemExecutor, ItemOutcome, ItemStatus, BREAKER_SKIP_MESSAGE};
pub use origin::{infer_origin, origin_from_latency, DataOrigin, OriginHint, Sourced};
pub use record::{batch_count, classify_batch, partition, BatchRecord, BatchStatus, CacheSummary};
pub use sleep::{RecordingSleeper, Sleeper, ThreadSleeper};
pub use smart::{BatchDelayPolicy, BatchDelayReason, ItemDelayPolicy};
pub use stats::{Aggregator, RunStatistics};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: the engine and its records can move to a worker thread.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<BatchEngine>();
        require_send::<BatchConfig>();
        require_sync::<BatchConfig>();
        require_send::<CircuitBreaker>();
        require_sync::<CircuitBreaker>();
        require_send::<CancelToken>();
        require_sync::<CancelToken>();
        require_send::<BatchRecord<String, f64>>();
        require_sync::<BatchRecord<String, f64>>();
        require_send::<RunStatistics>();
        require_sync::<RunStatistics>();
        require_send::<FetchError>();
        require_sync::<FetchError>();
    }
}
