//! Circuit breaker guarding batch attempts against a rate-limited upstream.
//!
//! After `failure_threshold` consecutive failed batches the breaker opens and
//! every batch is skipped until the cool-down has elapsed. The first batch
//! after the cool-down is a probe: success closes the breaker, failure
//! re-opens it straight away because the failure count was never cleared.

use serde::Serialize;
use std::time::{Duration, Instant};

use crate::config::BatchConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BreakerState {
    /// Normal operation; batches are attempted.
    Closed,
    /// Tripped; batches are skipped until the cool-down expires.
    Open { opened_at: Instant },
}

/// Read-only view of the breaker for statistics and logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub failure_threshold: u32,
    pub cooldown_secs: f64,
    pub consecutive_failures: u32,
    pub is_open: bool,
    /// Seconds since the breaker opened, if open.
    pub open_for_secs: Option<f64>,
    /// Seconds until a probe batch is allowed (zero when closed or probing).
    pub remaining_cooldown_secs: f64,
}

/// Engine-wide circuit breaker. Owned by exactly one engine.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    cooldown: Duration,
    consecutive_failures: u32,
    failure_threshold: u32,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            cooldown,
            consecutive_failures: 0,
            failure_threshold: failure_threshold.max(1),
        }
    }

    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(config.circuit_breaker_threshold, config.rate_limit_cooldown())
    }

    /// Whether the next batch may be attempted.
    ///
    /// Open breakers allow a probe once strictly more than the cool-down has
    /// passed; they stay open until that probe is recorded as a success.
    pub fn should_attempt(&self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open { opened_at } => opened_at.elapsed() > self.cooldown,
        }
    }

    /// Record a completed batch. Returns `true` if this closed an open breaker.
    pub fn record_success(&mut self) -> bool {
        let was_open = self.is_open();
        self.consecutive_failures = 0;
        self.state = BreakerState::Closed;
        was_open
    }

    /// Record a failed or rate-limited batch. Returns `true` if the breaker
    /// (re)opened on this call.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.failure_threshold {
            self.state = BreakerState::Open {
                opened_at: Instant::now(),
            };
            true
        } else {
            false
        }
    }

    /// Operator override: close the breaker and clear the failure count.
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.state = BreakerState::Closed;
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, BreakerState::Open { .. })
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Remaining cooldown time (zero if closed or already probing).
    pub fn remaining_cooldown(&self) -> Duration {
        match self.state {
            BreakerState::Closed => Duration::ZERO,
            BreakerState::Open { opened_at } => self.cooldown.saturating_sub(opened_at.elapsed()),
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let open_for_secs = match self.state {
            BreakerState::Closed => None,
            BreakerState::Open { opened_at } => Some(opened_at.elapsed().as_secs_f64()),
        };
        BreakerSnapshot {
            failure_threshold: self.failure_threshold,
            cooldown_secs: self.cooldown.as_secs_f64(),
            consecutive_failures: self.consecutive_failures,
            is_open: self.is_open(),
            open_for_secs,
            remaining_cooldown_secs: self.remaining_cooldown().as_secs_f64(),
        }
    }
}
