//! Suspension points of the engine.
//!
//! Every pause (retry backoff, between items, between batches) goes through a
//! [`Sleeper`], so runs can be replayed without waiting.

use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Blocks the calling thread for a requested duration.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// A shared sleeper, so one instance can pace both the engine and the
/// processing function.
impl<S: Sleeper + ?Sized> Sleeper for Arc<S> {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }
}

/// Real blocking sleep on the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Records requested pauses and returns immediately. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    log: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// All pauses requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.log.lock().map(|log| log.len()).unwrap_or(0)
    }

    pub fn total(&self) -> Duration {
        self.sleeps()
            .into_iter()
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    pub fn clear(&self) {
        if let Ok(mut log) = self.log.lock() {
            log.clear();
        }
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut log) = self.log.lock() {
            log.push(duration);
        }
    }
}
