//! Where a successful result most likely came from: a local cache or the
//! remote upstream.
//!
//! Explicit metadata on the result wins. Without it the call latency decides:
//! fast calls are taken as cache hits, slow calls as fresh fetches, and the
//! band in between is `Unknown` (treated as fresh when choosing delays).
//!
//! The latency rule is a heuristic. A genuinely fresh remote call that
//! happens to answer under the fast threshold is reported as `Cached`, and the
//! engine will then skip delays it should have kept. The thresholds are
//! configurable but the rule is kept as is because callers tune around it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::SmartThresholds;
use crate::executor::{ItemOutcome, ItemStatus};

/// Inferred origin of an item's data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataOrigin {
    Cached,
    Fresh,
    #[default]
    Unknown,
}

impl DataOrigin {
    pub fn is_cached(self) -> bool {
        matches!(self, DataOrigin::Cached)
    }
}

/// Results that may know their own origin.
pub trait OriginHint {
    fn origin_hint(&self) -> Option<DataOrigin> {
        None
    }
}

macro_rules! no_hint {
    ($($ty:ty),* $(,)?) => {
        $(impl OriginHint for $ty {})*
    };
}

no_hint!((), bool, char, i32, i64, u32, u64, usize, f32, f64, String);

impl<T> OriginHint for Vec<T> {}

impl<T: OriginHint> OriginHint for Option<T> {
    fn origin_hint(&self) -> Option<DataOrigin> {
        self.as_ref().and_then(OriginHint::origin_hint)
    }
}

/// Reads cache metadata from JSON objects: boolean `cached`, `from_cache` or
/// `cache_hit`, or a `source` / `data_source` string.
impl OriginHint for serde_json::Value {
    fn origin_hint(&self) -> Option<DataOrigin> {
        let obj = self.as_object()?;
        for key in ["cached", "from_cache", "cache_hit"] {
            if let Some(flag) = obj.get(key).and_then(serde_json::Value::as_bool) {
                return Some(if flag { DataOrigin::Cached } else { DataOrigin::Fresh });
            }
        }
        for key in ["source", "data_source"] {
            if let Some(source) = obj.get(key).and_then(serde_json::Value::as_str) {
                return match source.to_ascii_lowercase().as_str() {
                    "cache" | "cached" | "local" | "memory" | "disk" => Some(DataOrigin::Cached),
                    "network" | "api" | "remote" | "fresh" | "upstream" => {
                        Some(DataOrigin::Fresh)
                    }
                    _ => None,
                };
            }
        }
        None
    }
}

/// A value tagged with the origin its producer knows for certain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sourced<T> {
    pub value: T,
    pub origin: DataOrigin,
}

impl<T> Sourced<T> {
    pub fn cached(value: T) -> Self {
        Self {
            value,
            origin: DataOrigin::Cached,
        }
    }

    pub fn fresh(value: T) -> Self {
        Self {
            value,
            origin: DataOrigin::Fresh,
        }
    }
}

impl<T> OriginHint for Sourced<T> {
    fn origin_hint(&self) -> Option<DataOrigin> {
        Some(self.origin)
    }
}

/// Classify by latency alone.
pub fn origin_from_latency(elapsed: Duration, thresholds: &SmartThresholds) -> DataOrigin {
    if elapsed < thresholds.fast() {
        DataOrigin::Cached
    } else if elapsed > thresholds.slow() {
        DataOrigin::Fresh
    } else {
        DataOrigin::Unknown
    }
}

/// Classify a finished item.
///
/// Failures and retried items reached the upstream and count as fresh;
/// skipped items (zero attempts) stay unknown.
pub fn infer_origin<T, R: OriginHint>(
    outcome: &ItemOutcome<T, R>,
    thresholds: &SmartThresholds,
) -> DataOrigin {
    if outcome.attempts == 0 {
        return DataOrigin::Unknown;
    }
    if outcome.status != ItemStatus::Success || outcome.attempts > 1 {
        return DataOrigin::Fresh;
    }
    outcome
        .value
        .as_ref()
        .and_then(OriginHint::origin_hint)
        .unwrap_or_else(|| origin_from_latency(outcome.elapsed, thresholds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outcome<R>(status: ItemStatus, value: Option<R>, attempts: u32, ms: u64) -> ItemOutcome<u32, R> {
        ItemOutcome {
            index: 0,
            item: 0,
            status,
            value,
            error: None,
            attempts,
            elapsed: Duration::from_millis(ms),
            origin: DataOrigin::Unknown,
        }
    }

    #[test]
    fn latency_bands() {
        let t = SmartThresholds::default();
        assert_eq!(origin_from_latency(Duration::from_millis(5), &t), DataOrigin::Cached);
        assert_eq!(origin_from_latency(Duration::from_millis(100), &t), DataOrigin::Unknown);
        assert_eq!(origin_from_latency(Duration::from_millis(500), &t), DataOrigin::Unknown);
        assert_eq!(origin_from_latency(Duration::from_millis(1000), &t), DataOrigin::Unknown);
        assert_eq!(origin_from_latency(Duration::from_millis(1001), &t), DataOrigin::Fresh);
    }

    #[test]
    fn metadata_beats_latency() {
        let t = SmartThresholds::default();
        let slow_but_cached = outcome(ItemStatus::Success, Some(Sourced::cached(1.0)), 1, 5000);
        assert_eq!(infer_origin(&slow_but_cached, &t), DataOrigin::Cached);
        let fast_but_fresh = outcome(ItemStatus::Success, Some(Sourced::fresh(1.0)), 1, 1);
        assert_eq!(infer_origin(&fast_but_fresh, &t), DataOrigin::Fresh);
    }

    #[test]
    fn failures_and_retries_are_fresh() {
        let t = SmartThresholds::default();
        assert_eq!(
            infer_origin(&outcome::<u64>(ItemStatus::Error, None, 1, 1), &t),
            DataOrigin::Fresh
        );
        assert_eq!(
            infer_origin(&outcome(ItemStatus::Success, Some(3u64), 2, 1), &t),
            DataOrigin::Fresh
        );
    }

    #[test]
    fn skipped_items_are_unknown() {
        let t = SmartThresholds::default();
        let skipped = outcome::<u64>(ItemStatus::RateLimited, None, 0, 0);
        assert_eq!(infer_origin(&skipped, &t), DataOrigin::Unknown);
    }

    #[test]
    fn json_metadata() {
        assert_eq!(json!({"cached": true}).origin_hint(), Some(DataOrigin::Cached));
        assert_eq!(json!({"from_cache": false}).origin_hint(), Some(DataOrigin::Fresh));
        assert_eq!(json!({"source": "Network"}).origin_hint(), Some(DataOrigin::Fresh));
        assert_eq!(json!({"data_source": "disk"}).origin_hint(), Some(DataOrigin::Cached));
        assert_eq!(json!({"source": "carrier pigeon"}).origin_hint(), None);
        assert_eq!(json!({"price": 10.5}).origin_hint(), None);
        assert_eq!(json!(42).origin_hint(), None);
    }

    #[test]
    fn option_delegates() {
        assert_eq!(Some(Sourced::cached(1u32)).origin_hint(), Some(DataOrigin::Cached));
        assert_eq!(None::<Sourced<u32>>.origin_hint(), None);
        assert_eq!(7u64.origin_hint(), None);
    }
}
