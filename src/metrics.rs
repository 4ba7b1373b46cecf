//! Cache metrics.
//!
//! Counters are plain relaxed atomics: every cache operation takes `&self`
//! and the counters carry no synchronization, they only have to add up.
//! Snapshots are reported as a `BTreeMap` so metric keys always come out in
//! a deterministic order, which keeps test assertions and log output
//! stable.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use core::sync::atomic::{AtomicU64, Ordering};

/// Uniform metrics interface for cache implementations.
pub trait CacheMetrics {
    /// Returns all metrics as key-value pairs in deterministic order.
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// Short name identifying the cache algorithm.
    fn algorithm_name(&self) -> &'static str;
}

/// Operation counters of a memoizing cache.
///
/// - `requests`: total lookups
/// - `hits`: lookups answered from a cached entry
/// - `evaluations`: invocations of the user function (equals misses;
///   concurrent racers on the same key may each evaluate once)
/// - `unlinks`: nodes physically removed by traversals, whether from
///   expiry, logical deletion, or refresh cleanup
#[derive(Debug, Default)]
pub struct MemoCacheMetrics {
    requests: AtomicU64,
    hits: AtomicU64,
    evaluations: AtomicU64,
    unlinks: AtomicU64,
}

impl MemoCacheMetrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_evaluation(&self) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_unlinks(&self, count: u64) {
        if count > 0 {
            self.unlinks.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Total lookups so far.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Lookups served from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Invocations of the user function.
    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    /// Nodes physically unlinked by traversals.
    pub fn unlinks(&self) -> u64 {
        self.unlinks.load(Ordering::Relaxed)
    }

    /// Fraction of lookups answered from the cache, in `0.0..=1.0`.
    pub fn hit_rate(&self) -> f64 {
        let requests = self.requests();
        if requests > 0 {
            self.hits() as f64 / requests as f64
        } else {
            0.0
        }
    }

    /// Converts the counters to a `BTreeMap` for reporting.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        let requests = self.requests();
        let hits = self.hits();

        metrics.insert("requests".to_string(), requests as f64);
        metrics.insert("hits".to_string(), hits as f64);
        metrics.insert("misses".to_string(), (requests - hits) as f64);
        metrics.insert("evaluations".to_string(), self.evaluations() as f64);
        metrics.insert("unlinks".to_string(), self.unlinks() as f64);
        metrics.insert("hit_rate".to_string(), self.hit_rate());

        metrics
    }
}

impl CacheMetrics for MemoCacheMetrics {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.to_btreemap()
    }

    fn algorithm_name(&self) -> &'static str {
        "LockFreeMemo"
    }
}
