//! Lock-free memoizing cache façade.
//!
//! A [`MemoCache`] wraps a pure function `f: K -> V` and remembers its
//! results. Concurrent callers either find a previously computed value or
//! invoke `f` and publish the result; no operation takes a lock, and
//! system-wide progress is guaranteed even if any thread stalls.
//!
//! # How a lookup works
//!
//! ```text
//! get(k):
//!   now    = tick.fetch_add(1)             logical time, one per call
//!   bucket = hash(k) % buckets
//!   walk the bucket with a pruning cursor:
//!     hit  -> append a fresh node sharing the entry, unlink the stale
//!             copy, return the value
//!     miss -> v = f(k), append a node, return v
//! ```
//!
//! Eviction is approximate LRU: every node records the tick at which it was
//! appended, and any traversal physically removes nodes older than
//! `node_life` ticks. A refresh never mutates a node; it appends a younger
//! copy first and then unlinks the older one, so a concurrent reader always
//! finds the key present.
//!
//! # Duplicate evaluation
//!
//! Two callers missing the same key at once both evaluate `f` and both
//! append. With `f` pure the observable result is identical, and the older
//! duplicate ages out. This is the price of lock-freedom and is accepted by
//! design; `f` must therefore be deterministic and side-effect free.
//!
//! # Example
//!
//! ```
//! use memo_cache::MemoCache;
//!
//! let cache = MemoCache::new(|x: &u64| x * x);
//! assert_eq!(cache.get(&12), 144);
//! assert_eq!(cache.get(&12), 144); // served from the cache
//! ```

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::hash::{BuildHasher, Hash};

use crate::config::MemoCacheConfig;
use crate::entry::CacheEntry;
use crate::handle::Handle;
use crate::list::{Cursor, Node};
use crate::metrics::{CacheMetrics, MemoCacheMetrics};
use crate::slot::AtomicHandle;
use crate::sync::{AtomicU64, Ordering};

#[cfg(feature = "hashbrown")]
use hashbrown::hash_map::DefaultHashBuilder;

#[cfg(not(feature = "hashbrown"))]
extern crate std;
#[cfg(not(feature = "hashbrown"))]
use std::collections::hash_map::RandomState as DefaultHashBuilder;

/// Lock-free memoizing cache over a pure function.
///
/// # Type Parameters
///
/// - `K`: key type, `Hash + Eq + Clone`
/// - `V`: value type, `Clone`; values are handed out by clone once published
/// - `F`: the memoized function, `Fn(&K) -> V`, pure and deterministic
/// - `S`: hash builder, defaults to the `hashbrown` one (or `RandomState`
///   without the `hashbrown` feature)
///
/// # Thread Safety
///
/// `MemoCache` is `Send + Sync` whenever its parameters are; share it by
/// reference or wrap it in an `Arc`. Every method takes `&self`.
///
/// # Example
///
/// ```
/// use memo_cache::{MemoCache, MemoCacheConfig};
/// use core::num::NonZeroUsize;
///
/// let config = MemoCacheConfig {
///     buckets: NonZeroUsize::new(16).unwrap(),
///     node_life: 64,
/// };
/// let cache = MemoCache::init(config, |s: &&str| s.len());
/// assert_eq!(cache.get(&"memoize"), 7);
/// ```
pub struct MemoCache<K, V, F, S = DefaultHashBuilder> {
    buckets: Box<[AtomicHandle<Node<K, V>>]>,
    tick: AtomicU64,
    func: F,
    hash_builder: S,
    config: MemoCacheConfig,
    metrics: MemoCacheMetrics,
}

impl<K, V, F> MemoCache<K, V, F, DefaultHashBuilder>
where
    K: Hash + Eq + Clone,
    V: Clone,
    F: Fn(&K) -> V,
{
    /// Creates a cache over `func` with the default configuration
    /// (100 buckets, node life 100 ticks).
    pub fn new(func: F) -> Self {
        Self::init(MemoCacheConfig::default(), func)
    }

    /// Creates a cache over `func` with an explicit configuration.
    pub fn init(config: MemoCacheConfig, func: F) -> Self {
        Self::with_hasher(config, func, DefaultHashBuilder::default())
    }
}

impl<K, V, F, S> MemoCache<K, V, F, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    F: Fn(&K) -> V,
    S: BuildHasher,
{
    /// Creates a cache with a custom hash builder. The hash distribution
    /// over `buckets` determines bucket balance.
    pub fn with_hasher(config: MemoCacheConfig, func: F, hash_builder: S) -> Self {
        let buckets: Vec<_> = (0..config.buckets.get())
            .map(|_| AtomicHandle::new())
            .collect();
        MemoCache {
            buckets: buckets.into_boxed_slice(),
            tick: AtomicU64::new(0),
            func,
            hash_builder,
            config,
            metrics: MemoCacheMetrics::new(),
        }
    }

    /// The configuration this cache was built with.
    pub fn config(&self) -> MemoCacheConfig {
        self.config
    }

    /// Operation counters.
    pub fn metrics(&self) -> &MemoCacheMetrics {
        &self.metrics
    }

    /// Ticks consumed so far. Advances by one on every [`get`](Self::get).
    pub fn ticks(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    #[inline]
    fn bucket_index(&self, key: &K) -> usize {
        (self.hash_builder.hash_one(key) as usize) % self.buckets.len()
    }

    /// Returns the memoized value for `key`, invoking the function on a
    /// miss. Thread-safe and non-blocking; each call advances the tick.
    pub fn get(&self, key: &K) -> V {
        let now = self.tick.fetch_add(1, Ordering::Relaxed);
        let bucket = self.bucket_index(key);
        self.metrics.record_request();

        let mut cursor = Cursor::new(&self.buckets[bucket], now, self.config.node_life);
        loop {
            let matched = match cursor.entry() {
                Some(entry) => entry.key == *key,
                None => break,
            };
            if matched {
                let hit = cursor.data_handle();
                let value = hit.get().value.clone();
                self.metrics.record_hit();
                self.metrics.record_unlinks(cursor.unlinked());
                drop(cursor);
                // Refresh: publish a young copy before retiring the old
                // one, so the key never vanishes in between.
                self.append(hit.clone(), bucket, now);
                self.unlink_stale(&hit, bucket, now);
                return value;
            }
            if !cursor.advance() {
                break;
            }
        }
        self.metrics.record_unlinks(cursor.unlinked());
        drop(cursor);

        let value = (self.func)(key);
        self.metrics.record_evaluation();
        let entry = Handle::new(CacheEntry::new(key.clone(), value.clone()));
        self.append(entry, bucket, now);
        value
    }

    /// Appends a node for `data` at the end of the bucket, re-walking on
    /// every contention failure until the install CAS lands.
    fn append(&self, data: Handle<CacheEntry<K, V>>, bucket: usize, now: u64) {
        let mut node = Handle::new(Node::new(data, now));
        loop {
            let mut cursor = Cursor::new(&self.buckets[bucket], now, self.config.node_life);
            while cursor.advance() {}
            let pushed = cursor.try_push(node);
            self.metrics.record_unlinks(cursor.unlinked());
            match pushed {
                Ok(()) => return,
                Err(rejected) => node = rejected,
            }
        }
    }

    /// Unlinks the first node sharing `data` that predates `now`: the
    /// stale copy left behind by a refresh. Best-effort; if a concurrent
    /// traversal already collected it, there is nothing to do.
    fn unlink_stale(&self, data: &Handle<CacheEntry<K, V>>, bucket: usize, now: u64) {
        let mut cursor = Cursor::new(&self.buckets[bucket], now, self.config.node_life);
        loop {
            let stale = match cursor.node() {
                Some(node) => node.data == *data && node.stamp < now,
                None => break,
            };
            if stale {
                cursor.remove();
                break;
            }
            if !cursor.advance() {
                break;
            }
        }
        self.metrics.record_unlinks(cursor.unlinked());
    }

    /// Number of live entries, counted by traversal. Approximate under
    /// concurrency, and the walk prunes expired nodes as a side effect.
    pub fn len(&self) -> usize {
        let now = self.tick.load(Ordering::Relaxed);
        let mut total = 0;
        for bucket in self.buckets.iter() {
            let mut cursor = Cursor::new(bucket, now, self.config.node_life);
            while cursor.node().is_some() {
                total += 1;
                if !cursor.advance() {
                    break;
                }
            }
            self.metrics.record_unlinks(cursor.unlinked());
        }
        total
    }

    /// Returns `true` when no bucket holds a live entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V, F, S> MemoCache<K, V, F, S> {
    /// Severs every bucket, releasing all entries. Chains are unlinked
    /// node by node so arbitrarily long buckets cannot overflow the stack
    /// through recursive drops.
    pub fn clear(&self) {
        for bucket in self.buckets.iter() {
            let mut node = bucket.exchange(Handle::null());
            while !node.is_null() {
                node = node.get().next.exchange(Handle::null());
            }
        }
    }
}

impl<K, V, F, S> Drop for MemoCache<K, V, F, S> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<K, V, F, S> CacheMetrics for MemoCache<K, V, F, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    F: Fn(&K) -> V,
    S: BuildHasher,
{
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.metrics.to_btreemap()
    }

    fn algorithm_name(&self) -> &'static str {
        "LockFreeMemo"
    }
}

impl<K, V, F, S> fmt::Debug for MemoCache<K, V, F, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoCache")
            .field("buckets", &self.buckets.len())
            .field("node_life", &self.config.node_life)
            .field("ticks", &self.tick.load(Ordering::Relaxed))
            .finish()
    }
}
