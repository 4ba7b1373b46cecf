//! Small workloads sized for the Miri interpreter.
//!
//! Run with: `cargo +nightly miri test --test miri_smoke_tests`
//!
//! The point is aliasing and reclamation soundness, not throughput, so the
//! iteration counts are tiny. The same shapes run at full scale in the
//! stress suite.

#![cfg(not(feature = "loom"))]

use memo_cache::{MemoCache, MemoCacheConfig};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;

fn config(buckets: usize, node_life: u64) -> MemoCacheConfig {
    MemoCacheConfig {
        buckets: NonZeroUsize::new(buckets).unwrap(),
        node_life,
    }
}

#[test]
fn miri_single_thread_lookup_refresh_evict() {
    let cache = MemoCache::init(config(1, 3), |x: &u64| x * x);
    for key in [1_u64, 2, 1, 3, 4, 1, 5, 6, 7, 1] {
        assert_eq!(cache.get(&key), key * key);
    }
    cache.clear();
    assert!(cache.is_empty());
}

#[test]
fn miri_two_threads_share_one_bucket() {
    let cache = Arc::new(MemoCache::init(config(1, 8), |x: &u64| x + 1));

    let mut handles = Vec::new();
    for t in 0..2_u64 {
        let cache = Arc::clone(&cache);
        handles.push(thread::spawn(move || {
            for i in 0..40 {
                let key = (i + t * 3) % 10;
                assert_eq!(cache.get(&key), key + 1);
            }
        }));
    }
    for handle in handles {
        handle.join().expect("thread panicked");
    }
}

#[test]
fn miri_displaced_reader_keeps_entry_alive() {
    // A held value must stay valid while eviction churns underneath.
    let cache = MemoCache::init(config(1, 1), |x: &u64| vec![*x; 8]);
    let held = cache.get(&42);
    for key in 0..10_u64 {
        cache.get(&key);
    }
    assert_eq!(held, vec![42; 8]);
}
