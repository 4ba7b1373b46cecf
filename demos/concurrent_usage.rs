//! Multi-threaded usage of the memoizing cache.
//!
//! Run with: cargo run --example concurrent_usage

use memo_cache::{MemoCache, MemoCacheConfig};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

fn main() {
    let evaluations = Arc::new(AtomicUsize::new(0));

    let config = MemoCacheConfig {
        buckets: NonZeroUsize::new(64).unwrap(),
        node_life: 512,
    };
    let counter = Arc::clone(&evaluations);
    let cache = Arc::new(MemoCache::init(config, move |x: &u64| {
        counter.fetch_add(1, Ordering::Relaxed);
        // Stand-in for an expensive pure computation.
        (0..=*x % 1000).sum::<u64>()
    }));

    let threads = 8;
    let lookups_per_thread = 200_000_u64;
    let start = Instant::now();

    let mut handles = Vec::new();
    for t in 0..threads {
        let cache = Arc::clone(&cache);
        handles.push(thread::spawn(move || {
            for i in 0..lookups_per_thread {
                let key = (i + t * 17) % 400;
                let value = cache.get(&key);
                assert_eq!(value, (0..=key % 1000).sum::<u64>());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let elapsed = start.elapsed();
    let total = threads * lookups_per_thread;
    println!("{} lookups across {} threads in {:?}", total, threads, elapsed);
    println!(
        "{:.1} M lookups/s",
        total as f64 / elapsed.as_secs_f64() / 1_000_000.0
    );
    println!(
        "function evaluated {} times for 400 distinct keys",
        evaluations.load(Ordering::Relaxed)
    );
    println!("hit rate: {:.4}", cache.metrics().hit_rate());
    println!("live entries at the end: {}", cache.len());
}
