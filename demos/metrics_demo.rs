//! Metrics reporting for the memoizing cache.
//!
//! Run with: cargo run --example metrics_demo

use memo_cache::{CacheMetrics, MemoCache, MemoCacheConfig};
use std::num::NonZeroUsize;

fn print_report<M: CacheMetrics>(source: &M) {
    println!("=== {} ===", source.algorithm_name());
    for (name, value) in source.metrics() {
        println!("  {:<24} {:>12.4}", name, value);
    }
}

fn main() {
    let config = MemoCacheConfig {
        buckets: NonZeroUsize::new(8).unwrap(),
        node_life: 16,
    };
    let cache = MemoCache::init(config, |word: &String| word.chars().rev().collect::<String>());

    // A zipf-ish workload: a few hot words, a stream of cold ones.
    let hot = ["alpha", "beta", "gamma"];
    for round in 0..200 {
        for word in hot {
            cache.get(&word.to_string());
        }
        cache.get(&format!("cold-{round}"));
    }

    print_report(&cache);
    println!();
    println!("hit rate:      {:.4}", cache.metrics().hit_rate());
    println!("live entries:  {}", cache.len());
    println!("ticks elapsed: {}", cache.ticks());
}
