//! Cache configuration.
//!
//! Configuration structs have all public fields for simple instantiation:
//! create the struct with the fields set, or start from [`Default`].
//!
//! # Choosing `buckets` and `node_life`
//!
//! - **`buckets`** fixes the hash fan-out. Lookups only ever touch the one
//!   bucket their key hashes to, so more buckets mean shorter walks and
//!   less contention between unrelated keys.
//! - **`node_life`** bounds entry age in *cache operations*, not wall
//!   time: a node that has not been looked up for `node_life` ticks is
//!   eligible for eviction by whichever traversal next walks past it.
//!   Steady-state bucket length is proportional to `node_life`.
//!
//! The default pairs 100 buckets with a life of 100 ticks, matching the
//! fan-out, so a key stays cached as long as it is re-requested at least
//! once per hundred cache calls.
//!
//! # Examples
//!
//! ```
//! use memo_cache::MemoCacheConfig;
//! use core::num::NonZeroUsize;
//!
//! let config = MemoCacheConfig {
//!     buckets: NonZeroUsize::new(16).unwrap(),
//!     node_life: 64,
//! };
//! assert_eq!(config.buckets.get(), 16);
//! ```

use core::fmt;
use core::num::NonZeroUsize;

/// Default bucket count, also the default node life in ticks.
pub const DEFAULT_BUCKETS: usize = 100;

/// Construction-time parameters of a [`MemoCache`](crate::MemoCache).
///
/// # Fields
///
/// - `buckets`: number of independent hash buckets
/// - `node_life`: ticks an entry survives without being looked up.
///   `0` is legal and makes every call start from a cold entry.
#[derive(Clone, Copy)]
pub struct MemoCacheConfig {
    /// Number of hash buckets.
    pub buckets: NonZeroUsize,
    /// Maximum number of cache operations an entry may go untouched
    /// before it becomes eligible for eviction.
    pub node_life: u64,
}

impl MemoCacheConfig {
    /// Config with the given bucket count and a node life equal to it.
    pub fn with_buckets(buckets: NonZeroUsize) -> Self {
        MemoCacheConfig {
            buckets,
            node_life: buckets.get() as u64,
        }
    }
}

impl Default for MemoCacheConfig {
    fn default() -> Self {
        Self::with_buckets(NonZeroUsize::new(DEFAULT_BUCKETS).unwrap())
    }
}

impl fmt::Debug for MemoCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoCacheConfig")
            .field("buckets", &self.buckets)
            .field("node_life", &self.node_life)
            .finish()
    }
}
