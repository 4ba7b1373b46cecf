//! Reference-counted heap cell with split internal/external counts.
//!
//! A [`CountedCell`] owns one value plus a pair of signed 32-bit counters
//! packed into a single `AtomicU64`:
//!
//! - `internal` counts owning handles that point directly at the cell.
//! - `external` counts slot reservations that a displacing writer has
//!   transferred out of an atomic slot and into the cell (see `slot.rs`).
//!
//! The cell is destroyed exactly once, by whichever [`CountedCell::modify`]
//! call drives the pair to `(0, 0)`. `external` may be transiently negative:
//! a reader stranded by a concurrent store releases its reservation with
//! `modify(0, -1)`, and that release can land before the storer's transfer
//! credit. `internal` never goes negative; each decrement is backed by an
//! owned reference.
//!
//! Count arithmetic is relaxed. The decrement that can reach zero uses a
//! release CAS, and the destruction path issues an acquire fence before the
//! value is dropped, so every access through a dying reference happens
//! before the drop.

extern crate alloc;

use alloc::boxed::Box;

use crate::sync::{fence, AtomicU64, Ordering};

/// Live-cell accounting, independent of the loom shim: the counter carries
/// no synchronization, it only witnesses allocation/destruction balance.
static LIVE_CELLS: core::sync::atomic::AtomicI64 = core::sync::atomic::AtomicI64::new(0);

/// Number of cells currently allocated across the whole process.
///
/// Intended for leak detection in tests: after every cache and handle has
/// been dropped, the count returns to its prior value.
pub fn live_cell_count() -> i64 {
    LIVE_CELLS.load(core::sync::atomic::Ordering::Relaxed)
}

#[inline]
fn pack(internal: i32, external: i32) -> u64 {
    ((internal as u32 as u64) << 32) | (external as u32 as u64)
}

#[inline]
fn unpack(word: u64) -> (i32, i32) {
    ((word >> 32) as u32 as i32, word as u32 as i32)
}

/// Heap block holding one `T` and its packed counter pair.
///
/// Allocated with counters `(0, 0)`; the first handle bumps `internal` to 1
/// before the cell is shared anywhere.
pub(crate) struct CountedCell<T> {
    counts: AtomicU64,
    value: T,
}

impl<T> CountedCell<T> {
    /// Allocates a cell with counters `(0, 0)` and leaks it to a raw pointer.
    ///
    /// The caller must follow up with `modify(ptr, 1, 0)` to take the first
    /// owning reference before the pointer escapes.
    pub(crate) fn allocate(value: T) -> *mut CountedCell<T> {
        LIVE_CELLS.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        Box::into_raw(Box::new(CountedCell {
            counts: AtomicU64::new(pack(0, 0)),
            value,
        }))
    }

    /// Shared access to the stored value.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live cell, and the caller must hold a positive
    /// contribution to its counts for the duration of the borrow.
    #[inline]
    pub(crate) unsafe fn value<'a>(ptr: *mut CountedCell<T>) -> &'a T {
        &(*ptr).value
    }

    /// Atomically adds `(internal, external)` to the counter pair.
    ///
    /// When the post-state is exactly `(0, 0)` the value is dropped and the
    /// block freed. No operation may touch the cell afterwards; callers
    /// guarantee this by holding a positive contribution until this call.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live cell and the deltas must be backed by
    /// references or reservations the caller actually owns.
    pub(crate) unsafe fn modify(ptr: *mut CountedCell<T>, internal: i32, external: i32) {
        let cell = &*ptr;
        let mut observed = cell.counts.load(Ordering::Relaxed);
        loop {
            let (i, e) = unpack(observed);
            let next_i = i + internal;
            let next_e = e + external;
            debug_assert!(next_i >= 0, "internal count went negative");
            let next = pack(next_i, next_e);
            match cell
                .counts
                .compare_exchange_weak(observed, next, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => {
                    if next == 0 {
                        // Synchronize with every reference that reached zero.
                        fence(Ordering::Acquire);
                        drop(Box::from_raw(ptr));
                    }
                    return;
                }
                Err(current) => observed = current,
            }
        }
    }
}

impl<T> Drop for CountedCell<T> {
    fn drop(&mut self) {
        LIVE_CELLS.fetch_sub(1, core::sync::atomic::Ordering::Relaxed);
    }
}


#[cfg(all(test, feature = "loom"))]
mod loom_tests {
    use super::*;

    extern crate std;
    use std::sync::Arc;

    /// Two threads racing their decrements still destroy the value exactly
    /// once, whichever of them observes `(0, 0)`.
    #[test]
    fn loom_concurrent_count_decay() {
        loom::model(|| {
            let ptr = CountedCell::allocate(7_u64) as usize;
            unsafe {
                CountedCell::modify(ptr as *mut CountedCell<u64>, 2, 0);
            }
            let a = loom::thread::spawn(move || unsafe {
                CountedCell::modify(ptr as *mut CountedCell<u64>, -1, 0);
            });
            let b = loom::thread::spawn(move || unsafe {
                CountedCell::modify(ptr as *mut CountedCell<u64>, -1, 0);
            });
            a.join().unwrap();
            b.join().unwrap();
        });
    }

    /// Reader release racing a storer transfer conserves the pair.
    #[test]
    fn loom_release_vs_transfer() {
        loom::model(|| {
            let ptr = CountedCell::allocate(Arc::new(3_u32)) as usize;
            unsafe {
                CountedCell::modify(ptr as *mut CountedCell<Arc<u32>>, 1, 0);
            }
            let reader = loom::thread::spawn(move || unsafe {
                CountedCell::modify(ptr as *mut CountedCell<Arc<u32>>, 0, -1);
            });
            let storer = loom::thread::spawn(move || unsafe {
                CountedCell::modify(ptr as *mut CountedCell<Arc<u32>>, -1, 1);
            });
            reader.join().unwrap();
            storer.join().unwrap();
        });
    }
}
