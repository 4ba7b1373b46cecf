//! Atomic slot over a counted cell, with mark bit and reservation count.
//!
//! An [`AtomicHandle`] packs `{cell pointer, mark, access count}` into one
//! `AtomicU64`:
//!
//! ```text
//! 63            48 47                                  1   0
//! ┌───────────────┬────────────────────────────────────┬────┐
//! │ access count  │ cell pointer (aligned, canonical)  │mark│
//! └───────────────┴────────────────────────────────────┴────┘
//! ```
//!
//! Cells are at least 8-byte aligned, so bit 0 is free for the mark, and
//! the pointer must fit the canonical lower 48-bit range. The access count
//! caps concurrent reservations per slot at 65 535, which is asserted; on
//! platforms with a wider user address space a double-width CAS layout
//! would be needed instead.
//!
//! # Reservation protocol
//!
//! The access count is what makes `load` safe without owning a reference
//! first. A reader CAS-increments the count, then builds a strong handle
//! from the pointer it reserved. Between those two steps the cell cannot
//! die:
//!
//! - while the slot still holds the pointer, the word itself carries the
//!   reader's reservation, and
//! - a writer that displaces the word takes the whole count with it and
//!   credits it to the displaced cell's external counter
//!   (`modify(-1, +access)`), so the stranded reader's claim survives as
//!   cell state. The reader then releases with `modify(0, -1)`.
//!
//! Displacement and release commute; the counter pair is signed to absorb
//! either order.

use core::fmt;
use core::marker::PhantomData;

use crate::cell::CountedCell;
use crate::handle::Handle;
use crate::sync::{AtomicU64, Ordering};

const MARK_BIT: u64 = 0b1;
const PTR_MASK: u64 = 0x0000_FFFF_FFFF_FFFE;
const ACCESS_SHIFT: u32 = 48;
const ACCESS_LIMIT: u64 = (1 << 16) - 1;

/// Decoded form of the packed slot word.
struct SlotWord<T> {
    ptr: *mut CountedCell<T>,
    mark: bool,
    access: u64,
}

impl<T> Clone for SlotWord<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SlotWord<T> {}

#[inline]
fn encode<T>(word: SlotWord<T>) -> u64 {
    let ptr = word.ptr as u64;
    debug_assert_eq!(ptr & !PTR_MASK, 0, "cell pointer outside the packable range");
    debug_assert!(word.access <= ACCESS_LIMIT);
    (word.access << ACCESS_SHIFT) | ptr | (word.mark as u64)
}

#[inline]
fn decode<T>(word: u64) -> SlotWord<T> {
    SlotWord {
        ptr: (word & PTR_MASK) as *mut CountedCell<T>,
        mark: word & MARK_BIT != 0,
        access: word >> ACCESS_SHIFT,
    }
}

/// Atomic, markable reference to a counted cell.
///
/// Occupancy owns one internal reference on the cell. All operations are
/// lock-free; `mark` is a single best-effort CAS.
pub(crate) struct AtomicHandle<T> {
    word: AtomicU64,
    _marker: PhantomData<CountedCell<T>>,
}

impl<T> AtomicHandle<T> {
    /// An empty slot.
    pub(crate) fn new() -> Self {
        AtomicHandle {
            word: AtomicU64::new(0),
            _marker: PhantomData,
        }
    }

    /// A slot initially holding `handle`, absorbing its reference.
    #[cfg(test)]
    pub(crate) fn from_handle(handle: Handle<T>) -> Self {
        let (ptr, mark) = handle.into_raw_parts();
        AtomicHandle {
            word: AtomicU64::new(encode(SlotWord {
                ptr,
                mark,
                access: 0,
            })),
            _marker: PhantomData,
        }
    }

    /// Reserved load: returns a strong handle carrying the slot's pointer
    /// and mark. Never blocks; the reservation makes the window between
    /// observing the pointer and owning a reference safe.
    pub(crate) fn load(&self) -> Handle<T> {
        let reservation = Reservation::acquire(self);
        reservation.to_handle()
    }

    /// Reads the mark bit only. Used by traversals to recognize logically
    /// deleted nodes without paying for a reservation.
    #[inline]
    pub(crate) fn is_marked(&self) -> bool {
        decode::<T>(self.word.load(Ordering::SeqCst)).mark
    }

    /// Replaces the slot content, consuming `new`. The displaced cell loses
    /// the slot's reference and absorbs every outstanding reservation.
    pub(crate) fn store(&self, new: Handle<T>) {
        let (ptr, mark) = new.into_raw_parts();
        let old = decode::<T>(self.word.swap(
            encode(SlotWord {
                ptr,
                mark,
                access: 0,
            }),
            Ordering::SeqCst,
        ));
        if !old.ptr.is_null() {
            // SAFETY: the word owned one internal reference and
            // `old.access` reservations; both transfers are ours to apply.
            unsafe { CountedCell::modify(old.ptr, -1, old.access as i32) };
        }
    }

    /// As [`store`](Self::store), but returns a handle to the displaced
    /// cell.
    pub(crate) fn exchange(&self, new: Handle<T>) -> Handle<T> {
        let (ptr, mark) = new.into_raw_parts();
        let old = decode::<T>(self.word.swap(
            encode(SlotWord {
                ptr,
                mark,
                access: 0,
            }),
            Ordering::SeqCst,
        ));
        if old.ptr.is_null() {
            return Handle::from_raw_parts(core::ptr::null_mut(), old.mark);
        }
        // SAFETY: the displaced word still backs one internal reference, so
        // the cell is live; mint the outgoing handle before releasing it.
        let result = unsafe { Handle::from_cell_bump(old.ptr, old.mark) };
        // SAFETY: as in `store`.
        unsafe { CountedCell::modify(old.ptr, -1, old.access as i32) };
        result
    }

    /// One compare-exchange attempt.
    ///
    /// Compares cell identity only. On success the slot takes `new`'s
    /// reference and the displaced cell absorbs the other readers'
    /// reservations (the caller's own reservation vanished with the word).
    /// On failure `expected` is refreshed from the slot and `new` is handed
    /// back. Like a hardware weak CAS, this may fail even when the cell
    /// matches, e.g. on access-count churn.
    pub(crate) fn compare_exchange_weak(
        &self,
        expected: &mut Handle<T>,
        new: Handle<T>,
    ) -> Result<(), Handle<T>> {
        let mut reservation = Reservation::acquire(self);
        if reservation.val.ptr != expected.cell_ptr() {
            *expected = reservation.to_handle();
            return Err(new);
        }
        let observed = encode(reservation.val);
        let (new_ptr, new_mark) = (new.cell_ptr(), new.mark());
        let desired = encode(SlotWord {
            ptr: new_ptr,
            mark: new_mark,
            access: 0,
        });
        match self
            .word
            .compare_exchange_weak(observed, desired, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                if !reservation.val.ptr.is_null() {
                    // The displaced word carried our reservation plus any
                    // concurrent readers'; only theirs move to the cell.
                    // SAFETY: the word owned one internal reference and
                    // `access` reservations, one of which was ours.
                    unsafe {
                        CountedCell::modify(
                            reservation.val.ptr,
                            -1,
                            reservation.val.access as i32 - 1,
                        )
                    };
                    reservation.consume();
                }
                let _ = new.into_raw_parts();
                Ok(())
            }
            Err(_) => {
                drop(reservation);
                let fresh = Reservation::acquire(self);
                *expected = fresh.to_handle();
                Err(new)
            }
        }
    }

    /// Retrying compare-exchange. Fails only once `expected` has been
    /// observed to differ, in pointer or mark, from the originally passed
    /// value; reservation churn alone retries.
    pub(crate) fn compare_exchange_strong(
        &self,
        expected: &mut Handle<T>,
        new: Handle<T>,
    ) -> Result<(), Handle<T>> {
        let original = (expected.cell_ptr(), expected.mark());
        let mut new = new;
        loop {
            match self.compare_exchange_weak(expected, new) {
                Ok(()) => return Ok(()),
                Err(handed_back) => {
                    if (expected.cell_ptr(), expected.mark()) != original {
                        return Err(handed_back);
                    }
                    new = handed_back;
                }
            }
        }
    }

    /// Best-effort write of the mark bit, preserving pointer and access
    /// count. Not retried: a concurrent displacement makes the mark moot,
    /// and traversals re-observe the slot anyway.
    pub(crate) fn mark(&self, value: bool) {
        let observed = self.word.load(Ordering::SeqCst);
        let word = decode::<T>(observed);
        let _ = self.word.compare_exchange_weak(
            observed,
            encode(SlotWord { mark: value, ..word }),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

impl<T> Drop for AtomicHandle<T> {
    fn drop(&mut self) {
        let word = decode::<T>(self.word.load(Ordering::SeqCst));
        if !word.ptr.is_null() {
            debug_assert_eq!(word.access, 0, "slot dropped with active reservations");
            // SAFETY: exclusive access; release the slot's own reference.
            unsafe { CountedCell::modify(word.ptr, -1, 0) };
        }
    }
}

impl<T> fmt::Debug for AtomicHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = decode::<T>(self.word.load(Ordering::SeqCst));
        f.debug_struct("AtomicHandle")
            .field("cell", &word.ptr)
            .field("mark", &word.mark)
            .field("access", &word.access)
            .finish()
    }
}

// SAFETY: same sharing regime as Handle; the packed word is only touched
// through atomics.
unsafe impl<T: Send + Sync> Send for AtomicHandle<T> {}
unsafe impl<T: Send + Sync> Sync for AtomicHandle<T> {}

/// An in-flight reservation against a slot's current cell.
///
/// Holding one guarantees the observed cell stays live: either the slot
/// word still carries the reservation, or a displacing writer has credited
/// it to the cell's external count. Dropping releases whichever form it is
/// in at that moment.
struct Reservation<'a, T> {
    slot: &'a AtomicHandle<T>,
    val: SlotWord<T>,
    active: bool,
}

impl<'a, T> Reservation<'a, T> {
    fn acquire(slot: &'a AtomicHandle<T>) -> Self {
        let mut observed = slot.word.load(Ordering::SeqCst);
        loop {
            let word = decode::<T>(observed);
            if word.ptr.is_null() {
                return Reservation {
                    slot,
                    val: word,
                    active: false,
                };
            }
            assert!(
                word.access < ACCESS_LIMIT,
                "slot reservation count exhausted"
            );
            let reserved = SlotWord {
                access: word.access + 1,
                ..word
            };
            match slot.word.compare_exchange_weak(
                observed,
                encode(reserved),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Reservation {
                        slot,
                        val: reserved,
                        active: true,
                    }
                }
                Err(current) => observed = current,
            }
        }
    }

    /// Builds a strong handle carrying the reserved pointer and mark.
    fn to_handle(&self) -> Handle<T> {
        if self.val.ptr.is_null() {
            Handle::from_raw_parts(core::ptr::null_mut(), self.val.mark)
        } else {
            // SAFETY: the reservation keeps the cell live.
            unsafe { Handle::from_cell_bump(self.val.ptr, self.val.mark) }
        }
    }

    /// The reservation went away together with the slot word (a successful
    /// compare-exchange by this thread); nothing left to release.
    fn consume(&mut self) {
        self.active = false;
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        let mut observed = encode(self.val);
        loop {
            let word = decode::<T>(observed);
            if word.ptr != self.val.ptr || word.access == 0 {
                // A writer displaced the word (and possibly the same cell
                // was reinstalled afterwards); our claim now lives in the
                // cell's external count.
                // SAFETY: the transferred reservation keeps the cell live.
                unsafe { CountedCell::modify(self.val.ptr, 0, -1) };
                return;
            }
            let released = SlotWord {
                access: word.access - 1,
                ..word
            };
            match self.slot.word.compare_exchange_weak(
                observed,
                encode(released),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(current) => observed = current,
            }
        }
    }
}

impl<T> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        self.release();
    }
}
