//! Bucket list: timestamped nodes traversed by a pruning cursor.
//!
//! Each bucket is a singly linked list anchored at one [`AtomicHandle`].
//! Deletion follows Harris's two-step scheme: a node is *logically* deleted
//! by marking its outgoing `next` slot, then *physically* unlinked when some
//! traversal CASes the predecessor link past it. There is no dedicated
//! collector; every cursor prunes what it walks over, so a node that is
//! marked or has outlived `life` ticks disappears before any traversal past
//! it completes.
//!
//! **Note**: This module is internal infrastructure. It exposes raw pointer
//! operations that require careful invariant maintenance; the cache facade
//! is the supported surface.

use core::marker::PhantomData;

use crate::entry::CacheEntry;
use crate::handle::Handle;
use crate::slot::AtomicHandle;

/// A list node binding a shared entry to its creation tick.
///
/// `data` and `stamp` are immutable; all mutation funnels through the
/// atomic `next` slot. A refresh never touches an existing node, it appends
/// a younger one sharing the same `data` handle.
pub(crate) struct Node<K, V> {
    /// Shared entry; identical (by handle) across refreshed copies.
    pub(crate) data: Handle<CacheEntry<K, V>>,
    /// Link to the next node. Its mark bit is this node's deletion flag.
    pub(crate) next: AtomicHandle<Node<K, V>>,
    /// Tick at which this node was appended.
    pub(crate) stamp: u64,
}

impl<K, V> Node<K, V> {
    pub(crate) fn new(data: Handle<CacheEntry<K, V>>, stamp: u64) -> Self {
        Node {
            data,
            next: AtomicHandle::new(),
            stamp,
        }
    }
}

/// Traversal position inside one bucket.
///
/// `owner` is the slot under inspection: the bucket head at first, then the
/// `next` slot of `holder`. `current` is the handle most recently loaded
/// from `owner`; its mark bit is the mark of the link the cursor followed.
///
/// # Safety
///
/// `owner` is a raw pointer because it aliases either the bucket head
/// (outliving the cursor via `'a`) or a slot inside the node that `holder`
/// keeps alive. It is re-derived every time `holder` changes and never
/// dereferenced after `holder` is dropped.
pub(crate) struct Cursor<'a, K, V> {
    holder: Handle<Node<K, V>>,
    owner: *const AtomicHandle<Node<K, V>>,
    current: Handle<Node<K, V>>,
    now: u64,
    life: u64,
    unlinked: u64,
    _head: PhantomData<&'a AtomicHandle<Node<K, V>>>,
}

impl<'a, K, V> Cursor<'a, K, V> {
    /// Positions a cursor on the bucket head and prunes the first link, so
    /// an expired or deleted first node never serves a lookup.
    pub(crate) fn new(head: &'a AtomicHandle<Node<K, V>>, now: u64, life: u64) -> Self {
        let mut cursor = Cursor {
            holder: Handle::null(),
            owner: head,
            current: head.load(),
            now,
            life,
            unlinked: 0,
            _head: PhantomData,
        };
        if !cursor.settle() {
            cursor.advance();
        }
        cursor
    }

    /// The node under the cursor, if any.
    #[inline]
    pub(crate) fn node(&self) -> Option<&Node<K, V>> {
        if self.current.is_null() {
            None
        } else {
            Some(self.current.get())
        }
    }

    /// The entry of the node under the cursor, if any.
    #[inline]
    pub(crate) fn entry(&self) -> Option<&CacheEntry<K, V>> {
        self.node().map(|node| node.data.get())
    }

    /// A fresh handle to the current node's entry.
    pub(crate) fn data_handle(&self) -> Handle<CacheEntry<K, V>> {
        match self.node() {
            Some(node) => node.data.clone(),
            None => Handle::null(),
        }
    }

    /// Number of nodes this cursor physically unlinked so far.
    #[inline]
    pub(crate) fn unlinked(&self) -> u64 {
        self.unlinked
    }

    /// Steps to the next node, pruning as it goes. Returns whether the
    /// cursor still stands on a node.
    pub(crate) fn advance(&mut self) -> bool {
        while !self.current.is_null() {
            self.holder = self.current.take();
            // SAFETY: `holder` owns the node, keeping its `next` slot alive
            // until the next reassignment.
            self.owner = &self.holder.get().next;
            self.current = unsafe { (*self.owner).load() };
            if self.settle() {
                break;
            }
            // The doomed node could not be unlinked; step through it.
        }
        !self.current.is_null()
    }

    /// Prunes at the current position until `current` is acceptable: null,
    /// or live, unmarked and fresh. Returns `false` when a doomed node
    /// resisted removal and the cursor must step through it instead.
    fn settle(&mut self) -> bool {
        loop {
            if self.current.is_null() {
                return true;
            }
            if !self.doomed() {
                return true;
            }
            if self.remove() {
                // The predecessor link was repaired; re-read it.
                // SAFETY: `owner` is kept alive by `holder` or the bucket.
                self.current = unsafe { (*self.owner).load() };
            } else {
                return false;
            }
        }
    }

    /// A node is doomed when the link leading to it is marked (the node
    /// behind that link is gone), when its own outgoing link is marked
    /// (logically deleted), or when it has outlived `life` ticks.
    fn doomed(&self) -> bool {
        if self.current.mark() {
            return true;
        }
        let node = self.current.get();
        node.next.is_marked() || node.stamp.saturating_add(self.life) < self.now
    }

    /// Logically deletes the current node and attempts one physical unlink.
    ///
    /// Returns `false` when the predecessor link is itself marked or no
    /// longer leads to the current node; some other traversal owns the
    /// cleanup then. The unlink CAS is weak by design: a spurious failure
    /// just leaves the node for the next cursor.
    pub(crate) fn remove(&mut self) -> bool {
        if self.current.is_null() {
            return false;
        }
        let node = self.current.get();
        node.next.mark(true);
        // SAFETY: `owner` is kept alive by `holder` or the bucket.
        let mut observed = unsafe { (*self.owner).load() };
        if observed.mark() || observed != self.current {
            return false;
        }
        // Skip the whole run of logically deleted successors in one splice.
        let mut successor = node.next.load();
        while !successor.is_null() {
            let after = successor.get().next.load();
            if after.mark() {
                successor = after;
            } else {
                break;
            }
        }
        // The links walked above were all marked; the installed link must
        // not be, or the splice target would read as deleted.
        successor.set_mark(false);
        let won = unsafe { (*self.owner).compare_exchange_weak(&mut observed, successor) }.is_ok();
        if won {
            self.unlinked += 1;
        }
        won
    }

    /// Appends `node` at the end of the list. The cursor must have been
    /// advanced past the tail (`current` is null). Fails, handing the node
    /// back, when the tail slot is marked (its owner is being deleted) or
    /// when another append got there first; the caller re-walks.
    pub(crate) fn try_push(
        &mut self,
        node: Handle<Node<K, V>>,
    ) -> Result<(), Handle<Node<K, V>>> {
        debug_assert!(self.current.is_null());
        if self.current.mark() {
            return Err(node);
        }
        // SAFETY: `owner` is kept alive by `holder` or the bucket.
        unsafe { (*self.owner).compare_exchange_strong(&mut self.current, node) }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    extern crate std;
    use std::vec::Vec;

    fn entry(key: u32, value: u32) -> Handle<CacheEntry<u32, u32>> {
        Handle::new(CacheEntry::new(key, value))
    }

    fn append(head: &AtomicHandle<Node<u32, u32>>, key: u32, stamp: u64, life: u64) {
        let mut node = Handle::new(Node::new(entry(key, key * key), stamp));
        loop {
            let mut cursor = Cursor::new(head, stamp, life);
            while cursor.advance() {}
            match cursor.try_push(node) {
                Ok(()) => return,
                Err(rejected) => node = rejected,
            }
        }
    }

    fn keys(head: &AtomicHandle<Node<u32, u32>>, now: u64, life: u64) -> Vec<u32> {
        let mut out = Vec::new();
        let mut cursor = Cursor::new(head, now, life);
        loop {
            match cursor.entry() {
                Some(e) => out.push(e.key),
                None => break,
            }
            if !cursor.advance() {
                break;
            }
        }
        out
    }

    #[test]
    fn test_empty_bucket_traversal() {
        let head: AtomicHandle<Node<u32, u32>> = AtomicHandle::new();
        let cursor = Cursor::new(&head, 0, 10);
        assert!(cursor.node().is_none());
        assert!(cursor.entry().is_none());
        assert!(cursor.data_handle().is_null());
    }

    #[test]
    fn test_append_preserves_order() {
        let head = AtomicHandle::new();
        for (stamp, key) in [(0, 1), (1, 2), (2, 3)] {
            append(&head, key, stamp, 100);
        }
        assert_eq!(keys(&head, 3, 100), [1, 2, 3]);
    }

    #[test]
    fn test_push_installs_at_empty_head() {
        let head = AtomicHandle::new();
        append(&head, 7, 0, 10);
        assert_eq!(keys(&head, 0, 10), [7]);
    }

    #[test]
    fn test_remove_unlinks_current() {
        let head = AtomicHandle::new();
        for (stamp, key) in [(0, 1), (1, 2), (2, 3)] {
            append(&head, key, stamp, 100);
        }
        let mut cursor = Cursor::new(&head, 3, 100);
        cursor.advance();
        assert_eq!(cursor.entry().map(|e| e.key), Some(2));
        assert!(cursor.remove());
        assert_eq!(keys(&head, 3, 100), [1, 3]);
    }

    #[test]
    fn test_expired_nodes_are_pruned() {
        let head = AtomicHandle::new();
        for (stamp, key) in [(0, 1), (1, 2), (8, 3)] {
            append(&head, key, stamp, 4);
        }
        // The stamp-8 append already walked past the stamp-0 and stamp-1
        // nodes, which had outlived life 4 by then, and collected them.
        assert_eq!(keys(&head, 8, 4), [3]);
        // The pruning is physical: a later wide-window walk sees the same.
        assert_eq!(keys(&head, 8, 1000), [3]);
    }

    #[test]
    fn test_first_node_expiry_is_pruned_at_construction() {
        let head = AtomicHandle::new();
        append(&head, 1, 0, 2);
        append(&head, 2, 1, 2);
        // At tick 3 only the stamp-0 node is expired. The cursor must
        // collect it while settling, before serving any lookup.
        let cursor = Cursor::new(&head, 3, 2);
        assert_eq!(cursor.entry().map(|e| e.key), Some(2));
        assert_eq!(cursor.unlinked(), 1);
    }

    #[test]
    fn test_zero_life_keeps_only_same_tick_nodes() {
        let head = AtomicHandle::new();
        append(&head, 1, 0, 0);
        assert_eq!(keys(&head, 0, 0), [1]);
        assert!(keys(&head, 1, 0).is_empty());
    }

    #[test]
    fn test_push_refuses_marked_tail() {
        let head = AtomicHandle::new();
        append(&head, 1, 0, 100);
        // Mark the tail slot the way a deleter would.
        let first = head.load();
        first.get().next.mark(true);
        let mut cursor = Cursor {
            holder: first.clone(),
            owner: &first.get().next,
            current: first.get().next.load(),
            now: 0,
            life: 100,
            unlinked: 0,
            _head: PhantomData,
        };
        assert!(cursor.current.is_null());
        let node = Handle::new(Node::new(entry(9, 81), 0));
        assert!(cursor.try_push(node).is_err());
    }

    #[test]
    fn test_remove_skips_marked_run() {
        let head = AtomicHandle::new();
        for (stamp, key) in [(0, 1), (1, 2), (2, 3), (3, 4)] {
            append(&head, key, stamp, 100);
        }
        // Logically delete nodes 2 and 3 without unlinking them.
        {
            let n1 = head.load();
            let n2 = n1.get().next.load();
            let n3 = n2.get().next.load();
            n2.get().next.mark(true);
            n3.get().next.mark(true);
        }
        // Pruning node 2 from its predecessor splices past node 3 too.
        assert_eq!(keys(&head, 4, 100), [1, 4]);
    }
}
