//! `FastFair` - the tree over the pool.
//!
//! The tree itself is two persistent words: the root offset and the height,
//! living in the pool's root object. Everything else is descent and
//! publication:
//!
//! - Descent is lock-free. Each internal node picks a child optimistically;
//!   a key that has crossed an unpropagated split is chased through sibling
//!   pointers instead of restarting.
//! - Mutation locks exactly one node. A split builds its new sibling while
//!   it is unreachable, persists it, links it into the sibling chain, and
//!   only then tells the parent - so a crash between those steps leaves a
//!   two-node run that readers cross via the chain, not a broken tree.
//! - A writer that finds its target merged away (`is_deleted`) re-descends
//!   from the root.

use std::path::Path;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::atomic::{AtomicU32, AtomicU64};

use crate::error::Result;
use crate::lock::{LockTable, NodeGuard};
use crate::node::{
    is_forward, Key, LeafSearch, Page, Value, CARDINALITY, ENTRY_SIZE, HEADER_SIZE, PAGE_SIZE,
};
use crate::pool::{Pool, NULL_OFF};

/// Merge/redistribute on deletion below half occupancy.
///
/// The machinery is implemented but ships disabled: slots freed by deletes
/// are reclaimed by later inserts, and skipping the rebalance keeps every
/// delete a single-node operation.
const REBALANCE_ON_DELETE: bool = false;

// ============================================================================
//  TreeMeta
// ============================================================================

/// Persistent tree metadata, stored in the pool's root object.
#[repr(C)]
struct TreeMeta {
    /// Offset of the root node. Flushed on every change.
    root: AtomicU64,

    /// Levels in the tree. Recomputed from the root's level on reopen, so
    /// a crash between a root flush and a height bump cannot mislead.
    height: AtomicU32,

    _pad: u32,
}

// ============================================================================
//  FastFair
// ============================================================================

/// A concurrent, crash-consistent persistent B+-tree.
///
/// Keys are `i64`, values are non-zero `u64` (zero is the on-media null
/// terminator). Lookups and range scans take no locks; inserts and deletes
/// lock one node at a time. All node state lives in the pool file; the
/// tree handle only adds the DRAM lock table, so dropping it and reopening
/// the same file yields the same tree.
#[derive(Debug)]
pub struct FastFair {
    pool: Pool,
    locks: LockTable,
}

impl FastFair {
    /// Open-or-create a tree in the pool file at `path`.
    ///
    /// A fresh pool gets an empty leaf as its root. Reopening validates the
    /// pool and rebuilds the volatile side (locks, height); `size` applies
    /// only to creation.
    ///
    /// # Errors
    ///
    /// [`crate::Error::PoolUnavailable`] or [`crate::Error::InvalidPool`]
    /// when the file cannot serve as a pool.
    pub fn open<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        let pool = Pool::open(path, size)?;
        let tree = Self {
            pool,
            locks: LockTable::new(),
        };

        let meta: &TreeMeta = tree.meta();

        if meta.root.load(Acquire) == NULL_OFF {
            let root_off: u64 = tree.pool.alloc_zeroed(PAGE_SIZE)?;
            let root: &Page = tree.page(root_off);
            root.init(0);
            tree.pool.persist(root as *const Page as usize, PAGE_SIZE);

            meta.root.store(root_off, Release);
            tree.pool
                .persist(&meta.root as *const AtomicU64 as usize, 8);
            meta.height.store(1, Relaxed);

            #[cfg(feature = "tracing")]
            tracing::debug!(root = root_off, "initialised empty tree");
        } else {
            let root: &Page = tree.page(meta.root.load(Acquire));
            meta.height.store(root.level() + 1, Relaxed);

            #[cfg(feature = "tracing")]
            tracing::debug!(height = root.level() + 1, "recovered tree");
        }

        Ok(tree)
    }

    #[inline]
    fn meta(&self) -> &TreeMeta {
        self.pool
            .object(self.pool.root(std::mem::size_of::<TreeMeta>()))
    }

    #[inline]
    fn page(&self, off: u64) -> &Page {
        Page::at(&self.pool, off)
    }

    /// Number of levels in the tree.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.meta().height.load(Relaxed)
    }

    // ------------------------------------------------------------------
    //  Public operations
    // ------------------------------------------------------------------

    /// Insert `(key, value)`.
    ///
    /// `value` must be non-zero; zero is the on-media null terminator.
    /// A duplicate key is stored as an additional entry, mirroring the
    /// append-only discipline of the node layout.
    ///
    /// # Errors
    ///
    /// [`crate::Error::OutOfSpace`] when the pool cannot fit a split. The
    /// tree stays well-formed.
    pub fn insert(&self, key: Key, value: Value) -> Result<()> {
        debug_assert_ne!(value, 0, "value 0 is reserved as the null terminator");

        loop {
            let mut off: u64 = self.meta().root.load(Acquire);
            let mut page: &Page = self.page(off);

            while !page.is_leaf() {
                off = page.linear_search_internal(&self.pool, key);
                page = self.page(off);
            }

            if self.store(off, key, value)?.is_some() {
                return Ok(());
            }
            // The leaf was merged away between descent and locking.
            #[cfg(feature = "tracing")]
            tracing::trace!(key, "insert re-descending after deleted leaf");
        }
    }

    /// Look up `key`. Lock-free.
    #[must_use]
    pub fn search(&self, key: Key) -> Option<Value> {
        let mut off: u64 = self.meta().root.load(Acquire);
        let mut page: &Page = self.page(off);

        while !page.is_leaf() {
            off = page.linear_search_internal(&self.pool, key);
            page = self.page(off);
        }

        loop {
            match page.linear_search(&self.pool, key) {
                LeafSearch::Found(value) => return Some(value),

                // The key migrated right across a split the parent has not
                // absorbed yet.
                LeafSearch::MovedRight(sibling) => page = self.page(sibling),

                LeafSearch::NotFound => return None,
            }
        }
    }

    /// Delete `key`. Returns `false` when the key is absent.
    ///
    /// # Errors
    ///
    /// [`crate::Error::OutOfSpace`] only with rebalancing enabled, when a
    /// redistribution needs a fresh node.
    pub fn remove(&self, key: Key) -> Result<bool> {
        loop {
            let mut off: u64 = self.meta().root.load(Acquire);
            let mut page: &Page = self.page(off);

            while !page.is_leaf() {
                off = page.linear_search_internal(&self.pool, key);
                page = self.page(off);
            }

            let present: bool = loop {
                match page.linear_search(&self.pool, key) {
                    LeafSearch::Found(_) => break true,

                    LeafSearch::MovedRight(sibling) => {
                        off = sibling;
                        page = self.page(sibling);
                    }

                    LeafSearch::NotFound => break false,
                }
            };

            if !present {
                return Ok(false);
            }

            let removed: bool = if REBALANCE_ON_DELETE {
                self.remove_entry(off, key)?
            } else {
                self.remove_simple(off, key, true)
            };

            if removed {
                return Ok(true);
            }
            // Lost a race with a split or a concurrent delete.
            #[cfg(feature = "tracing")]
            tracing::trace!(key, "remove re-descending after lost race");
        }
    }

    /// Collect the values of all keys in `[min, max)` into `buf`, ascending
    /// by key. Lock-free; returns the number of values appended.
    ///
    /// Concurrent splits may momentarily duplicate an entry across two
    /// nodes; the in-flight filter inside the scan drops those.
    pub fn range(&self, min: Key, max: Key, buf: &mut Vec<Value>) -> usize {
        let before: usize = buf.len();

        let mut off: u64 = self.meta().root.load(Acquire);
        let mut page: &Page = self.page(off);

        while !page.is_leaf() {
            off = page.linear_search_internal(&self.pool, min);
            page = self.page(off);
        }

        page.linear_search_range(&self.pool, min, max, buf);

        buf.len() - before
    }

    // ------------------------------------------------------------------
    //  Store (FAST insert + FAIR split)
    // ------------------------------------------------------------------

    /// Publish a new root and bump the height. Only the thread that split
    /// the old root reaches this, under that node's still-held lock.
    fn set_new_root(&self, new_root: u64) {
        let meta: &TreeMeta = self.meta();
        meta.root.store(new_root, Release);
        self.pool
            .persist(&meta.root as *const AtomicU64 as usize, 8);
        meta.height.fetch_add(1, Relaxed);

        #[cfg(feature = "tracing")]
        tracing::debug!(root = new_root, "root split");
    }

    /// Insert `(key, right)` into the node at `start_off` or, after chasing
    /// splits, a right sibling. Returns the offset that took the entry, or
    /// `None` when the target was merged away and the caller must
    /// re-descend.
    fn store(&self, start_off: u64, key: Key, right: u64) -> Result<Option<u64>> {
        let mut node_off: u64 = start_off;

        loop {
            let page: &Page = self.page(node_off);
            let guard: NodeGuard = self.locks.lock(node_off);

            if page.is_deleted() {
                drop(guard);
                return Ok(None);
            }

            // The covered range may have moved right while we descended.
            let sibling: u64 = page.sibling();
            if sibling != NULL_OFF && key > self.page(sibling).first_key() {
                drop(guard);
                node_off = sibling;
                continue;
            }

            let mut num_entries: usize = page.count();

            if num_entries < CARDINALITY - 1 {
                page.insert_key(key, right, &mut num_entries, true, true);
                drop(guard);
                return Ok(Some(node_off));
            }

            return self.split_store(page, node_off, guard, key, right, num_entries);
        }
    }

    /// Split a full node and place `(key, right)` on the proper side.
    ///
    /// Persistence order is what makes the split failure-atomic: the
    /// sibling is fully durable before it is linked, the link is durable
    /// before the truncation, and the parent learns about the split last.
    /// A crash anywhere in between leaves both halves reachable through
    /// the sibling chain.
    fn split_store(
        &self,
        page: &Page,
        node_off: u64,
        guard: NodeGuard,
        key: Key,
        right: u64,
        num_entries: usize,
    ) -> Result<Option<u64>> {
        let sibling_off: u64 = self.pool.alloc_zeroed(PAGE_SIZE)?;
        let sibling: &Page = self.page(sibling_off);
        sibling.init(page.level());

        let m: usize = num_entries.div_ceil(2);
        let split_key: Key = page.records[m].key.load(Relaxed);

        #[cfg(feature = "tracing")]
        tracing::trace!(node = node_off, sibling = sibling_off, split_key, "split");

        // Migrate the upper half while the sibling is unreachable; no
        // per-entry flushes, the node is persisted wholesale below.
        let mut sibling_cnt: usize = 0;
        if page.is_leaf() {
            for i in m..num_entries {
                sibling.insert_key(
                    page.records[i].key.load(Relaxed),
                    page.records[i].ptr.load(Relaxed),
                    &mut sibling_cnt,
                    false,
                    true,
                );
            }
        } else {
            for i in (m + 1)..num_entries {
                sibling.insert_key(
                    page.records[i].key.load(Relaxed),
                    page.records[i].ptr.load(Relaxed),
                    &mut sibling_cnt,
                    false,
                    true,
                );
            }
            sibling
                .hdr
                .leftmost
                .store(page.records[m].ptr.load(Relaxed), Release);
        }

        sibling.hdr.sibling.store(page.sibling(), Release);
        self.pool.persist(sibling as *const Page as usize, PAGE_SIZE);

        page.hdr.sibling.store(sibling_off, Release);
        self.pool.persist(&page.hdr as *const _ as usize, HEADER_SIZE);

        // Truncate under forward parity so readers cross the shrinking
        // node with the terminator they expect.
        let counter: u8 = page.hdr.switch_counter.load(Relaxed);
        let bumped: u8 = if is_forward(counter) {
            counter.wrapping_add(2)
        } else {
            counter.wrapping_add(1)
        };
        page.hdr.switch_counter.store(bumped, Release);

        page.records[m].ptr.store(NULL_OFF, Release);
        self.pool
            .persist(&page.records[m] as *const _ as usize, ENTRY_SIZE);

        page.hdr.last_index.store((m - 1) as i16, Release);
        self.pool
            .persist(&page.hdr.last_index as *const _ as usize, 2);

        let ret: u64 = if key < split_key {
            let mut num: usize = m;
            page.insert_key(key, right, &mut num, true, true);
            node_off
        } else {
            sibling.insert_key(key, right, &mut sibling_cnt, true, true);
            sibling_off
        };

        // Tell the world: a new root under this lock, or the parent after
        // releasing it.
        if self.meta().root.load(Acquire) == node_off {
            let new_root_off: u64 = self.pool.alloc_zeroed(PAGE_SIZE)?;
            self.page(new_root_off)
                .init_root(node_off, split_key, sibling_off, page.level() + 1);
            self.set_new_root(new_root_off);
            drop(guard);
        } else {
            let level: u32 = page.level() + 1;
            drop(guard);
            self.insert_internal(split_key, sibling_off, level)?;
        }

        Ok(Some(ret))
    }

    /// Insert a separator produced by a split into the ancestor level.
    ///
    /// No-ops when `level` exceeds the root's: the root split that creates
    /// that level has already run and recorded the separator.
    fn insert_internal(&self, key: Key, right: u64, level: u32) -> Result<()> {
        loop {
            let root_off: u64 = self.meta().root.load(Acquire);
            if level > self.page(root_off).level() {
                return Ok(());
            }

            let mut off: u64 = root_off;
            let mut page: &Page = self.page(off);
            while page.level() > level {
                off = page.linear_search_internal(&self.pool, key);
                page = self.page(off);
            }

            if self.store(off, key, right)?.is_some() {
                return Ok(());
            }
        }
    }

    // ------------------------------------------------------------------
    //  Deletion with rebalancing
    // ------------------------------------------------------------------

    /// Remove the separator pointing at `child` from its parent at `level`.
    ///
    /// Returns the removed separator key, whether `child` is its parent's
    /// leftmost descendant (which never merges left), and the offset of
    /// the child's left neighbour as recorded in the parent.
    fn delete_internal(&self, key: Key, child: u64, level: u32) -> Result<(Key, bool, u64)> {
        let root_off: u64 = self.meta().root.load(Acquire);
        if level > self.page(root_off).level() {
            return Ok((0, false, NULL_OFF));
        }

        let mut off: u64 = root_off;
        let mut page: &Page = self.page(off);
        while page.level() > level {
            off = page.linear_search_internal(&self.pool, key);
            page = self.page(off);
        }

        let guard: NodeGuard = self.locks.lock(off);

        if page.leftmost() == child {
            drop(guard);
            return Ok((0, true, NULL_OFF));
        }

        let mut deleted_key: Key = 0;
        let mut left_sibling: u64 = NULL_OFF;

        let mut i: usize = 0;
        while i < CARDINALITY && page.records[i].ptr.load(Relaxed) != NULL_OFF {
            if page.records[i].ptr.load(Relaxed) == child {
                let prev: u64 = if i == 0 {
                    page.leftmost()
                } else {
                    page.records[i - 1].ptr.load(Relaxed)
                };

                // A pointer equal to its predecessor is mid-shift; the
                // real slot for this child is further right.
                if prev != page.records[i].ptr.load(Relaxed) {
                    deleted_key = page.records[i].key.load(Relaxed);
                    left_sibling = prev;
                    // One separator comes out of this parent, full stop -
                    // the parent's own occupancy is not revisited here.
                    self.remove_simple(off, deleted_key, false);
                    break;
                }
            }
            i += 1;
        }

        drop(guard);
        Ok((deleted_key, false, left_sibling))
    }

    /// Strip `key` from the node at `node_off` and stop: no occupancy
    /// check, no rebalancing, regardless of configuration.
    ///
    /// `with_lock` is false when the caller already holds the node, as
    /// `delete_internal` does for the parent it is fixing up.
    fn remove_simple(&self, node_off: u64, key: Key, with_lock: bool) -> bool {
        let page: &Page = self.page(node_off);
        let _guard: Option<NodeGuard> = with_lock.then(|| self.locks.lock(node_off));

        page.remove_key(key)
    }

    /// Deletion with merge/redistribution.
    ///
    /// Strips the key like [`Self::remove_simple`]; when that leaves the
    /// node below half occupancy, it additionally pulls its separator out
    /// of the parent, finds its left neighbour by walking the sibling
    /// chain hand-over-hand, and either merges into it or redistributes
    /// around a fresh midpoint. Separator removal in ancestors is always
    /// the plain strip - underflow never cascades upward.
    fn remove_entry(&self, node_off: u64, key: Key) -> Result<bool> {
        let page: &Page = self.page(node_off);
        let guard: NodeGuard = self.locks.lock(node_off);

        if page.is_deleted() {
            return Ok(false);
        }

        let meta: &TreeMeta = self.meta();

        let num_entries_before: usize = page.count();

        if node_off == meta.root.load(Acquire) {
            // Root collapse: promote the only remaining child.
            if page.level() > 0 && num_entries_before == 1 && page.sibling() == NULL_OFF {
                meta.root.store(page.leftmost(), Release);
                self.pool
                    .persist(&meta.root as *const AtomicU64 as usize, 8);
                page.hdr.is_deleted.store(1, Release);

                #[cfg(feature = "tracing")]
                tracing::debug!(promoted = page.leftmost(), "root collapsed");
            }

            let _ = page.remove_key(key);
            return Ok(true);
        }

        let should_rebalance: bool =
            num_entries_before.saturating_sub(1) < (CARDINALITY - 1) / 2;

        let removed: bool = page.remove_key(key);

        if !should_rebalance {
            return Ok(if page.is_leaf() { removed } else { true });
        }

        let (deleted_key_from_parent, is_leftmost, mut left_off) =
            self.delete_internal(key, node_off, page.level() + 1)?;

        if is_leftmost {
            drop(guard);

            // The leftmost child never merges left; give up its underflow
            // and strip the right sibling's boundary key instead.
            let sibling_off: u64 = page.sibling();
            if sibling_off != NULL_OFF {
                let first: Key = self.page(sibling_off).first_key();
                self.remove_simple(sibling_off, first, true);
            }

            return Ok(true);
        }

        if left_off == NULL_OFF {
            // The parent no longer records this child; a concurrent
            // reshape got here first.
            #[cfg(feature = "tracing")]
            tracing::warn!(node = node_off, "rebalance target lost its parent slot");
            return Ok(true);
        }

        let mut left_guard: NodeGuard = self.locks.lock(left_off);
        let mut left: &Page = self.page(left_off);

        // The parent's record of our neighbour may lag behind splits;
        // walk right until the chain actually reaches us.
        while left.sibling() != node_off {
            let next: u64 = left.sibling();
            drop(left_guard);
            left_guard = self.locks.lock(next);
            left_off = next;
            left = self.page(left_off);
        }

        let num_entries: usize = page.count();
        let left_num_entries: usize = left.count();

        let mut total_num_entries: usize = num_entries + left_num_entries;
        if page.leftmost() != NULL_OFF {
            total_num_entries += 1;
        }

        if total_num_entries > CARDINALITY - 1 {
            self.redistribute(
                page,
                node_off,
                left,
                left_off,
                num_entries,
                left_num_entries,
                total_num_entries,
                deleted_key_from_parent,
            )?;
        } else {
            // Merge into the left sibling, then unlink.
            page.hdr.is_deleted.store(1, Release);
            self.pool
                .persist(&page.hdr.is_deleted as *const _ as usize, 1);

            let mut left_num: usize = left_num_entries;

            if page.leftmost() != NULL_OFF {
                left.insert_key(
                    deleted_key_from_parent,
                    page.leftmost(),
                    &mut left_num,
                    true,
                    true,
                );
            }

            let mut i: usize = 0;
            while i < CARDINALITY && page.records[i].ptr.load(Relaxed) != NULL_OFF {
                left.insert_key(
                    page.records[i].key.load(Relaxed),
                    page.records[i].ptr.load(Relaxed),
                    &mut left_num,
                    true,
                    true,
                );
                i += 1;
            }

            left.hdr.sibling.store(page.sibling(), Release);
            self.pool
                .persist(&left.hdr.sibling as *const AtomicU64 as usize, 8);

            #[cfg(feature = "tracing")]
            tracing::debug!(merged = node_off, into = left_off, "merge");
        }

        drop(left_guard);
        drop(guard);
        Ok(true)
    }

    /// Redistribute entries between an underflowing node and its heavier
    /// left sibling around a fresh midpoint.
    #[allow(clippy::too_many_arguments)]
    fn redistribute(
        &self,
        page: &Page,
        node_off: u64,
        left: &Page,
        left_off: u64,
        num_entries: usize,
        left_num_entries: usize,
        total_num_entries: usize,
        deleted_key_from_parent: Key,
    ) -> Result<()> {
        let meta: &TreeMeta = self.meta();
        let m: usize = total_num_entries.div_ceil(2);

        if num_entries < left_num_entries {
            // Left is heavier: pull its tail over and re-seat the separator.
            let mut num: usize = num_entries;
            let parent_key: Key;

            if page.is_leaf() {
                for i in (m..left_num_entries).rev() {
                    page.insert_key(
                        left.records[i].key.load(Relaxed),
                        left.records[i].ptr.load(Relaxed),
                        &mut num,
                        true,
                        true,
                    );
                }

                left.records[m].ptr.store(NULL_OFF, Release);
                self.pool
                    .persist(&left.records[m].ptr as *const AtomicU64 as usize, 8);

                left.hdr.last_index.store((m - 1) as i16, Release);
                self.pool
                    .persist(&left.hdr.last_index as *const _ as usize, 2);

                parent_key = page.first_key();
            } else {
                page.insert_key(deleted_key_from_parent, page.leftmost(), &mut num, true, true);

                for i in ((m + 1)..left_num_entries).rev() {
                    page.insert_key(
                        left.records[i].key.load(Relaxed),
                        left.records[i].ptr.load(Relaxed),
                        &mut num,
                        true,
                        true,
                    );
                }

                parent_key = left.records[m].key.load(Relaxed);

                page.hdr
                    .leftmost
                    .store(left.records[m].ptr.load(Relaxed), Release);
                self.pool
                    .persist(&page.hdr.leftmost as *const AtomicU64 as usize, 8);

                left.records[m].ptr.store(NULL_OFF, Release);
                self.pool
                    .persist(&left.records[m].ptr as *const AtomicU64 as usize, 8);

                left.hdr.last_index.store((m - 1) as i16, Release);
                self.pool
                    .persist(&left.hdr.last_index as *const _ as usize, 2);
            }

            if left_off == meta.root.load(Acquire) {
                let new_root_off: u64 = self.pool.alloc_zeroed(PAGE_SIZE)?;
                self.page(new_root_off)
                    .init_root(left_off, parent_key, node_off, page.level() + 1);
                self.set_new_root(new_root_off);
            } else {
                self.insert_internal(parent_key, node_off, page.level() + 1)?;
            }
        } else {
            // This side is heavier: retire the node and rebuild its upper
            // part as a fresh sibling of the (grown) left node.
            page.hdr.is_deleted.store(1, Release);
            self.pool
                .persist(&page.hdr.is_deleted as *const _ as usize, 1);

            let new_sibling_off: u64 = self.pool.alloc_zeroed(PAGE_SIZE)?;
            let new_sibling: &Page = self.page(new_sibling_off);
            new_sibling.init(page.level());
            let ns_guard: NodeGuard = self.locks.lock(new_sibling_off);

            new_sibling.hdr.sibling.store(page.sibling(), Release);

            let num_dist_entries: usize = num_entries.saturating_sub(m);
            debug_assert!(num_dist_entries > 0 || page.is_leaf());
            let mut new_sibling_cnt: usize = 0;
            let mut left_num: usize = left_num_entries;
            let parent_key: Key;

            if page.is_leaf() {
                for i in 0..num_dist_entries {
                    left.insert_key(
                        page.records[i].key.load(Relaxed),
                        page.records[i].ptr.load(Relaxed),
                        &mut left_num,
                        true,
                        true,
                    );
                }

                let mut i: usize = num_dist_entries;
                while i < CARDINALITY && page.records[i].ptr.load(Relaxed) != NULL_OFF {
                    new_sibling.insert_key(
                        page.records[i].key.load(Relaxed),
                        page.records[i].ptr.load(Relaxed),
                        &mut new_sibling_cnt,
                        false,
                        true,
                    );
                    i += 1;
                }

                self.pool
                    .persist(new_sibling as *const Page as usize, PAGE_SIZE);

                left.hdr.sibling.store(new_sibling_off, Release);
                self.pool
                    .persist(&left.hdr.sibling as *const AtomicU64 as usize, 8);

                parent_key = new_sibling.first_key();
            } else {
                left.insert_key(
                    deleted_key_from_parent,
                    page.leftmost(),
                    &mut left_num,
                    true,
                    true,
                );

                for i in 0..(num_dist_entries - 1) {
                    left.insert_key(
                        page.records[i].key.load(Relaxed),
                        page.records[i].ptr.load(Relaxed),
                        &mut left_num,
                        true,
                        true,
                    );
                }

                parent_key = page.records[num_dist_entries - 1].key.load(Relaxed);

                new_sibling.hdr.leftmost.store(
                    page.records[num_dist_entries - 1].ptr.load(Relaxed),
                    Release,
                );

                let mut i: usize = num_dist_entries;
                while i < CARDINALITY && page.records[i].ptr.load(Relaxed) != NULL_OFF {
                    new_sibling.insert_key(
                        page.records[i].key.load(Relaxed),
                        page.records[i].ptr.load(Relaxed),
                        &mut new_sibling_cnt,
                        false,
                        true,
                    );
                    i += 1;
                }

                self.pool
                    .persist(new_sibling as *const Page as usize, PAGE_SIZE);

                left.hdr.sibling.store(new_sibling_off, Release);
                self.pool
                    .persist(&left.hdr.sibling as *const AtomicU64 as usize, 8);
            }

            if left_off == meta.root.load(Acquire) {
                let new_root_off: u64 = self.pool.alloc_zeroed(PAGE_SIZE)?;
                self.page(new_root_off).init_root(
                    left_off,
                    parent_key,
                    new_sibling_off,
                    page.level() + 1,
                );
                self.set_new_root(new_root_off);
            } else {
                self.insert_internal(parent_key, new_sibling_off, page.level() + 1)?;
            }

            drop(ns_guard);
        }

        Ok(())
    }
}

// ============================================================================
//  Tests
// ============================================================================
