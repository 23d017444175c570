//! Per-node writer locks.
//!
//! The on-media node header reserves a pointer-sized lock slot, but a mutex
//! handle is meaningless after a restart, so locks live entirely in DRAM: a
//! sharded table mapping node offset to its mutex, created on demand and
//! rebuilt empty on every pool open. The persistent state alone is what
//! recovery relies on.
//!
//! Guards own their mutex through an `Arc`, so a guard can outlive the
//! table borrow that produced it (writers hold a node lock while walking
//! sibling chains through the table).

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

/// A held per-node writer lock. Dropping releases it.
pub(crate) type NodeGuard = parking_lot::lock_api::ArcMutexGuard<parking_lot::RawMutex, ()>;

const SHARD_COUNT: usize = 64;

/// Sharded map from node offset to its writer mutex.
#[derive(Debug)]
pub(crate) struct LockTable {
    shards: Vec<RwLock<HashMap<u64, Arc<Mutex<()>>>>>,
}

impl LockTable {
    pub(crate) fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    #[inline]
    fn shard(&self, off: u64) -> &RwLock<HashMap<u64, Arc<Mutex<()>>>> {
        // Nodes are cache-line aligned; shift past the alignment bits so
        // neighbouring nodes spread across shards.
        &self.shards[(off >> 6) as usize % SHARD_COUNT]
    }

    /// The mutex for the node at `off`, created on first use.
    fn handle(&self, off: u64) -> Arc<Mutex<()>> {
        let shard = self.shard(off);

        if let Some(mtx) = shard.read().get(&off) {
            return Arc::clone(mtx);
        }

        Arc::clone(
            shard
                .write()
                .entry(off)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Block until the node at `off` is exclusively held.
    pub(crate) fn lock(&self, off: u64) -> NodeGuard {
        Mutex::lock_arc(&self.handle(off))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn same_offset_same_mutex() {
        let table = LockTable::new();

        let a = table.handle(4096);
        let b = table.handle(4096);
        let c = table.handle(4608);

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn lock_excludes_other_threads() {
        let table = Arc::new(LockTable::new());
        let running = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                let running = Arc::clone(&running);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let _guard = table.lock(4096);
                        let inside = running.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(inside, 0, "two threads inside one node lock");
                        running.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
    }
}
