//! Persistent pool facade over a memory-mapped file.
//!
//! One file holds everything: a header line with the allocation watermark,
//! a fixed-offset root object (the tree metadata), and the node heap. The
//! file is mapped read-write into the address space; every durable write
//! goes through [`Pool::persist`] (a fenced cache-line flush).
//!
//! # Offsets, not pointers
//!
//! The pool hands out **pool-relative byte offsets** and translates them to
//! references on every dereference. Offsets stay valid across restarts no
//! matter where the OS maps the file, so nothing here depends on reopening
//! at the same virtual address. Offset `0` is the null link.
//!
//! # Allocation discipline
//!
//! `alloc_zeroed` bumps a durable watermark and never reuses space, so a
//! fresh allocation is always zero-filled (file growth zero-fills) and a
//! crash between handing out a block and linking it merely leaks the block.
//! The watermark is flushed before the block is returned; recovery can
//! therefore never hand the same block out twice. `free` is a no-op under
//! the same discipline.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Release};
use std::sync::atomic::{AtomicU32, AtomicU64};

use memmap2::MmapMut;

use crate::error::{Error, Result};
use crate::persist::{self, CACHE_LINE_SIZE};

/// The null link value. No object is ever placed at offset zero.
pub(crate) const NULL_OFF: u64 = 0;

/// Identifies a fastfair pool file. Written last during initialisation.
const POOL_MAGIC: u64 = 0x4641_5354_4641_4952;

/// On-media format version.
const POOL_VERSION: u32 = 1;

/// Offset of the root object handed out by [`Pool::root`].
const ROOT_OFFSET: u64 = CACHE_LINE_SIZE as u64;

/// First allocatable offset. Header line and root area live below it.
const DATA_OFFSET: u64 = 4096;

// ============================================================================
//  PoolHeader
// ============================================================================

/// First cache line of the pool file.
///
/// `magic` is stored last during initialisation so a crash mid-create
/// leaves a file that fails validation instead of a half-initialised pool.
#[repr(C, align(64))]
struct PoolHeader {
    magic: AtomicU64,
    version: AtomicU32,
    _pad: u32,
    size: AtomicU64,

    /// Next free offset. Only ever grows; flushed on every bump.
    watermark: AtomicU64,
}

const _: () = assert!(std::mem::size_of::<PoolHeader>() == CACHE_LINE_SIZE);

// ============================================================================
//  Pool
// ============================================================================

/// A memory-mapped persistent pool.
///
/// All tree nodes and the tree metadata live inside the mapping. The pool
/// exposes zero-initialised allocation, the stable root object, and
/// whole-range persistence; it knows nothing about node layout.
#[derive(Debug)]
pub(crate) struct Pool {
    mmap: MmapMut,
    len: u64,
}

impl Pool {
    /// Open-or-create a pool file of `size` bytes.
    ///
    /// Creating zero-fills the file and writes the header; reopening
    /// validates magic and version and keeps the existing size (the `size`
    /// argument only applies to creation). Idempotent across restarts.
    pub(crate) fn open<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        let path: &Path = path.as_ref();

        let unavailable = |source: std::io::Error| Error::PoolUnavailable {
            path: path.to_path_buf(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(unavailable)?;

        let existing_len: u64 = file.metadata().map_err(unavailable)?.len();
        let fresh: bool = existing_len == 0;

        if fresh {
            if size < DATA_OFFSET * 2 {
                return Err(Error::InvalidPool {
                    path: path.to_path_buf(),
                });
            }
            file.set_len(size).map_err(unavailable)?;
        } else if existing_len < DATA_OFFSET {
            // Too small to even hold the header and root area.
            return Err(Error::InvalidPool {
                path: path.to_path_buf(),
            });
        }

        // SAFETY: the mapping is backed by `file`, which we keep open for
        // the lifetime of the mapping via the OS reference the map holds.
        // The file is never truncated while mapped.
        let mmap: MmapMut = unsafe { MmapMut::map_mut(&file) }.map_err(unavailable)?;

        let pool = Self {
            mmap,
            len: if fresh { size } else { existing_len },
        };

        let hdr: &PoolHeader = pool.header();

        if fresh {
            hdr.size.store(size, Release);
            hdr.watermark.store(DATA_OFFSET, Release);
            hdr.version.store(POOL_VERSION, Release);
            pool.persist(pool.base() as usize, CACHE_LINE_SIZE);

            // Magic goes durable last; a crash mid-create leaves a file
            // that fails validation rather than a half-initialised pool.
            hdr.magic.store(POOL_MAGIC, Release);
            pool.persist(pool.base() as usize, CACHE_LINE_SIZE);

            #[cfg(feature = "tracing")]
            tracing::debug!(path = %path.display(), size, "created pool");
        } else {
            if hdr.magic.load(Acquire) != POOL_MAGIC
                || hdr.version.load(Acquire) != POOL_VERSION
            {
                return Err(Error::InvalidPool {
                    path: path.to_path_buf(),
                });
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(path = %path.display(), len = existing_len, "reopened pool");
        }

        Ok(pool)
    }

    /// Base address of the mapping.
    #[inline]
    pub(crate) fn base(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    /// Translate a pool offset to a typed reference.
    ///
    /// Offsets are produced only by this pool (`root`, `alloc_zeroed`) and
    /// stored inside it, so a well-formed tree never passes an offset that
    /// is out of bounds or misaligned for `T`. Both are checked in debug
    /// builds.
    #[inline]
    pub(crate) fn object<T>(&self, off: u64) -> &T {
        debug_assert_ne!(off, NULL_OFF, "dereferenced null offset");
        debug_assert!(off + std::mem::size_of::<T>() as u64 <= self.len);
        debug_assert_eq!(off as usize % std::mem::align_of::<T>(), 0);

        // SAFETY: `off` lies within the mapping (checked above in debug
        // builds, structurally guaranteed by the allocator otherwise) and
        // all mutation of pool objects goes through atomic fields, so a
        // shared reference never aliases a non-atomic write.
        unsafe { &*self.base().add(off as usize).cast::<T>() }
    }

    fn header(&self) -> &PoolHeader {
        // SAFETY: the header occupies the first cache line of the mapping,
        // which always exists (`open` rejects undersized pools).
        unsafe { &*self.base().cast::<PoolHeader>() }
    }

    /// The stable, zero-initialised root object of at least `size` bytes.
    ///
    /// Always the same offset, across processes and restarts.
    pub(crate) fn root(&self, size: usize) -> u64 {
        assert!(
            ROOT_OFFSET + size as u64 <= DATA_OFFSET,
            "root object does not fit the reserved area"
        );
        ROOT_OFFSET
    }

    /// Allocate `size` bytes of zeroed, cache-line-aligned pool space.
    ///
    /// The bumped watermark is flushed before the offset is returned, so a
    /// post-crash pool can leak the block but never hand it out again.
    pub(crate) fn alloc_zeroed(&self, size: usize) -> Result<u64> {
        let aligned: u64 = (size as u64).div_ceil(CACHE_LINE_SIZE as u64) * CACHE_LINE_SIZE as u64;
        let hdr: &PoolHeader = self.header();

        let mut cur: u64 = hdr.watermark.load(Acquire);
        loop {
            let next: u64 = cur + aligned;
            if next > self.len {
                return Err(Error::OutOfSpace { requested: size });
            }

            match hdr
                .watermark
                .compare_exchange_weak(cur, next, AcqRel, Acquire)
            {
                Ok(_) => break,
                Err(seen) => cur = seen,
            }
        }

        self.persist(&hdr.watermark as *const AtomicU64 as usize, 8);

        Ok(cur)
    }

    /// Return a block to the pool.
    ///
    /// No-op: the pool never reuses space, which is what keeps fresh
    /// allocations zero-filled and lets concurrent readers keep traversing
    /// unlinked nodes. Unreachable nodes are leaked.
    pub(crate) fn free(&self, _off: u64) {}

    /// Make `[addr, addr + len)` durable. Fenced cache-line flush.
    #[inline]
    pub(crate) fn persist(&self, addr: usize, len: usize) {
        persist::clflush(addr, len);
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        // Flushed lines are already durable; this only asks the OS to write
        // back anything still dirty in the page cache.
        let _ = self.mmap.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_POOL_SIZE: u64 = 1 << 20;

    fn temp_pool() -> (tempfile::TempDir, Pool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(dir.path().join("pool"), TEST_POOL_SIZE).unwrap();
        (dir, pool)
    }

    #[test]
    fn alloc_is_aligned_and_zeroed() {
        let (_dir, pool) = temp_pool();

        let a = pool.alloc_zeroed(512).unwrap();
        let b = pool.alloc_zeroed(40).unwrap();
        let c = pool.alloc_zeroed(512).unwrap();

        assert_eq!(a % CACHE_LINE_SIZE as u64, 0);
        assert_eq!(b, a + 512);
        // 40 bytes round up to one cache line.
        assert_eq!(c, b + 64);

        let slot: &AtomicU64 = pool.object(a);
        assert_eq!(slot.load(Acquire), 0);
    }

    #[test]
    fn free_never_reissues_space() {
        let (_dir, pool) = temp_pool();

        let a = pool.alloc_zeroed(512).unwrap();
        pool.free(a);

        // Freed space is leaked, not recycled; the next allocation is
        // fresh (and therefore still zeroed).
        let b = pool.alloc_zeroed(512).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn out_of_space_is_surfaced() {
        let (_dir, pool) = temp_pool();

        let err = pool.alloc_zeroed(2 * TEST_POOL_SIZE as usize).unwrap_err();
        assert!(matches!(err, Error::OutOfSpace { .. }));

        // The pool is still usable afterwards.
        assert!(pool.alloc_zeroed(512).is_ok());
    }

    #[test]
    fn watermark_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool");

        let first;
        {
            let pool = Pool::open(&path, TEST_POOL_SIZE).unwrap();
            first = pool.alloc_zeroed(512).unwrap();
        }

        let pool = Pool::open(&path, TEST_POOL_SIZE).unwrap();
        let second = pool.alloc_zeroed(512).unwrap();
        assert!(second >= first + 512, "reopened pool reissued an offset");
    }

    #[test]
    fn root_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool");

        let off;
        {
            let pool = Pool::open(&path, TEST_POOL_SIZE).unwrap();
            off = pool.root(16);
        }

        let pool = Pool::open(&path, TEST_POOL_SIZE).unwrap();
        assert_eq!(pool.root(16), off);
    }

    #[test]
    fn garbage_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool");
        std::fs::write(&path, vec![0xFFu8; 8192]).unwrap();

        let err = Pool::open(&path, TEST_POOL_SIZE).unwrap_err();
        assert!(matches!(err, Error::InvalidPool { .. }));
    }
}
