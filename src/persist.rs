//! Cache-line persistence primitives.
//!
//! All durability in the tree is expressed through [`clflush`]: a cache-line
//! flush of a byte range, bracketed by store fences so that preceding stores
//! reach the line before the flush and no later store is reordered ahead of
//! it. After `clflush` returns, the covered bytes are durable and dependent
//! stores may proceed.
//!
//! An optional write-latency budget (set via [`set_write_latency`]) emulates
//! slower persistent media by busy-waiting on the TSC after each line flush.
//!
//! On targets without `clflush`/`mfence` the primitives degrade to compiler
//! and CPU fences only; ordering is preserved, durability emulation is not.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::{Acquire, Relaxed};

/// Size of one CPU cache line in bytes. Flush granularity for all node writes.
pub const CACHE_LINE_SIZE: usize = 64;

/// TSC frequency used to convert the emulated latency budget into cycles.
#[cfg(target_arch = "x86_64")]
const CPU_FREQ_MHZ: u64 = 1994;

/// Emulated per-line write latency in nanoseconds. Zero disables the spin.
static WRITE_LATENCY_NS: AtomicU64 = AtomicU64::new(0);

/// Set the emulated per-cache-line write latency in nanoseconds.
///
/// A non-zero value makes every flushed line busy-wait for the budget,
/// approximating media slower than DRAM. Zero (the default) disables it.
pub fn set_write_latency(ns: u64) {
    WRITE_LATENCY_NS.store(ns, Relaxed);
}

/// Current emulated write latency in nanoseconds.
#[must_use]
pub fn write_latency() -> u64 {
    WRITE_LATENCY_NS.load(Relaxed)
}

/// Full store-load fence.
#[inline]
pub(crate) fn mfence() {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: `mfence` is available on all x86_64 CPUs.
    unsafe {
        std::arch::x86_64::_mm_mfence();
    }

    #[cfg(not(target_arch = "x86_64"))]
    std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
}

/// Flush every cache line overlapping `[addr, addr + len)`.
///
/// Fences bracket the per-line flushes: stores preceding the call are
/// ordered before the flush, and no subsequent store may be reordered
/// ahead of it. With a configured write-latency budget, each line flush
/// busy-waits until the TSC has advanced by the budget.
#[inline]
pub(crate) fn clflush(addr: usize, len: usize) {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: `addr..addr + len` lies within a live mapping owned by the
    // caller; `_mm_clflush` only requires a readable address and the fence
    // intrinsics have no preconditions.
    unsafe {
        use std::arch::x86_64::{_mm_clflush, _mm_mfence, _mm_pause, _rdtsc};

        let latency: u64 = WRITE_LATENCY_NS.load(Acquire);

        _mm_mfence();

        let mut line: usize = addr & !(CACHE_LINE_SIZE - 1);
        while line < addr + len {
            let etsc: u64 = _rdtsc() + latency * CPU_FREQ_MHZ / 1000;

            _mm_clflush(line as *const u8);

            while _rdtsc() < etsc {
                _mm_pause();
            }

            line += CACHE_LINE_SIZE;
        }

        _mm_mfence();
    }

    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = (addr, len);
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_covers_unaligned_ranges() {
        let buf: [u8; 256] = [0xAB; 256];
        let base: usize = buf.as_ptr() as usize;

        // Whole buffer, single byte, and a range straddling line boundaries.
        clflush(base, buf.len());
        clflush(base + 63, 1);
        clflush(base + 60, 10);

        assert_eq!(buf[0], 0xAB);
        assert_eq!(buf[255], 0xAB);
    }

    #[test]
    fn latency_budget_roundtrip() {
        assert_eq!(write_latency(), 0);

        set_write_latency(250);
        assert_eq!(write_latency(), 250);

        let buf: [u8; 64] = [0; 64];
        clflush(buf.as_ptr() as usize, 64);

        set_write_latency(0);
    }

    #[test]
    fn mfence_is_callable() {
        mfence();
    }
}
