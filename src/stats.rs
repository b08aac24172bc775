//! Allocation and container statistics counters.
//!
//! All counters use `Relaxed` ordering — they are observational only and not
//! used as synchronization primitives. The allocator's own spinlocks provide
//! the ordering guarantees for correctness; these counters are purely for
//! monitoring.
//!
//! # Usage
//!
//! ```ignore
//! let snap = slabkit::stats::snapshot();
//! println!("allocs: {}", snap.malloc_count);
//! ```
//!
//! Obtain a [`Snapshot`] with [`snapshot()`]. Individual counter loads are
//! individually atomic but not globally consistent with each other.

use core::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct Stats {
    // ---- Allocator ----
    /// Total calls to `malloc` with size > 0.
    pub malloc_count: AtomicU64,
    /// Total calls to `free` with a live pointer.
    pub free_count: AtomicU64,
    /// Total calls to `realloc`/`realloc2` (after null/zero-size guards).
    pub realloc_count: AtomicU64,
    /// Sum of all requested byte sizes passed to `malloc`.
    pub malloc_bytes: AtomicU64,
    /// Allocations served by the big-allocation (direct mmap) path.
    pub big_alloc_count: AtomicU64,
    /// Times an arena swapped its active block for a fresh one.
    pub block_rotations: AtomicU64,
    /// Super-allocations fetched from the OS.
    pub super_allocs: AtomicU64,
    /// Super-allocations returned to the OS whole.
    pub super_frees: AtomicU64,

    // ---- Containers ----
    /// Hash maps that transitioned into attack mode.
    pub map_attacks: AtomicU64,
    /// Full map rehashes (growth, shrink, or forced).
    pub map_rehashes: AtomicU64,
}

impl Stats {
    const fn new() -> Self {
        Self {
            malloc_count: AtomicU64::new(0),
            free_count: AtomicU64::new(0),
            realloc_count: AtomicU64::new(0),
            malloc_bytes: AtomicU64::new(0),
            big_alloc_count: AtomicU64::new(0),
            block_rotations: AtomicU64::new(0),
            super_allocs: AtomicU64::new(0),
            super_frees: AtomicU64::new(0),
            map_attacks: AtomicU64::new(0),
            map_rehashes: AtomicU64::new(0),
        }
    }
}

pub(crate) static STATS: Stats = Stats::new();

/// A point-in-time snapshot of all statistics counters.
///
/// Fields are plain `u64` values loaded from the global atomic counters.
/// Individual fields are each atomically read, but the snapshot as a whole
/// is not globally consistent — concurrent allocations may race between
/// loads. For monitoring purposes this is always sufficient.
#[derive(Clone, Copy, Debug, Default)]
pub struct Snapshot {
    /// Total calls to `malloc` with size > 0.
    pub malloc_count: u64,
    /// Total calls to `free` with a live pointer.
    pub free_count: u64,
    /// Total calls to `realloc`/`realloc2` (after null/zero-size guards).
    pub realloc_count: u64,
    /// Sum of all requested byte sizes passed to `malloc`.
    pub malloc_bytes: u64,
    /// Allocations served by the big-allocation (direct mmap) path.
    pub big_alloc_count: u64,
    /// Times an arena swapped its active block for a fresh one.
    pub block_rotations: u64,
    /// Super-allocations fetched from the OS.
    pub super_allocs: u64,
    /// Super-allocations returned to the OS whole.
    pub super_frees: u64,
    /// Hash maps that transitioned into attack mode.
    pub map_attacks: u64,
    /// Full map rehashes (growth, shrink, or forced).
    pub map_rehashes: u64,
}

/// Load all counters with `Relaxed` ordering and return a [`Snapshot`].
pub fn snapshot() -> Snapshot {
    let s = &STATS;
    Snapshot {
        malloc_count: s.malloc_count.load(Ordering::Relaxed),
        free_count: s.free_count.load(Ordering::Relaxed),
        realloc_count: s.realloc_count.load(Ordering::Relaxed),
        malloc_bytes: s.malloc_bytes.load(Ordering::Relaxed),
        big_alloc_count: s.big_alloc_count.load(Ordering::Relaxed),
        block_rotations: s.block_rotations.load(Ordering::Relaxed),
        super_allocs: s.super_allocs.load(Ordering::Relaxed),
        super_frees: s.super_frees.load(Ordering::Relaxed),
        map_attacks: s.map_attacks.load(Ordering::Relaxed),
        map_rehashes: s.map_rehashes.load(Ordering::Relaxed),
    }
}
