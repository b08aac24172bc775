//! OS platform abstraction: virtual memory, thread throttling, entropy.
//!
//! Provides the page layer (`page_alloc` / `page_realloc` / `page_free`)
//! that the slab allocator builds on, plus the `nanosleep` back-off used by
//! the spinlocks and the wall-clock/rusage entropy the PRNG reseeds from.
//! All sizes are in 4 KiB pages.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        use self::unix as imp;
    } else {
        compile_error!("slabkit requires a unix-like platform (mmap)");
    }
}

/// log2 of the OS page granularity the page layer speaks in.
pub const PAGE_SHIFT: u32 = 12;
/// The OS page granularity (4 KiB).
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Allocate `pages << 12` bytes of anonymous private memory, aligned to
/// `1 << align_log` bytes. Returns null on failure. Memory is
/// zero-initialized by the OS.
///
/// Alignment is enforced by retrying once with an oversize request and
/// trimming the head and tail of the mapping. A thread-local address hint
/// keeps successive allocations close together in the address space.
#[inline]
pub fn page_alloc(pages: usize, align_log: u32) -> *mut u8 {
    imp::page_alloc(pages, align_log)
}

/// Resize a mapping previously returned by [`page_alloc`].
///
/// Uses `mremap` where the OS offers it, otherwise falls back to
/// allocate-copy-free. `align_log` is re-enforced when the OS relocates
/// the mapping to a weaker boundary. Returns null on failure, in which
/// case the old mapping must be treated as gone (the kernel may already
/// have relocated it).
///
/// # Safety
/// `ptr` must be a live mapping of exactly `old_pages` pages.
#[inline]
pub unsafe fn page_realloc(
    ptr: *mut u8,
    old_pages: usize,
    new_pages: usize,
    align_log: u32,
) -> *mut u8 {
    unsafe { imp::page_realloc(ptr, old_pages, new_pages, align_log) }
}

/// Unmap `pages` pages starting at `ptr`.
///
/// # Safety
/// `ptr` must have been returned by [`page_alloc`] / [`page_realloc`] and
/// `pages` must cover the whole mapping.
#[inline]
pub unsafe fn page_free(ptr: *mut u8, pages: usize) {
    unsafe { imp::page_free(ptr, pages) }
}

/// Yield the CPU for ~1 ns. In practice this reschedules the thread,
/// which beats both `spin_loop` and `sched_yield` for lock back-off.
#[inline]
pub fn throttle_thread() {
    imp::throttle_thread();
}

/// Number of online CPUs, or `None` when detection is unavailable.
pub fn cpu_count() -> Option<usize> {
    imp::cpu_count()
}

/// Process-local entropy words for PRNG reseeding: resource-usage counters
/// where the OS has them, wall-clock time otherwise. Not cryptographic.
pub fn entropy_words() -> [u64; 4] {
    imp::entropy_words()
}

/// Round a byte count up to whole pages.
#[inline]
pub const fn bytes_to_pages(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_SIZE)
}
