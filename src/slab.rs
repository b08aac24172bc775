//! The per-core slab allocator: arenas, block rotation, big-allocation
//! passthrough, and the C-style `malloc`/`free` surface.
//!
//! Layout of the world:
//! - Every allocation ≤ half a block is carved from the active block of
//!   one arena (one arena per detected CPU core, each behind a spinlock).
//! - Blocks come off a global LIFO free list, refilled a super-allocation
//!   (256 blocks, one mmap) at a time.
//! - Anything larger gets its own block-aligned mapping with the byte
//!   count recorded in the header (`reserved != 0` marks the big path).
//!
//! All returned memory is 16-byte aligned and zero-filled: fresh pages
//! arrive zeroed from the OS, and a block's body is wiped when its last
//! slice dies, before the block is recycled. Slices within a live block
//! are carved monotonically and never reissued.
//!
//! Mutable state lives in one lazily-initialised page obtained from the
//! page layer; [`after_fork`] resets every lock in the child process.

use crate::block::{Block, BlockList, HEADER_SIZE, HEADER_SLICES, SLICE, SUPER_PAGES};
use crate::config::{BLOCK_SIZE, BLOCKS_PER_SUPER, CPU_FALLBACK, MAX_ARENAS};
use crate::macros::fatal;
use crate::platform::{self, PAGE_SIZE};
use crate::sync::SpinLock;
use crate::{stat_add, stat_inc};
use core::alloc::{GlobalAlloc, Layout};
use core::cell::{Cell, UnsafeCell};
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

/// Alignment guaranteed for every pointer this allocator returns.
pub const ALIGNMENT: usize = SLICE;

/// Requests above this go to the big-allocation path.
const SMALL_LIMIT: usize = BLOCK_SIZE / 2;

// ---------------------------------------------------------------------------
// Global state
// ---------------------------------------------------------------------------

#[repr(C)]
struct Arena {
    lock: SpinLock,
    /// Active block; mutated only by the lock holder.
    block: UnsafeCell<*mut Block>,
}

#[repr(C)]
struct GlobalState {
    global_lock: SpinLock,
    /// Guarded by `global_lock`.
    free_blocks: UnsafeCell<BlockList>,
    arena_count: usize,
    arenas: *mut Arena,
}

unsafe impl Sync for GlobalState {}

impl GlobalState {
    #[inline]
    fn arena(&self, idx: usize) -> &Arena {
        debug_assert!(idx < self.arena_count);
        unsafe { &*self.arenas.add(idx) }
    }
}

static STATE: AtomicPtr<GlobalState> = AtomicPtr::new(ptr::null_mut());

#[inline]
fn state() -> &'static GlobalState {
    let p = STATE.load(Ordering::Acquire);
    if !p.is_null() {
        return unsafe { &*p };
    }
    init_state()
}

#[cold]
fn init_state() -> &'static GlobalState {
    let cpus = platform::cpu_count()
        .unwrap_or(CPU_FALLBACK)
        .clamp(1, MAX_ARENAS);

    let bytes = size_of::<GlobalState>() + cpus * size_of::<Arena>();
    let pages = platform::bytes_to_pages(bytes);
    let mem = platform::page_alloc(pages, platform::PAGE_SHIFT);
    if mem.is_null() {
        fatal!("slabkit: out of memory initialising allocator state");
    }

    // The page arrives zeroed: every lock starts unlocked, the free list
    // empty, every active-block pointer null.
    let gs = mem as *mut GlobalState;
    unsafe {
        (*gs).arena_count = cpus;
        (*gs).arenas = mem.add(size_of::<GlobalState>()) as *mut Arena;
    }

    match STATE.compare_exchange(
        ptr::null_mut(),
        gs,
        Ordering::AcqRel,
        Ordering::Acquire,
    ) {
        Ok(_) => unsafe { &*gs },
        Err(winner) => {
            // Another thread initialised first; discard ours.
            unsafe { platform::page_free(mem, pages) };
            unsafe { &*winner }
        }
    }
}

std::thread_local! {
    /// Last arena this thread managed to lock; tried first next time.
    static ARENA_HINT: Cell<usize> = const { Cell::new(0) };
}

/// Lock and return an arena. Scans from the thread's cached arena,
/// throttling between full sweeps. No fairness.
fn acquire_arena(s: &'static GlobalState) -> &'static Arena {
    let start = ARENA_HINT.with(|c| c.get());
    loop {
        for i in 0..s.arena_count {
            let idx = (start + i) % s.arena_count;
            let arena = s.arena(idx);
            if arena.lock.try_lock() {
                if i != 0 {
                    ARENA_HINT.with(|c| c.set(idx));
                }
                return arena;
            }
        }
        platform::throttle_thread();
    }
}

// ---------------------------------------------------------------------------
// Zero-size sentinel
// ---------------------------------------------------------------------------

#[repr(C, align(16))]
struct ZeroSentinel(UnsafeCell<[u8; SLICE]>);

unsafe impl Sync for ZeroSentinel {}

/// The distinguished non-null address returned for zero-byte requests.
/// `free` recognises it and no-ops. Writable so that buggy-but-harmless
/// zero-length `memcpy`-style use cannot fault.
static ZERO_SENTINEL: ZeroSentinel = ZeroSentinel(UnsafeCell::new([0; SLICE]));

#[inline]
fn zero_sentinel() -> *mut u8 {
    ZERO_SENTINEL.0.get() as *mut u8
}

// ---------------------------------------------------------------------------
// Block supply
// ---------------------------------------------------------------------------

/// Take a block off the free list, mapping a fresh super-allocation when
/// the list runs dry. Returns null only on OS OOM. The returned block has
/// `refs == 1` (the arena's hold) and `root_ref` already bumped.
fn fetch_block(s: &GlobalState) -> *mut Block {
    s.global_lock.lock();
    let mut b = unsafe { (*s.free_blocks.get()).pop() };

    if b.is_null() {
        // Refill: one mmap worth of blocks. Holding the global lock across
        // the syscall keeps racing threads from each mapping 8 MiB.
        let mem = platform::page_alloc(SUPER_PAGES, crate::config::BLOCK_SHIFT);
        if mem.is_null() {
            s.global_lock.unlock();
            return ptr::null_mut();
        }
        stat_inc!(super_allocs);

        for i in (1..BLOCKS_PER_SUPER).rev() {
            let sib = unsafe { mem.add(i * BLOCK_SIZE) } as *mut Block;
            unsafe {
                (*sib).root = i as u32;
                (*s.free_blocks.get()).push(sib);
            }
        }
        b = mem as *mut Block;
        unsafe { (*b).root = 0 };
    }

    unsafe {
        (*b).pos = HEADER_SLICES as u32;
        (*b).refs.store(1, Ordering::SeqCst);
        (*Block::super_root(b)).root_ref.fetch_add(1, Ordering::SeqCst);
    }
    s.global_lock.unlock();
    b
}

/// Drop one reference from `b`; the last reference wipes and recycles it.
unsafe fn block_release(s: &GlobalState, b: *mut Block) {
    if unsafe { (*b).refs.fetch_sub(1, Ordering::SeqCst) } != 1 {
        return;
    }
    unsafe { block_unload(s, b) };
}

/// Return a fully-dead block to the free list; unmap the whole
/// super-allocation once its last block dies.
#[cold]
unsafe fn block_unload(s: &GlobalState, b: *mut Block) {
    unsafe {
        // Wipe the body so recycled slices hand out zeros.
        ptr::write_bytes(
            (b as *mut u8).add(HEADER_SIZE),
            0,
            BLOCK_SIZE - HEADER_SIZE,
        );
        (*b).pos = HEADER_SLICES as u32;

        let root = Block::super_root(b);
        s.global_lock.lock();
        (*s.free_blocks.get()).push(b);

        if (*root).root_ref.fetch_sub(1, Ordering::SeqCst) == 1 {
            // Last live block of the super-allocation: pull every sibling
            // off the free list and hand the mapping back whole.
            for i in 0..BLOCKS_PER_SUPER {
                let sib = ((root as usize) + i * BLOCK_SIZE) as *mut Block;
                (*s.free_blocks.get()).remove(sib);
            }
            s.global_lock.unlock();
            platform::page_free(root as *mut u8, SUPER_PAGES);
            stat_inc!(super_frees);
        } else {
            s.global_lock.unlock();
        }
    }
}

/// Swap the arena's active block for a fresh one. Caller holds the arena
/// lock. Returns false on OS OOM (arena left without an active block).
fn rotate_arena(s: &'static GlobalState, arena: &Arena) -> bool {
    let fresh = fetch_block(s);
    if fresh.is_null() {
        return false;
    }
    stat_inc!(block_rotations);

    let old = unsafe { ptr::replace(arena.block.get(), fresh) };
    if !old.is_null() {
        // Drop the arena's hold; live slices keep the block alive.
        unsafe { block_release(s, old) };
    }
    true
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Allocate `size` bytes, 16-byte aligned and zero-filled.
///
/// Returns null on OS out-of-memory. `malloc(0)` returns a distinguished
/// non-null sentinel accepted by [`free`].
pub fn malloc(size: usize) -> *mut u8 {
    if size == 0 {
        return zero_sentinel();
    }
    stat_inc!(malloc_count);
    stat_add!(malloc_bytes, size);
    if size > SMALL_LIMIT {
        return big_alloc(size, ALIGNMENT);
    }
    small_alloc(size)
}

fn small_alloc(size: usize) -> *mut u8 {
    let slices = size.div_ceil(SLICE);
    let s = state();
    let arena = acquire_arena(s);

    let result = loop {
        let b = unsafe { *arena.block.get() };
        if !b.is_null() && unsafe { Block::remaining(b) } >= slices {
            let at = unsafe { (*b).pos } as usize;
            unsafe {
                (*b).pos = (at + slices) as u32;
                (*b).refs.fetch_add(1, Ordering::SeqCst);
            }
            break unsafe { Block::slice_at(b, at) };
        }
        if !rotate_arena(s, arena) {
            arena.lock.unlock();
            return ptr::null_mut();
        }
    };

    arena.lock.unlock();
    result
}

/// Allocate a big-path mapping. `align` must be a power of two no larger
/// than half a block; the user pointer lands at the first `align` boundary
/// past the header.
fn big_alloc(size: usize, align: usize) -> *mut u8 {
    debug_assert!(align.is_power_of_two() && align <= SMALL_LIMIT);
    stat_inc!(big_alloc_count);

    let offset = HEADER_SIZE.next_multiple_of(align);
    let pages = platform::bytes_to_pages(size + offset);
    // Block-aligned so `free` can find the header by rounding down.
    let mem = platform::page_alloc(pages, crate::config::BLOCK_SHIFT);
    if mem.is_null() {
        return ptr::null_mut();
    }
    let b = mem as *mut Block;
    unsafe {
        (*b).reserved = pages * PAGE_SIZE;
        (*b).root = 0;
    }
    unsafe { mem.add(offset) }
}

/// Allocate `count * unit` bytes, zero-filled.
///
/// Slab memory is already zero (pages come zeroed from the OS and freed
/// blocks are wiped before recycling), so this is `malloc` plus an
/// overflow check.
pub fn calloc(unit: usize, count: usize) -> *mut u8 {
    match unit.checked_mul(count) {
        Some(size) => malloc(size),
        None => ptr::null_mut(),
    }
}

/// Allocate `size` bytes directly from the page layer, bypassing the
/// slabs. Freed with the ordinary [`free`].
pub fn mmap_alloc(size: usize) -> *mut u8 {
    if size == 0 {
        return zero_sentinel();
    }
    big_alloc(size, ALIGNMENT)
}

/// Release memory returned by this allocator.
///
/// # Safety
/// `ptr` must be null, the zero-size sentinel, or a pointer previously
/// returned by this allocator and not yet freed.
pub unsafe fn free(ptr: *mut u8) {
    if ptr.is_null() || ptr == zero_sentinel() {
        return;
    }
    stat_inc!(free_count);

    let b = Block::from_ptr(ptr);
    let reserved = unsafe { (*b).reserved };
    if reserved != 0 {
        if reserved & (PAGE_SIZE - 1) != 0 {
            fatal!(
                "slabkit: corrupted big-allocation header at {:p} (reserved {:#x})",
                b,
                reserved
            );
        }
        unsafe { platform::page_free(b as *mut u8, reserved / PAGE_SIZE) };
        return;
    }
    unsafe { block_release(state(), b) };
}

/// `realloc(ptr, new_size)`: see [`realloc2`]; copies as much of the old
/// data as still fits.
///
/// # Safety
/// Same contract as [`free`] for `ptr`.
pub unsafe fn realloc(ptr: *mut u8, new_size: usize) -> *mut u8 {
    unsafe { realloc2(ptr, new_size, usize::MAX) }
}

/// Resize an allocation, copying at most `copy_len` bytes into the new
/// location. `copy_len` is clamped to `new_size` and to what provably
/// belongs to the old allocation (the remainder of its block).
///
/// Returns null on OOM, in which case a slab-backed `ptr` is still live;
/// a big-path `ptr` that the kernel already relocated is not.
///
/// # Safety
/// Same contract as [`free`] for `ptr`.
pub unsafe fn realloc2(ptr: *mut u8, new_size: usize, copy_len: usize) -> *mut u8 {
    if ptr.is_null() || ptr == zero_sentinel() {
        return malloc(new_size);
    }
    if new_size == 0 {
        unsafe { free(ptr) };
        return zero_sentinel();
    }
    stat_inc!(realloc_count);

    let b = Block::from_ptr(ptr);
    let reserved = unsafe { (*b).reserved };

    if reserved != 0 {
        // Big path.
        let offset = ptr as usize - b as usize;
        let old_user = reserved - offset;

        if new_size > SMALL_LIMIT {
            if new_size + offset <= reserved {
                return ptr; // fits in the existing mapping
            }
            if offset == HEADER_SIZE {
                let new_pages = platform::bytes_to_pages(new_size + HEADER_SIZE);
                let fresh = unsafe {
                    platform::page_realloc(
                        b as *mut u8,
                        reserved / PAGE_SIZE,
                        new_pages,
                        crate::config::BLOCK_SHIFT,
                    )
                };
                if fresh.is_null() {
                    return ptr::null_mut();
                }
                let nb = fresh as *mut Block;
                unsafe { (*nb).reserved = new_pages * PAGE_SIZE };
                return unsafe { fresh.add(HEADER_SIZE) };
            }
        }

        // Collapse to the slab path (or rebuild an over-aligned mapping).
        let fresh = malloc(new_size);
        if fresh.is_null() {
            return ptr::null_mut();
        }
        let n = copy_len.min(new_size).min(old_user);
        unsafe {
            ptr::copy_nonoverlapping(ptr, fresh, n);
            free(ptr);
        }
        return fresh;
    }

    // Small path: slices are never resized in place. Copy what can still
    // belong to the allocation — everything from `ptr` to block end.
    let block_rem = BLOCK_SIZE - (ptr as usize - b as usize);
    let n = copy_len.min(new_size).min(block_rem);
    let fresh = malloc(new_size);
    if fresh.is_null() {
        return ptr::null_mut();
    }
    unsafe {
        ptr::copy_nonoverlapping(ptr, fresh, n);
        free(ptr);
    }
    fresh
}

/// Reset every allocator lock to the unlocked state.
///
/// Call from the child process immediately after `fork()`: a thread that
/// held an arena or the global lock at fork time does not exist in the
/// child, and its lock would otherwise spin forever.
pub fn after_fork() {
    let p = STATE.load(Ordering::Acquire);
    if p.is_null() {
        return;
    }
    let s = unsafe { &*p };
    s.global_lock.force_unlock();
    for i in 0..s.arena_count {
        s.arena(i).lock.force_unlock();
    }
}

// ---------------------------------------------------------------------------
// GlobalAlloc
// ---------------------------------------------------------------------------

/// The kit's allocator as a Rust `GlobalAlloc`.
///
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: slabkit::SlabAlloc = slabkit::SlabAlloc;
/// ```
///
/// Alignments up to 16 ride the ordinary slab path; larger alignments (up
/// to half a block, 16 KiB by default) use a dedicated big-path mapping.
pub struct SlabAlloc;

unsafe impl GlobalAlloc for SlabAlloc {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = layout.size();
        if size == 0 {
            return layout.align() as *mut u8;
        }
        let align = layout.align();
        if align <= ALIGNMENT {
            return malloc(size);
        }
        if align > SMALL_LIMIT {
            return ptr::null_mut();
        }
        big_alloc(size, align)
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        unsafe { free(ptr) };
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        // Every path already returns zeroed memory.
        unsafe { self.alloc(layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if ptr.is_null() || layout.size() == 0 {
            let new_layout =
                unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
            return unsafe { self.alloc(new_layout) };
        }
        if new_size == 0 {
            unsafe { self.dealloc(ptr, layout) };
            return layout.align() as *mut u8;
        }
        if layout.align() <= ALIGNMENT {
            return unsafe { realloc2(ptr, new_size, layout.size()) };
        }
        // Over-aligned: rebuild by hand so the new mapping keeps the
        // caller's alignment.
        let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
        let fresh = unsafe { self.alloc(new_layout) };
        if !fresh.is_null() {
            unsafe {
                ptr::copy_nonoverlapping(ptr, fresh, layout.size().min(new_size));
                free(ptr);
            }
        }
        fresh
    }
}
