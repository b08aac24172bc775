//! Unix implementation: mmap/munmap/mremap, nanosleep, sysconf, rusage.

use super::PAGE_SHIFT;
use core::cell::Cell;
use core::ffi::c_void;
use core::ptr;

const PROT_READ: i32 = 0x1;
const PROT_WRITE: i32 = 0x2;
#[cfg(feature = "exec-pages")]
const PROT_EXEC: i32 = 0x4;
const MAP_PRIVATE: i32 = 0x02;
#[cfg(target_os = "linux")]
const MAP_ANONYMOUS: i32 = 0x20;
#[cfg(not(target_os = "linux"))]
const MAP_ANONYMOUS: i32 = 0x1000;
const MAP_FAILED: *mut c_void = !0usize as *mut c_void;
#[cfg(target_os = "linux")]
const MREMAP_MAYMOVE: i32 = 1;

#[cfg(target_os = "linux")]
const SC_NPROCESSORS_ONLN: i32 = 84;
#[cfg(target_os = "macos")]
const SC_NPROCESSORS_ONLN: i32 = 58;

#[repr(C)]
struct Timespec {
    tv_sec: i64,
    tv_nsec: i64,
}

#[repr(C)]
struct Timeval {
    tv_sec: i64,
    tv_usec: i64,
}

/// `struct rusage`: two timevals followed by 14 long counters.
#[repr(C)]
struct Rusage {
    ru_utime: Timeval,
    ru_stime: Timeval,
    ru_counters: [i64; 14],
}

unsafe extern "C" {
    fn mmap(
        addr: *mut c_void,
        length: usize,
        prot: i32,
        flags: i32,
        fd: i32,
        offset: i64,
    ) -> *mut c_void;

    fn munmap(addr: *mut c_void, length: usize) -> i32;

    #[cfg(target_os = "linux")]
    fn mremap(old_addr: *mut c_void, old_size: usize, new_size: usize, flags: i32)
    -> *mut c_void;

    fn nanosleep(req: *const Timespec, rem: *mut Timespec) -> i32;

    fn clock_gettime(clk_id: i32, tp: *mut Timespec) -> i32;

    fn getrusage(who: i32, usage: *mut Rusage) -> i32;

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    fn sysconf(name: i32) -> i64;
}

const fn prot_flags() -> i32 {
    #[cfg(feature = "exec-pages")]
    {
        PROT_READ | PROT_WRITE | PROT_EXEC
    }
    #[cfg(not(feature = "exec-pages"))]
    {
        PROT_READ | PROT_WRITE
    }
}

std::thread_local! {
    /// Address-space locality hint: where the next mapping should land.
    static NEXT_ALLOC: Cell<usize> = const { Cell::new(0) };
}

fn raw_map(hint: usize, len: usize) -> *mut u8 {
    let raw = unsafe {
        mmap(
            hint as *mut c_void,
            len,
            prot_flags(),
            MAP_PRIVATE | MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if raw == MAP_FAILED {
        return ptr::null_mut();
    }
    raw as *mut u8
}

pub fn page_alloc(pages: usize, align_log: u32) -> *mut u8 {
    let size = pages << PAGE_SHIFT;
    if size == 0 {
        return ptr::null_mut();
    }
    let align = 1usize << align_log.max(PAGE_SHIFT);
    let mask = align - 1;

    // First attempt: plain mapping at the locality hint. mmap often hands
    // back an aligned address on its own, especially with a good hint.
    let hint = NEXT_ALLOC.with(|c| c.get()) & !mask;
    let raw = raw_map(hint, size);
    if raw.is_null() {
        return ptr::null_mut();
    }
    if (raw as usize) & mask == 0 {
        NEXT_ALLOC.with(|c| c.set(raw as usize + size));
        return raw;
    }

    // Misaligned: retry once with an oversize request and trim head/tail.
    unsafe { munmap(raw as *mut c_void, size) };
    let raw = raw_map(0, size + align);
    if raw.is_null() {
        return ptr::null_mut();
    }

    let raw_addr = raw as usize;
    let aligned_addr = (raw_addr + mask) & !mask;

    let lead = aligned_addr - raw_addr;
    if lead > 0 {
        unsafe { munmap(raw_addr as *mut c_void, lead) };
    }
    let trail = (raw_addr + size + align) - (aligned_addr + size);
    if trail > 0 {
        unsafe { munmap((aligned_addr + size) as *mut c_void, trail) };
    }

    NEXT_ALLOC.with(|c| c.set(aligned_addr + size));
    aligned_addr as *mut u8
}

pub unsafe fn page_realloc(
    ptr: *mut u8,
    old_pages: usize,
    new_pages: usize,
    align_log: u32,
) -> *mut u8 {
    let old_size = old_pages << PAGE_SHIFT;
    let new_size = new_pages << PAGE_SHIFT;

    #[cfg(target_os = "linux")]
    {
        let moved = unsafe {
            mremap(
                ptr as *mut c_void,
                old_size,
                new_size,
                MREMAP_MAYMOVE,
            )
        };
        if moved != MAP_FAILED {
            let moved = moved as *mut u8;
            // mremap ignores alignment; fall through to copy if it broke it.
            if (moved as usize) & ((1usize << align_log.max(PAGE_SHIFT)) - 1) == 0 {
                return moved;
            }
            let fresh = page_alloc(new_pages, align_log);
            if fresh.is_null() {
                unsafe { munmap(moved as *mut c_void, new_size) };
                return ptr::null_mut();
            }
            unsafe {
                ptr::copy_nonoverlapping(moved, fresh, old_size.min(new_size));
                munmap(moved as *mut c_void, new_size);
            }
            return fresh;
        }
        ptr::null_mut()
    }

    #[cfg(not(target_os = "linux"))]
    {
        let fresh = page_alloc(new_pages, align_log);
        if fresh.is_null() {
            return ptr::null_mut();
        }
        unsafe {
            ptr::copy_nonoverlapping(ptr, fresh, old_size.min(new_size));
            munmap(ptr as *mut c_void, old_size);
        }
        fresh
    }
}

pub unsafe fn page_free(ptr: *mut u8, pages: usize) {
    unsafe { munmap(ptr as *mut c_void, pages << PAGE_SHIFT) };
}

pub fn throttle_thread() {
    static NS: Timespec = Timespec {
        tv_sec: 0,
        tv_nsec: 1,
    };
    unsafe { nanosleep(&NS, ptr::null_mut()) };
}

pub fn cpu_count() -> Option<usize> {
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        let n = unsafe { sysconf(SC_NPROCESSORS_ONLN) };
        if n > 0 { Some(n as usize) } else { None }
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

pub fn entropy_words() -> [u64; 4] {
    const RUSAGE_SELF: i32 = 0;
    const CLOCK_REALTIME: i32 = 0;

    let mut usage = Rusage {
        ru_utime: Timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
        ru_stime: Timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
        ru_counters: [0; 14],
    };
    if unsafe { getrusage(RUSAGE_SELF, &mut usage) } == 0 {
        return [
            usage.ru_utime.tv_sec as u64 ^ (usage.ru_stime.tv_usec as u64).rotate_left(32),
            usage.ru_utime.tv_usec as u64,
            usage.ru_counters[0] as u64 ^ (usage.ru_counters[1] as u64).rotate_left(17),
            usage.ru_counters[8] as u64 ^ (usage.ru_counters[13] as u64).rotate_left(41),
        ];
    }

    let mut ts = Timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe { clock_gettime(CLOCK_REALTIME, &mut ts) };
    [
        ts.tv_sec as u64,
        ts.tv_nsec as u64,
        (ts.tv_sec as u64).rotate_left(27) ^ ts.tv_nsec as u64,
        0x9E3779B97F4A7C15,
    ]
}
