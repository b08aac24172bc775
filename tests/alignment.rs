//! Alignment and zero-fill guarantees of the slab allocator.
//!
//! Verifies the 16-byte alignment contract of the raw C-style API and the
//! wider alignment handling of the `GlobalAlloc` facade, including
//! over-aligned allocations served by the big-allocation path.

use slabkit::SlabAlloc;
use slabkit::slab;
use std::alloc::{GlobalAlloc, Layout};

#[global_allocator]
static GLOBAL: SlabAlloc = SlabAlloc;

#[test]
fn test_raw_api_always_16_aligned() {
    let mut ptrs = Vec::new();
    for size in [1usize, 2, 7, 8, 15, 16, 17, 100, 1000, 16384, 16385, 100_000] {
        let ptr = slab::malloc(size);
        assert!(!ptr.is_null(), "malloc failed: size={size}");
        assert_eq!(
            ptr as usize % 16,
            0,
            "misaligned: ptr={ptr:?}, size={size}"
        );
        unsafe { ptr.write_bytes(0xAB, size) };
        ptrs.push(ptr);
    }
    for ptr in ptrs {
        unsafe { slab::free(ptr) };
    }
}

#[test]
fn test_raw_api_zero_filled() {
    // Churn a little so recycled blocks are in play, then check zeroing.
    for round in 0..8 {
        let mut ptrs = Vec::new();
        for size in [24usize, 64, 200, 1024, 4000] {
            let ptr = slab::malloc(size);
            assert!(!ptr.is_null());
            for i in 0..size {
                assert_eq!(
                    unsafe { *ptr.add(i) },
                    0,
                    "dirty byte at {i} (size {size}, round {round})"
                );
            }
            unsafe { ptr.write_bytes(0x5A, size) };
            ptrs.push(ptr);
        }
        for ptr in ptrs {
            unsafe { slab::free(ptr) };
        }
    }
}

#[test]
fn test_standard_alignments() {
    for align in [1usize, 2, 4, 8, 16] {
        for &size in &[1, 7, 8, 15, 16, 31, 64, 255, 256, 1024, 4096] {
            if size < align {
                continue;
            }
            let layout = Layout::from_size_align(size, align).unwrap();
            let ptr = unsafe { GLOBAL.alloc(layout) };
            assert!(!ptr.is_null(), "alloc failed: size={size}, align={align}");
            assert_eq!(
                ptr as usize % align,
                0,
                "misaligned: ptr={ptr:?}, size={size}, align={align}"
            );
            // Write to verify it's usable
            unsafe { ptr.write_bytes(0xAB, size) };
            unsafe { GLOBAL.dealloc(ptr, layout) };
        }
    }
}

#[test]
fn test_over_aligned() {
    // Anything past 16 leaves the slabs for a dedicated mapping.
    for align in [32usize, 64, 256, 4096, 8192] {
        for &size in &[align, align * 2, align * 2 + 100] {
            let layout = Layout::from_size_align(size, align).unwrap();
            let ptr = unsafe { GLOBAL.alloc(layout) };
            assert!(!ptr.is_null(), "alloc failed: size={size}, align={align}");
            assert_eq!(
                ptr as usize % align,
                0,
                "misaligned: ptr={ptr:?}, size={size}, align={align}"
            );
            unsafe { ptr.write_bytes(0xCD, size) };
            for i in 0..size {
                assert_eq!(unsafe { *ptr.add(i) }, 0xCD);
            }
            unsafe { GLOBAL.dealloc(ptr, layout) };
        }
    }
}

#[test]
fn test_many_over_aligned() {
    let align = 4096;
    let size = 4096;
    let layout = Layout::from_size_align(size, align).unwrap();

    let mut ptrs = Vec::with_capacity(20);
    for _ in 0..20 {
        let ptr = unsafe { GLOBAL.alloc(layout) };
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % align, 0, "misaligned in batch alloc");
        unsafe { ptr.write_bytes(0xCF, size) };
        ptrs.push(ptr);
    }

    for &ptr in &ptrs {
        for i in 0..size {
            assert_eq!(unsafe { *ptr.add(i) }, 0xCF);
        }
    }

    for ptr in ptrs {
        unsafe { GLOBAL.dealloc(ptr, layout) };
    }
}

#[test]
fn test_realloc_preserves_alignment() {
    for align in [16usize, 32, 64, 256] {
        let size = align * 2;
        let layout = Layout::from_size_align(size, align).unwrap();
        let ptr = unsafe { GLOBAL.alloc(layout) };
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % align, 0);

        // Fill and grow
        unsafe { ptr.write_bytes(0xBB, size) };
        let new_size = size * 4;
        let new_ptr = unsafe { GLOBAL.realloc(ptr, layout, new_size) };
        assert!(!new_ptr.is_null(), "realloc failed: align={align}");
        assert_eq!(
            new_ptr as usize % align,
            0,
            "realloc lost alignment: align={align}"
        );

        // Original bytes preserved
        for i in 0..size {
            assert_eq!(
                unsafe { *new_ptr.add(i) },
                0xBB,
                "realloc corrupted byte {i}"
            );
        }

        let new_layout = Layout::from_size_align(new_size, align).unwrap();
        unsafe { GLOBAL.dealloc(new_ptr, new_layout) };
    }
}

#[test]
fn test_zero_size_layout() {
    // Zero-sized allocations should return a non-null aligned pointer
    let layout = Layout::from_size_align(0, 1).unwrap();
    let ptr = unsafe { GLOBAL.alloc(layout) };
    if !ptr.is_null() {
        unsafe { GLOBAL.dealloc(ptr, layout) };
    }
}

#[test]
fn test_zero_size_raw_sentinel() {
    let a = slab::malloc(0);
    let b = slab::malloc(0);
    assert!(!a.is_null());
    assert_eq!(a, b);
    unsafe {
        slab::free(a);
        slab::free(b);
        slab::free(std::ptr::null_mut());
    }
}
