//! Stress tests with fill-pattern corruption detection.
//!
//! Allocate memory, fill with a known pattern, pass between threads, and
//! verify the pattern before freeing. Any corruption (use-after-free,
//! double-carve, overlap between arenas) causes a pattern mismatch and an
//! assertion failure.

use slabkit::SlabAlloc;
use slabkit::slab;

#[global_allocator]
static GLOBAL: SlabAlloc = SlabAlloc;

/// Fill a buffer with a deterministic pattern derived from its address and size.
fn fill_pattern(ptr: *mut u8, size: usize) {
    let seed = ptr as usize ^ size;
    for i in 0..size {
        unsafe {
            *ptr.add(i) = ((seed.wrapping_add(i).wrapping_mul(0x9E37_79B9)) & 0xFF) as u8;
        }
    }
}

/// Verify the fill pattern. Returns true if intact.
fn check_pattern(ptr: *mut u8, size: usize) -> bool {
    let seed = ptr as usize ^ size;
    for i in 0..size {
        let expected = ((seed.wrapping_add(i).wrapping_mul(0x9E37_79B9)) & 0xFF) as u8;
        if unsafe { *ptr.add(i) } != expected {
            return false;
        }
    }
    true
}

#[test]
fn stress_fill_pattern_single_thread() {
    let sizes: &[usize] = &[8, 16, 32, 64, 128, 256, 512, 1024, 4096, 20000, 40000];
    let rounds = 50;

    let mut live: Vec<(*mut u8, usize)> = Vec::new();

    for round in 0..rounds {
        // Allocate a batch
        for &size in sizes {
            let ptr = slab::malloc(size);
            assert!(!ptr.is_null(), "malloc failed for size {size}");
            fill_pattern(ptr, size);
            live.push((ptr, size));
        }

        // Verify all live allocations
        for &(ptr, size) in &live {
            assert!(
                check_pattern(ptr, size),
                "corruption detected at round {round}, size {size}"
            );
        }

        // Free half (interleaved to stress free-list ordering)
        let drain_count = live.len() / 2;
        for _ in 0..drain_count {
            let idx = (round * 7 + 3) % live.len();
            let (ptr, size) = live.swap_remove(idx);
            assert!(
                check_pattern(ptr, size),
                "corruption before free at round {round}"
            );
            unsafe { slab::free(ptr) };
        }
    }

    // Final cleanup
    for (ptr, size) in live {
        assert!(check_pattern(ptr, size));
        unsafe { slab::free(ptr) };
    }
}

#[test]
fn stress_fill_pattern_cross_thread() {
    use std::sync::mpsc;

    let npairs = 4;
    let ops = 100;
    let sizes: &[usize] = &[16, 64, 256, 1024];

    let mut producers = Vec::new();
    let mut consumers = Vec::new();

    for pair_id in 0..npairs {
        // Send raw ptr + size; ownership transfers cleanly with the message.
        let (tx, rx) = mpsc::channel::<(usize, usize)>();

        producers.push(std::thread::spawn(move || {
            for i in 0..ops {
                let size = sizes[(pair_id + i) % sizes.len()];
                let ptr = slab::malloc(size);
                assert!(!ptr.is_null());
                fill_pattern(ptr, size);
                // Send as usize to satisfy Send
                tx.send((ptr as usize, size)).unwrap();
            }
        }));

        consumers.push(std::thread::spawn(move || {
            let mut count = 0usize;
            for (addr, size) in rx {
                let ptr = addr as *mut u8;
                assert!(
                    check_pattern(ptr, size),
                    "cross-thread corruption at pair {pair_id}, item {count}"
                );
                unsafe { slab::free(ptr) };
                count += 1;
            }
            count
        }));
    }

    for h in producers {
        h.join().unwrap();
    }

    let total: usize = consumers.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, npairs * ops);
}

/// Fill with a fixed seed (not address-dependent) so realloc moves don't
/// invalidate the pattern.
fn fill_fixed(ptr: *mut u8, size: usize, seed: usize) {
    for i in 0..size {
        unsafe {
            *ptr.add(i) = ((seed.wrapping_add(i).wrapping_mul(0x9E37_79B9)) & 0xFF) as u8;
        }
    }
}

fn check_fixed(ptr: *mut u8, size: usize, seed: usize) -> bool {
    for i in 0..size {
        let expected = ((seed.wrapping_add(i).wrapping_mul(0x9E37_79B9)) & 0xFF) as u8;
        if unsafe { *ptr.add(i) } != expected {
            return false;
        }
    }
    true
}

#[test]
fn stress_realloc_pattern() {
    let initial_size = 64;

    for round in 0..100 {
        let seed = round * 31 + 7;
        let ptr = slab::malloc(initial_size);
        assert!(!ptr.is_null());
        fill_fixed(ptr, initial_size, seed);

        // Grow
        let new_ptr = unsafe { slab::realloc(ptr, 256) };
        assert!(!new_ptr.is_null());
        // Original content should be preserved (ptr may have moved)
        assert!(
            check_fixed(new_ptr, initial_size, seed),
            "realloc corrupted original content during grow (round {round})"
        );

        // Shrink
        let shrunk_ptr = unsafe { slab::realloc(new_ptr, 32) };
        assert!(!shrunk_ptr.is_null());
        // First 32 bytes should still match
        assert!(
            check_fixed(shrunk_ptr, 32, seed),
            "realloc corrupted content during shrink (round {round})"
        );

        unsafe { slab::free(shrunk_ptr) };
    }
}

#[test]
fn stress_realloc_across_big_boundary() {
    // Walk an allocation from slab slices into the big path and back.
    for round in 0..20 {
        let seed = round * 13 + 1;
        let ptr = slab::malloc(1024);
        assert!(!ptr.is_null());
        fill_fixed(ptr, 1024, seed);

        let big = unsafe { slab::realloc(ptr, 100_000) };
        assert!(!big.is_null());
        assert!(check_fixed(big, 1024, seed), "grow to big lost data");

        let back = unsafe { slab::realloc(big, 512) };
        assert!(!back.is_null());
        assert!(check_fixed(back, 512, seed), "collapse to small lost data");

        unsafe { slab::free(back) };
    }
}

#[test]
fn stress_many_threads_concurrent() {
    // Many threads doing alloc+fill+verify+free simultaneously
    let nthreads = 8;
    let ops_per_thread = 200;

    let handles: Vec<_> = (0..nthreads)
        .map(|tid| {
            std::thread::spawn(move || {
                let mut live: Vec<(*mut u8, usize)> = Vec::with_capacity(64);

                for i in 0..ops_per_thread {
                    let size = [8, 32, 64, 128, 512, 2048][(tid + i) % 6];
                    let ptr = slab::malloc(size);
                    assert!(!ptr.is_null());
                    fill_pattern(ptr, size);
                    live.push((ptr, size));

                    // Periodically verify and free some
                    if live.len() > 32 {
                        for _ in 0..16 {
                            let (ptr, size) = live.pop().unwrap();
                            assert!(
                                check_pattern(ptr, size),
                                "thread {tid} corruption at op {i}"
                            );
                            unsafe { slab::free(ptr) };
                        }
                    }
                }

                for (ptr, size) in live {
                    assert!(check_pattern(ptr, size));
                    unsafe { slab::free(ptr) };
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn stress_alloc_touch_free_cycles_return_to_baseline() {
    // N threads, M allocate-touch-free cycles; afterwards a fresh round of
    // allocations must still come back zeroed (recycled blocks are wiped).
    let nthreads = 4;
    let cycles = 2000;

    let handles: Vec<_> = (0..nthreads)
        .map(|tid| {
            std::thread::spawn(move || {
                for i in 0..cycles {
                    let size = 16 + ((tid * 37 + i * 13) % 480);
                    let ptr = slab::malloc(size);
                    assert!(!ptr.is_null());
                    unsafe { ptr.write_bytes(0xA5, size) };
                    unsafe { slab::free(ptr) };
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    for size in [64usize, 1024, 8000] {
        let ptr = slab::malloc(size);
        assert!(!ptr.is_null());
        for i in 0..size {
            assert_eq!(unsafe { *ptr.add(i) }, 0, "recycled memory not wiped");
        }
        unsafe { slab::free(ptr) };
    }
}
