//! End-to-end container scenarios over the slab allocator, plus
//! property-based checks for the container contracts.

use quickcheck::quickcheck;
use slabkit::list::ListNode;
use slabkit::slab;
use slabkit::{Array, BinStr, OrderedMap, Ref, SlabAlloc, list_entry, rand_bytes, risky_hash};

#[global_allocator]
static GLOBAL: SlabAlloc = SlabAlloc;

#[test]
fn scenario_realloc_wave() {
    // 4096 objects of 32 bytes, stamped, grown to 64, verified, freed.
    let mut ptrs = Vec::with_capacity(4096);
    for _ in 0..4096 {
        let p = slab::malloc(32);
        assert!(!p.is_null());
        unsafe { p.write_bytes(0xAA, 32) };
        ptrs.push(p);
    }
    for p in ptrs.iter_mut() {
        let q = unsafe { slab::realloc2(*p, 64, 32) };
        assert!(!q.is_null());
        for i in 0..32 {
            assert_eq!(unsafe { *q.add(i) }, 0xAA, "grow lost byte {i}");
        }
        // With the copy clamped at 32, the fresh tail arrives zeroed.
        for i in 32..64 {
            assert_eq!(unsafe { *q.add(i) }, 0, "grow exposed dirty byte {i}");
        }
        *p = q;
    }
    for p in ptrs {
        unsafe { slab::free(p) };
    }
}

#[test]
fn scenario_dec_to_hex_map() {
    // ("0","0") .. ("15","f"): insert forward, look up backwards.
    let mut m: OrderedMap<String, String> = OrderedMap::new();
    for i in 0..16u32 {
        m.insert_keyed(i.to_string(), format!("{i:x}"));
    }
    for i in (0..16u32).rev() {
        assert_eq!(
            m.find_keyed(&i.to_string()),
            Some(&format!("{i:x}")),
            "lookup {i}"
        );
    }
    let order: Vec<_> = m.keys().cloned().collect();
    let expect: Vec<_> = (0..16u32).map(|i| i.to_string()).collect();
    assert_eq!(order, expect, "iteration must match insertion order");
}

#[repr(C)]
struct Seq {
    node: ListNode,
    value: usize,
}

#[test]
fn scenario_list_fifo_both_ways() {
    let mut head = ListNode::new();
    let head_ptr = &mut head as *mut ListNode;
    unsafe { ListNode::init(head_ptr) };

    let mut nodes: Vec<Box<Seq>> = (0..4096)
        .map(|value| {
            Box::new(Seq {
                node: ListNode::new(),
                value,
            })
        })
        .collect();

    // push .. shift yields 0,1,...,4095
    for n in &mut nodes {
        unsafe { ListNode::push(head_ptr, &mut n.node) };
    }
    for expect in 0..4096 {
        let n = unsafe { ListNode::shift(head_ptr) };
        assert!(!n.is_null());
        assert_eq!(unsafe { (*list_entry!(n, Seq, node)).value }, expect);
    }
    assert!(unsafe { ListNode::is_empty(head_ptr) });

    // unshift .. pop yields the same sequence
    for n in &mut nodes {
        unsafe { ListNode::unshift(head_ptr, &mut n.node) };
    }
    for expect in 0..4096 {
        let n = unsafe { ListNode::pop(head_ptr) };
        assert!(!n.is_null());
        assert_eq!(unsafe { (*list_entry!(n, Seq, node)).value }, expect);
    }
    assert!(unsafe { ListNode::is_empty(head_ptr) });
}

#[test]
fn scenario_risky_hash_distribution() {
    // 10 000 random 43-byte buffers: digest bits should be balanced and
    // digest bytes roughly uniform.
    let draws = 10_000usize;
    let mut bit_total = 0u64;
    let mut byte_freq = [0u64; 256];

    for i in 0..draws {
        let mut buf = [0u8; 43];
        rand_bytes(&mut buf);
        let h = risky_hash(&buf, i as u64);
        bit_total += h.count_ones() as u64;
        for b in h.to_le_bytes() {
            byte_freq[b as usize] += 1;
        }
    }

    let mean_bits = bit_total as f64 / draws as f64;
    assert!(
        (mean_bits - 32.0).abs() < 3.2,
        "digest bit population biased: mean {mean_bits}"
    );

    // Chi-square over byte frequencies: df=255, mean 255, sigma ~22.6.
    // Generous bound to keep the test deterministic-in-practice.
    let samples = (draws * 8) as f64;
    let expected = samples / 256.0;
    let chi2: f64 = byte_freq
        .iter()
        .map(|&obs| {
            let d = obs as f64 - expected;
            d * d / expected
        })
        .sum();
    assert!(
        chi2 < 255.0 + 4.0 * 22.6,
        "digest bytes far from uniform: chi2 {chi2}"
    );
}

#[test]
fn scenario_collision_attack_contained() {
    // Full 64-bit hash collisions on every insert.
    let mut m: OrderedMap<u32, u32> = OrderedMap::new();
    for i in 0..4096u32 {
        m.insert(1, i, i + 1);
    }
    assert!(m.under_attack());
    assert!(m.count() < 4096);
    assert!(m.capa() <= 1 << 16, "no unbounded growth");
    // Still functional: a lookup by the shared hash returns some value.
    assert!(m.find(1, &0).is_some());
}

#[test]
fn scenario_static_string_detach() {
    let mut s = BinStr::from_static(b"Welcome");
    s.write(b" Home");
    let buf = s.detach();
    assert_eq!(buf.with_nul(), b"Welcome Home\0");
    assert!(s.is_empty(), "handle must be back to empty");
    s.write(b"reusable");
    assert_eq!(s.as_slice(), b"reusable");
}

#[test]
fn scenario_shared_counter() {
    // N up-refs + N+1 releases destroy exactly once, across threads.
    use std::sync::atomic::{AtomicUsize, Ordering};
    static DROPS: AtomicUsize = AtomicUsize::new(0);
    struct Counted(#[allow(dead_code)] u64);
    impl Drop for Counted {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    let r = Ref::new(Counted(7));
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let d = r.dup();
            std::thread::spawn(move || drop(d))
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(r.count(), 1);
    assert_eq!(DROPS.load(Ordering::SeqCst), 0);
    drop(r);
    assert_eq!(DROPS.load(Ordering::SeqCst), 1);
}

quickcheck! {
    fn prop_array_mirrors_vec(ops: Vec<(u8, u32)>) -> bool {
        let mut a: Array<u32> = Array::new();
        let mut model: Vec<u32> = Vec::new();
        for (op, v) in ops {
            match op % 4 {
                0 => {
                    a.push(v);
                    model.push(v);
                }
                1 => {
                    a.unshift(v);
                    model.insert(0, v);
                }
                2 => {
                    if a.pop() != model.pop() {
                        return false;
                    }
                }
                _ => {
                    let got = a.shift();
                    let want = if model.is_empty() {
                        None
                    } else {
                        Some(model.remove(0))
                    };
                    if got != want {
                        return false;
                    }
                }
            }
        }
        a.as_slice() == model.as_slice()
    }

    fn prop_map_count_tracks_inserts_and_removes(keys: Vec<u16>) -> bool {
        let mut m: OrderedMap<u16, u16> = OrderedMap::new();
        let mut model = std::collections::HashMap::new();
        for k in &keys {
            let prev = m.insert_keyed(*k, k.wrapping_mul(3));
            let model_prev = model.insert(*k, k.wrapping_mul(3));
            if prev != model_prev {
                return false;
            }
        }
        if m.count() != model.len() {
            return false;
        }
        for k in &keys {
            if m.remove_keyed(k) != model.remove(k) {
                return false;
            }
        }
        m.count() == 0
    }

    fn prop_map_iterates_in_first_insertion_order(keys: Vec<u16>) -> bool {
        let mut m: OrderedMap<u16, u32> = OrderedMap::new();
        let mut first_seen: Vec<u16> = Vec::new();
        for (i, k) in keys.iter().enumerate() {
            if m.insert_keyed(*k, i as u32).is_none() {
                first_seen.push(*k);
            }
        }
        let iterated: Vec<u16> = m.keys().copied().collect();
        iterated == first_seen
    }

    fn prop_string_write_appends(chunks: Vec<Vec<u8>>) -> bool {
        let mut s = BinStr::new();
        let mut model = Vec::new();
        for chunk in &chunks {
            s.write(chunk);
            model.extend_from_slice(chunk);
        }
        s.len() == model.len() && s.as_slice() == model.as_slice()
    }

    fn prop_b64_round_trip(payload: Vec<u8>) -> bool {
        let mut enc = BinStr::new();
        enc.write_b64enc(&payload);
        let mut dec = BinStr::new();
        dec.write_b64dec(enc.as_slice()) == Some(payload.len())
            && dec.as_slice() == payload.as_slice()
    }

    fn prop_string_utf8_len_bounded(text: String) -> bool {
        let s = BinStr::from_slice(text.as_bytes());
        s.utf8_valid() && s.utf8_len() == text.chars().count() && s.utf8_len() <= s.len()
    }

    fn prop_array_remove2_clears_value(values: Vec<u8>, needle: u8) -> bool {
        let mut a: Array<u8> = Array::new();
        for v in &values {
            a.push(*v);
        }
        let expect_removed = values.iter().filter(|v| **v == needle).count();
        let removed = a.remove2(&needle);
        removed == expect_removed && a.find(&needle).is_none()
    }

    fn prop_risky_hash_is_deterministic(data: Vec<u8>, seed: u64) -> bool {
        risky_hash(&data, seed) == risky_hash(&data, seed)
    }
}
