//! Deterministic pseudo-random numbers, thread-local and allocation-free.
//!
//! Each thread carries a 128-bit xoroshiro-style state plus a 16-bit draw
//! counter. The state reseeds from process resource-usage counters (or the
//! wall clock) every 65 536 draws, hashed through Risky Hash. Fast, not
//! cryptographic.

use crate::platform;
use crate::risky::risky_hash;
use core::cell::Cell;

const P0: u64 = 0x3770_1261_ED6C_16C7;
const P1: u64 = 0x764D_BBB7_5F3B_3E0D;

std::thread_local! {
    static STATE: Cell<(u64, u64)> = const { Cell::new((0, 0)) };
    static COUNTER: Cell<u16> = const { Cell::new(0) };
}

#[cold]
fn reseed() -> (u64, u64) {
    let words = platform::entropy_words();
    let mut bytes = [0u8; 32];
    for (i, w) in words.iter().enumerate() {
        bytes[i * 8..i * 8 + 8].copy_from_slice(&w.to_le_bytes());
    }
    let s0 = risky_hash(&bytes, P0);
    let s1 = risky_hash(&bytes, s0);
    let state = (s0, s1);
    STATE.with(|s| s.set(state));
    state
}

/// Draw a 64-bit pseudo-random value.
pub fn rand64() -> u64 {
    // Counter wrap (every 65 536 draws) forces a reseed; a zero counter on
    // a fresh thread does too, so first use is never the all-zero state.
    let n = COUNTER.with(|c| {
        let n = c.get();
        c.set(n.wrapping_add(1));
        n
    });
    let (mut s0, mut s1) = if n == 0 {
        reseed()
    } else {
        STATE.with(|s| s.get())
    };

    s0 = s0.wrapping_add(s0.rotate_left(33).wrapping_mul(P0));
    s1 = s1.wrapping_add(s1.rotate_left(33).wrapping_mul(P1));
    STATE.with(|s| s.set((s0, s1)));
    s0.rotate_left(31).wrapping_add(s1.rotate_left(29))
}

/// Fill `buf` with pseudo-random bytes.
///
/// Aligns the destination to 8 bytes first, then writes 16 bytes per
/// iteration; a final draw covers any 1–7 byte tail.
pub fn rand_bytes(buf: &mut [u8]) {
    if buf.is_empty() {
        return;
    }

    // Head: bytes up to the first 8-byte boundary.
    let misalign = (buf.as_ptr() as usize) & 7;
    let head = if misalign != 0 {
        (8 - misalign).min(buf.len())
    } else {
        0
    };
    if head != 0 {
        let w = rand64().to_le_bytes();
        buf[..head].copy_from_slice(&w[..head]);
    }

    // Body: two words per iteration.
    let mut at = head;
    while at + 16 <= buf.len() {
        buf[at..at + 8].copy_from_slice(&rand64().to_le_bytes());
        buf[at + 8..at + 16].copy_from_slice(&rand64().to_le_bytes());
        at += 16;
    }
    if at + 8 <= buf.len() {
        buf[at..at + 8].copy_from_slice(&rand64().to_le_bytes());
        at += 8;
    }

    // Tail: 1..=7 bytes from one final draw.
    if at < buf.len() {
        let w = rand64().to_le_bytes();
        let n = buf.len() - at;
        buf[at..].copy_from_slice(&w[..n]);
    }
}
