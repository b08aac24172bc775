//! Binary-safe string with small-string optimisation.
//!
//! Three representations share one 48-byte struct, discriminated by the
//! tag byte at offset 0 (bit 0 = small form, bit 1 = frozen):
//! - **small**: up to 46 bytes inline, length packed into the tag's high
//!   bits, one trailing byte kept free for the NUL terminator;
//! - **heap**: slab-allocated `{capa, len, data, dealloc}`, always
//!   NUL-terminated one byte past `len`;
//! - **static**: a borrowed buffer with no deallocator and zero capacity,
//!   copied into owned memory on the first mutation.
//!
//! Frozen strings silently refuse every mutator. Capacity requests round
//! up to 16-byte boundaries. Not thread-safe; callers serialise access.

use crate::numeric;
use crate::risky::risky_hash;
use crate::slab;
use core::fmt;
use core::ops::Deref;
use core::ptr;
use core::slice;
use std::io::{self, Read, Seek, SeekFrom};

/// Usable inline bytes (one byte of the 47-byte inline buffer is kept for
/// the NUL terminator).
pub const INLINE_CAP: usize = 46;

const TAG_SMALL: u8 = 1;
const TAG_FROZEN: u8 = 2;

#[repr(C)]
#[derive(Clone, Copy)]
struct SmallRepr {
    /// bit 0: small marker; bit 1: frozen; bits 2..: length.
    special: u8,
    data: [u8; INLINE_CAP + 1],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct LongRepr {
    /// bit 0 clear; bit 1: frozen.
    special: u8,
    _pad: [u8; 7],
    /// Usable bytes excluding the NUL terminator; 0 marks a static buffer.
    capa: usize,
    len: usize,
    data: *mut u8,
    /// Invoked on destroy; `None` for static buffers.
    dealloc: Option<unsafe fn(*mut u8)>,
}

#[repr(C)]
union Repr {
    small: SmallRepr,
    long: LongRepr,
}

const _: () = assert!(size_of::<Repr>() == 48);
const _: () = assert!(INLINE_CAP == size_of::<Repr>() - 2);

/// Pointer/length/capacity triple describing a string's storage.
#[derive(Clone, Copy, Debug)]
pub struct StrInfo {
    pub data: *const u8,
    pub len: usize,
    pub capa: usize,
}

/// The default heap deallocator: hand the buffer back to the slab.
unsafe fn slab_dealloc(ptr: *mut u8) {
    unsafe { slab::free(ptr) };
}

/// A heap buffer surrendered by [`BinStr::detach`]. Dereferences to the
/// bytes (NUL terminator excluded); frees itself on drop.
pub struct DetachedBuf {
    data: *mut u8,
    len: usize,
    capa: usize,
    dealloc: Option<unsafe fn(*mut u8)>,
}

impl DetachedBuf {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capa(&self) -> usize {
        self.capa
    }

    /// The raw NUL-terminated buffer.
    pub fn as_ptr(&self) -> *const u8 {
        self.data
    }

    /// The bytes including the NUL terminator.
    pub fn with_nul(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.data, self.len + 1) }
    }
}

impl Deref for DetachedBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.data, self.len) }
    }
}

impl Drop for DetachedBuf {
    fn drop(&mut self) {
        if let Some(dealloc) = self.dealloc {
            unsafe { dealloc(self.data) };
        }
    }
}

pub struct BinStr {
    repr: Repr,
}

unsafe impl Send for BinStr {}
unsafe impl Sync for BinStr {}

impl BinStr {
    /// An empty string (inline form, no allocation).
    pub const fn new() -> Self {
        Self {
            repr: Repr {
                small: SmallRepr {
                    special: TAG_SMALL,
                    data: [0; INLINE_CAP + 1],
                },
            },
        }
    }

    /// Borrow a static buffer without copying. The first mutation copies
    /// it into owned memory; destroy never frees it.
    pub const fn from_static(data: &'static [u8]) -> Self {
        Self {
            repr: Repr {
                long: LongRepr {
                    special: 0,
                    _pad: [0; 7],
                    capa: 0,
                    len: data.len(),
                    data: data.as_ptr() as *mut u8,
                    dealloc: None,
                },
            },
        }
    }

    /// Copy `data` into a fresh string.
    pub fn from_slice(data: &[u8]) -> Self {
        let mut s = Self::new();
        s.write(data);
        s
    }

    /// Adopt an externally-allocated NUL-terminated buffer. `dealloc`
    /// (if any) is invoked on the buffer when the string is destroyed.
    ///
    /// # Safety
    /// `data` must be valid for `capa + 1` bytes, with `len <= capa`,
    /// and must stay valid until the deallocator runs.
    pub unsafe fn from_owned(
        data: *mut u8,
        len: usize,
        capa: usize,
        dealloc: Option<unsafe fn(*mut u8)>,
    ) -> Self {
        Self {
            repr: Repr {
                long: LongRepr {
                    special: 0,
                    _pad: [0; 7],
                    capa,
                    len,
                    data,
                    dealloc,
                },
            },
        }
    }

    #[inline]
    fn special(&self) -> u8 {
        unsafe { self.repr.small.special }
    }

    #[inline]
    fn is_small(&self) -> bool {
        self.special() & TAG_SMALL != 0
    }

    /// True once [`BinStr::freeze`] was called; every mutator no-ops.
    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.special() & TAG_FROZEN != 0
    }

    /// Permanently refuse future mutation.
    pub fn freeze(&mut self) {
        unsafe { self.repr.small.special |= TAG_FROZEN };
    }

    pub fn len(&self) -> usize {
        if self.is_small() {
            (self.special() >> 2) as usize
        } else {
            unsafe { self.repr.long.len }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writable capacity. Inline strings report the inline maximum;
    /// static buffers report 0 (any write re-allocates).
    pub fn capa(&self) -> usize {
        if self.is_small() {
            INLINE_CAP
        } else {
            unsafe { self.repr.long.capa }
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        let info = self.info();
        unsafe { slice::from_raw_parts(info.data, info.len) }
    }

    /// Alias of [`BinStr::as_slice`], matching the C-style naming.
    pub fn data(&self) -> &[u8] {
        self.as_slice()
    }

    pub fn info(&self) -> StrInfo {
        if self.is_small() {
            StrInfo {
                data: unsafe { self.repr.small.data.as_ptr() },
                len: (self.special() >> 2) as usize,
                capa: INLINE_CAP,
            }
        } else {
            let long = unsafe { &self.repr.long };
            StrInfo {
                data: long.data,
                len: long.len,
                capa: long.capa,
            }
        }
    }

    /// Byte equality.
    pub fn iseq(&self, other: &BinStr) -> bool {
        self.as_slice() == other.as_slice()
    }

    /// Risky Hash of the contents.
    pub fn hash(&self, seed: u64) -> u64 {
        risky_hash(self.as_slice(), seed)
    }

    // -- storage management -------------------------------------------------

    fn set_small_len(&mut self, len: usize) {
        debug_assert!(len <= INLINE_CAP);
        unsafe {
            self.repr.small.special =
                ((len as u8) << 2) | (self.repr.small.special & (TAG_SMALL | TAG_FROZEN));
            self.repr.small.data[len] = 0;
        }
    }

    /// Allocation size for a requested capacity: capa + NUL, rounded to
    /// 16 bytes.
    fn rounded_alloc(capa: usize) -> usize {
        (capa + 1).next_multiple_of(16)
    }

    /// Ensure owned, writable storage for at least `capa` bytes. No-op on
    /// frozen strings. Returns the actual capacity.
    pub fn reserve(&mut self, capa: usize) -> usize {
        if self.is_frozen() {
            return self.capa();
        }
        if self.is_small() {
            if capa <= INLINE_CAP {
                return INLINE_CAP;
            }
            return self.spill_to_heap(capa);
        }

        let (old_capa, len, data, dealloc) = {
            let long = unsafe { &self.repr.long };
            (long.capa, long.len, long.data, long.dealloc)
        };
        // Static buffers (capa 0) must be copied out even for a zero-byte
        // request: the caller is about to mutate.
        if capa <= old_capa && old_capa != 0 {
            return old_capa;
        }

        let alloc = Self::rounded_alloc(capa.max(len));
        let fresh = slab::malloc(alloc);
        if fresh.is_null() {
            panic!("slabkit: string allocation failed ({alloc} bytes)");
        }
        unsafe {
            ptr::copy_nonoverlapping(data, fresh, len);
            *fresh.add(len) = 0;
            if let Some(dealloc) = dealloc {
                dealloc(data);
            }
        }
        let long = unsafe { &mut self.repr.long };
        long.data = fresh;
        long.capa = alloc - 1;
        long.dealloc = Some(slab_dealloc);
        alloc - 1
    }

    #[cold]
    fn spill_to_heap(&mut self, capa: usize) -> usize {
        let len = self.len();
        let alloc = Self::rounded_alloc(capa.max(len));
        let fresh = slab::malloc(alloc);
        if fresh.is_null() {
            panic!("slabkit: string allocation failed ({alloc} bytes)");
        }
        unsafe {
            ptr::copy_nonoverlapping(self.repr.small.data.as_ptr(), fresh, len);
            *fresh.add(len) = 0;
        }
        let frozen = self.special() & TAG_FROZEN;
        self.repr.long = LongRepr {
            special: frozen,
            _pad: [0; 7],
            capa: alloc - 1,
            len,
            data: fresh,
            dealloc: Some(slab_dealloc),
        };
        alloc - 1
    }

    /// Set the length: truncation, or zero-extension (reserving when the
    /// new length exceeds capacity). Frozen strings no-op. Returns the
    /// resulting length.
    pub fn resize(&mut self, len: usize) -> usize {
        if self.is_frozen() {
            return self.len();
        }
        let old_len = self.len();
        if len > self.capa() || !self.is_small() && unsafe { self.repr.long.capa } == 0 {
            self.reserve(len);
        }
        if self.is_small() {
            if len > old_len {
                unsafe {
                    self.repr.small.data[old_len..len].fill(0);
                }
            }
            self.set_small_len(len);
        } else {
            let long = unsafe { &mut self.repr.long };
            if len > old_len {
                unsafe { ptr::write_bytes(long.data.add(old_len), 0, len - old_len) };
            }
            long.len = len;
            unsafe { *long.data.add(len) = 0 };
        }
        len
    }

    /// Shrink storage to the smallest form that fits: back inline when the
    /// contents allow, otherwise a right-sized heap buffer.
    pub fn compact(&mut self) {
        if self.is_frozen() || self.is_small() {
            return;
        }
        let (capa, len, data, dealloc) = {
            let long = unsafe { &self.repr.long };
            (long.capa, long.len, long.data, long.dealloc)
        };
        if capa == 0 {
            return; // static buffers hold no spare memory
        }
        if len <= INLINE_CAP {
            let frozen = self.special() & TAG_FROZEN;
            let mut small = SmallRepr {
                special: TAG_SMALL | frozen,
                data: [0; INLINE_CAP + 1],
            };
            unsafe {
                ptr::copy_nonoverlapping(data, small.data.as_mut_ptr(), len);
            }
            small.special |= (len as u8) << 2;
            self.repr.small = small;
            if let Some(dealloc) = dealloc {
                unsafe { dealloc(data) };
            }
            return;
        }
        let target = Self::rounded_alloc(len) - 1;
        if target < capa {
            let fresh = slab::malloc(target + 1);
            if fresh.is_null() {
                return;
            }
            unsafe {
                ptr::copy_nonoverlapping(data, fresh, len);
                *fresh.add(len) = 0;
                if let Some(dealloc) = dealloc {
                    dealloc(data);
                }
            }
            let long = unsafe { &mut self.repr.long };
            long.data = fresh;
            long.capa = target;
            long.dealloc = Some(slab_dealloc);
        }
    }

    /// Transfer the heap buffer to the caller, resetting the string to
    /// empty. Inline and static contents are copied to a fresh buffer.
    /// Frozen strings refuse silently, yielding an empty buffer.
    pub fn detach(&mut self) -> DetachedBuf {
        if self.is_frozen() {
            static EMPTY: [u8; 1] = [0];
            return DetachedBuf {
                data: EMPTY.as_ptr() as *mut u8,
                len: 0,
                capa: 0,
                dealloc: None,
            };
        }
        let len = self.len();
        let buf = if !self.is_small()
            && unsafe { self.repr.long.capa } != 0
            && unsafe { self.repr.long.dealloc }.is_some()
        {
            let long = unsafe { &self.repr.long };
            DetachedBuf {
                data: long.data,
                len,
                capa: long.capa,
                dealloc: long.dealloc,
            }
        } else {
            let alloc = Self::rounded_alloc(len);
            let fresh = slab::malloc(alloc);
            if fresh.is_null() {
                panic!("slabkit: string allocation failed ({alloc} bytes)");
            }
            unsafe {
                ptr::copy_nonoverlapping(self.info().data, fresh, len);
                *fresh.add(len) = 0;
            }
            DetachedBuf {
                data: fresh,
                len,
                capa: alloc - 1,
                dealloc: Some(slab_dealloc),
            }
        };
        self.repr = Repr {
            small: SmallRepr {
                special: TAG_SMALL,
                data: [0; INLINE_CAP + 1],
            },
        };
        buf
    }

    // -- mutators -----------------------------------------------------------

    /// Append `bytes`. Frozen strings no-op. Returns the new length.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        if self.is_frozen() || bytes.is_empty() {
            return self.len();
        }
        let len = self.len();
        let needed = len + bytes.len();
        if needed > self.capa() || (!self.is_small() && unsafe { self.repr.long.capa } == 0) {
            self.reserve(needed.max(len * 2));
        }
        unsafe {
            let dst = if self.is_small() {
                self.repr.small.data.as_mut_ptr()
            } else {
                self.repr.long.data
            };
            ptr::copy_nonoverlapping(bytes.as_ptr(), dst.add(len), bytes.len());
        }
        if self.is_small() {
            self.set_small_len(needed);
        } else {
            let long = unsafe { &mut self.repr.long };
            long.len = needed;
            unsafe { *long.data.add(needed) = 0 };
        }
        needed
    }

    /// Append the decimal representation of `num`.
    pub fn write_i(&mut self, num: i64) -> usize {
        let mut buf = [0u8; 24];
        let n = numeric::ltoa(&mut buf, num, 10);
        self.write(&buf[..n])
    }

    /// Append another string's contents.
    pub fn concat(&mut self, other: &BinStr) -> usize {
        // Split the borrow: `other` may alias `self` in the C original,
        // but Rust's borrows already rule that out.
        self.write(other.as_slice())
    }

    /// Splice: replace `old_len` bytes at `start` (negative counts from
    /// the end) with `src`. Out-of-range positions clamp. Returns the new
    /// length.
    pub fn replace(&mut self, start: isize, old_len: usize, src: &[u8]) -> usize {
        if self.is_frozen() {
            return self.len();
        }
        let len = self.len();
        let at = if start < 0 {
            len.saturating_sub((-start) as usize)
        } else {
            (start as usize).min(len)
        };
        let old_len = old_len.min(len - at);
        let new_len = len - old_len + src.len();

        if new_len > self.capa() || (!self.is_small() && unsafe { self.repr.long.capa } == 0) {
            self.reserve(new_len);
        }
        unsafe {
            let dst = if self.is_small() {
                self.repr.small.data.as_mut_ptr()
            } else {
                self.repr.long.data
            };
            // Move the tail, then lay the replacement in.
            ptr::copy(
                dst.add(at + old_len),
                dst.add(at + src.len()),
                len - at - old_len,
            );
            ptr::copy_nonoverlapping(src.as_ptr(), dst.add(at), src.len());
        }
        if self.is_small() {
            self.set_small_len(new_len);
        } else {
            let long = unsafe { &mut self.repr.long };
            long.len = new_len;
            unsafe { *long.data.add(new_len) = 0 };
        }
        new_len
    }

    /// `printf`-style append; also available through `core::fmt::Write`
    /// and the `write!` macro.
    pub fn printf(&mut self, args: fmt::Arguments<'_>) -> usize {
        let _ = fmt::Write::write_fmt(self, args);
        self.len()
    }

    // -- file I/O -----------------------------------------------------------

    /// Append up to `limit` bytes (the whole remainder when `limit == 0`)
    /// of `path` starting at `offset` (negative seeks from the end).
    /// A leading `~/` expands through `$HOME`. Returns bytes appended.
    pub fn readfile(&mut self, path: &str, offset: i64, limit: usize) -> io::Result<usize> {
        if self.is_frozen() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "string is frozen",
            ));
        }
        let expanded;
        let path = if let Some(rest) = path.strip_prefix("~/") {
            match std::env::var("HOME") {
                Ok(home) => {
                    expanded = format!("{home}/{rest}");
                    &expanded
                }
                Err(_) => path,
            }
        } else {
            path
        };

        let mut file = std::fs::File::open(path)?;
        let file_len = file.metadata()?.len();
        let start = if offset < 0 {
            file_len.saturating_sub((-offset) as u64)
        } else {
            (offset as u64).min(file_len)
        };
        file.seek(SeekFrom::Start(start))?;

        let avail = (file_len - start) as usize;
        let want = if limit == 0 { avail } else { limit.min(avail) };

        let len = self.len();
        self.reserve(len + want);
        let mut take = file.take(want as u64);
        let mut read_total = 0usize;
        unsafe {
            let dst = if self.is_small() {
                self.repr.small.data.as_mut_ptr()
            } else {
                self.repr.long.data
            };
            let tail = slice::from_raw_parts_mut(dst.add(len), want);
            while read_total < want {
                match take.read(&mut tail[read_total..]) {
                    Ok(0) => break,
                    Ok(n) => read_total += n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
        }
        let new_len = len + read_total;
        if self.is_small() {
            self.set_small_len(new_len);
        } else {
            let long = unsafe { &mut self.repr.long };
            long.len = new_len;
            unsafe { *long.data.add(new_len) = 0 };
        }
        Ok(read_total)
    }

    // -- base64 -------------------------------------------------------------

    /// Append the standard-alphabet base64 encoding of `src` (padded).
    /// Returns the new length.
    pub fn write_b64enc(&mut self, src: &[u8]) -> usize {
        const ALPHABET: &[u8; 64] =
            b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
        if self.is_frozen() {
            return self.len();
        }
        let mut out = [0u8; 4];
        for chunk in src.chunks(3) {
            let b0 = chunk[0] as u32;
            let b1 = *chunk.get(1).unwrap_or(&0) as u32;
            let b2 = *chunk.get(2).unwrap_or(&0) as u32;
            let triple = (b0 << 16) | (b1 << 8) | b2;
            out[0] = ALPHABET[(triple >> 18) as usize & 63];
            out[1] = ALPHABET[(triple >> 12) as usize & 63];
            out[2] = if chunk.len() > 1 {
                ALPHABET[(triple >> 6) as usize & 63]
            } else {
                b'='
            };
            out[3] = if chunk.len() > 2 {
                ALPHABET[triple as usize & 63]
            } else {
                b'='
            };
            self.write(&out);
        }
        self.len()
    }

    /// Append the decoding of base64 `src` (standard or URL alphabet,
    /// whitespace skipped). Returns the bytes appended, or `None` on
    /// malformed input — the string is rolled back to its prior state.
    pub fn write_b64dec(&mut self, src: &[u8]) -> Option<usize> {
        if self.is_frozen() {
            return Some(0);
        }
        fn value(c: u8) -> Option<u8> {
            match c {
                b'A'..=b'Z' => Some(c - b'A'),
                b'a'..=b'z' => Some(c - b'a' + 26),
                b'0'..=b'9' => Some(c - b'0' + 52),
                b'+' | b'-' => Some(62),
                b'/' | b'_' => Some(63),
                _ => None,
            }
        }

        let start_len = self.len();
        let mut acc = 0u32;
        let mut bits = 0u32;
        let mut done = false;
        for &c in src {
            if c.is_ascii_whitespace() {
                continue;
            }
            if c == b'=' {
                done = true;
                continue;
            }
            let Some(v) = value(c) else {
                self.resize(start_len);
                return None;
            };
            if done {
                // Data after padding is malformed.
                self.resize(start_len);
                return None;
            }
            acc = (acc << 6) | v as u32;
            bits += 6;
            if bits >= 8 {
                bits -= 8;
                self.write(&[(acc >> bits) as u8]);
            }
        }
        Some(self.len() - start_len)
    }

    // -- UTF-8 --------------------------------------------------------------

    /// True when the contents are well-formed UTF-8.
    pub fn utf8_valid(&self) -> bool {
        core::str::from_utf8(self.as_slice()).is_ok()
    }

    /// Number of UTF-8 code points, or 0 when any sequence is malformed.
    pub fn utf8_len(&self) -> usize {
        match core::str::from_utf8(self.as_slice()) {
            Ok(s) => s.chars().count(),
            Err(_) => 0,
        }
    }

    /// Map a character range to a byte range: `char_pos` (negative counts
    /// from the end) and `char_len` become `(byte_pos, byte_len)`, with
    /// the length clamped to the string's end. `None` when the contents
    /// are not valid UTF-8 or the position is out of range.
    pub fn utf8_select(&self, char_pos: isize, char_len: usize) -> Option<(usize, usize)> {
        let s = core::str::from_utf8(self.as_slice()).ok()?;
        let total = s.chars().count();
        let start_char = if char_pos < 0 {
            total.checked_sub((-char_pos) as usize)?
        } else {
            char_pos as usize
        };
        if start_char > total {
            return None;
        }

        let mut indices = s.char_indices().map(|(i, _)| i).chain(Some(s.len()));
        let byte_pos = indices.nth(start_char)?;
        let byte_end = if char_len == 0 {
            byte_pos
        } else {
            let remaining = total - start_char;
            let take = char_len.min(remaining);
            if take == 0 {
                byte_pos
            } else {
                s[byte_pos..]
                    .char_indices()
                    .map(|(i, _)| byte_pos + i)
                    .chain(Some(s.len()))
                    .nth(take)
                    .unwrap_or(s.len())
            }
        };
        Some((byte_pos, byte_end - byte_pos))
    }
}

impl fmt::Write for BinStr {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write(s.as_bytes());
        Ok(())
    }
}

impl Drop for BinStr {
    fn drop(&mut self) {
        if !self.is_small() {
            let long = unsafe { &self.repr.long };
            if let Some(dealloc) = long.dealloc {
                unsafe { dealloc(long.data) };
            }
        }
    }
}

impl Default for BinStr {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for BinStr {
    fn clone(&self) -> Self {
        Self::from_slice(self.as_slice())
    }
}

impl PartialEq for BinStr {
    fn eq(&self, other: &Self) -> bool {
        self.iseq(other)
    }
}

impl Eq for BinStr {}

impl AsRef<[u8]> for BinStr {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for BinStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BinStr({:?})", String::from_utf8_lossy(self.as_slice()))
    }
}
