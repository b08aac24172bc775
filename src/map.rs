//! Insertion-ordered hash map and set with collision-attack detection.
//!
//! Two arrays back every table: a power-of-two probe table of
//! `{hash, pos}` slots and a densely-appended ordered storage of
//! `{hash, prev, next, object}` entries. The probe table answers lookups;
//! the dense storage's embedded links preserve strict insertion order
//! across removals and rehashes. Hash value 0 is reserved to mean "empty
//! probe slot" (user hashes of 0 fold to all-ones).
//!
//! Collision resolution is additive probing with a large odd step, with a
//! bounded seek budget. Crossing the full-hash-collision budget in a
//! single seek flips the table into attack mode: from then on a matching
//! hash is treated as a matching key, so the table keeps serving requests
//! predictably under adversarial load — at the cost of possibly returning
//! a value whose key was never compared. The transition is logged once.
//!
//! Not thread-safe; callers serialise access. Allocation failure is fatal.

use crate::config::{MAP_MAX_FULL_COLLISIONS, MAP_MAX_SEEK, MAP_PROBE_STEP};
use crate::risky::risky_hash;
use crate::slab;
use crate::stat_inc;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr;

/// Link terminator and hole marker for dense-storage indices.
const NIL: u32 = u32::MAX;

/// Probe-table slot. `hash == 0` means empty; `pos == NIL` with a nonzero
/// hash marks a hole left by a removal.
#[repr(C)]
#[derive(Clone, Copy)]
struct Slot {
    hash: u64,
    pos: u32,
}

/// Dense-storage entry. A removed entry keeps its slot with `hash == 0`
/// and `next == NIL` until a rehash compacts it away.
#[repr(C)]
struct Ordered<E> {
    hash: u64,
    prev: u32,
    next: u32,
    obj: MaybeUninit<E>,
}

enum Seek {
    /// Probe slot holding a live entry that matched (or, under attack, a
    /// live entry with a matching hash).
    Hit(u32),
    /// Probe slot reserved for this hash but pointing at nothing.
    Hole(u32),
    /// First never-used probe slot on this hash's probe path.
    Empty(u32),
    /// Probe budget exhausted without resolution.
    Exhausted,
}

#[derive(Default)]
struct SeekFlags {
    saw_collision: bool,
    attack: bool,
}

/// The shared engine under [`OrderedMap`] and [`OrderedSet`].
struct MapCore<E> {
    map: *mut Slot,
    ordered: *mut Ordered<E>,
    capa: u32,
    pos: u32,
    count: u32,
    head: u32,
    tail: u32,
    used_bits: u8,
    has_collisions: bool,
    under_attack: bool,
    _marker: PhantomData<E>,
}

unsafe impl<E: Send> Send for MapCore<E> {}
unsafe impl<E: Sync> Sync for MapCore<E> {}

impl<E> MapCore<E> {
    const fn new() -> Self {
        assert!(align_of::<Ordered<E>>() <= slab::ALIGNMENT, "entry over-aligned");
        Self {
            map: ptr::null_mut(),
            ordered: ptr::null_mut(),
            capa: 0,
            pos: 0,
            count: 0,
            head: NIL,
            tail: NIL,
            used_bits: 0,
            has_collisions: false,
            under_attack: false,
            _marker: PhantomData,
        }
    }

    /// User hash 0 is reserved for empty slots; fold it to all-ones.
    #[inline]
    fn fold(hash: u64) -> u64 {
        if hash == 0 { u64::MAX } else { hash }
    }

    /// Dense-storage capacity: half the probe table, keeping the probe
    /// load factor at or below 50%.
    #[inline]
    fn ordered_capa(&self) -> u32 {
        self.capa / 2
    }

    /// Primary probe position: a different rotation of the hash at every
    /// table size, so growth re-spreads clustered keys.
    #[inline]
    fn primary(hash: u64, used_bits: u8, mask: u64) -> u64 {
        hash.rotate_right(used_bits as u32) & mask
    }

    #[inline]
    fn slot(&self, idx: u32) -> &Slot {
        unsafe { &*self.map.add(idx as usize) }
    }

    #[inline]
    fn slot_mut(&mut self, idx: u32) -> &mut Slot {
        unsafe { &mut *self.map.add(idx as usize) }
    }

    #[inline]
    fn entry(&self, idx: u32) -> &Ordered<E> {
        unsafe { &*self.ordered.add(idx as usize) }
    }

    #[inline]
    fn entry_mut(&mut self, idx: u32) -> &mut Ordered<E> {
        unsafe { &mut *self.ordered.add(idx as usize) }
    }

    /// Walk the probe path for `hash` (already folded). `eq` tests a live
    /// stored object against the probe key.
    fn seek(&self, hash: u64, mut eq: impl FnMut(&E) -> bool) -> (Seek, SeekFlags) {
        let mut flags = SeekFlags::default();
        if self.capa == 0 {
            return (Seek::Exhausted, flags);
        }
        let mask = (self.capa - 1) as u64;
        let budget = (mask as usize).min(MAP_MAX_SEEK);
        let primary = Self::primary(hash, self.used_bits, mask);

        let mut collisions = 0usize;
        for attempt in 0..=budget as u64 {
            let idx = ((primary + attempt.wrapping_mul(MAP_PROBE_STEP)) & mask) as u32;
            let slot = self.slot(idx);
            if slot.hash == 0 {
                return (Seek::Empty(idx), flags);
            }
            if slot.hash != hash {
                continue;
            }
            if slot.pos == NIL {
                return (Seek::Hole(idx), flags);
            }
            if self.under_attack {
                // Degraded equality: hash match is key match.
                return (Seek::Hit(idx), flags);
            }
            if eq(unsafe { self.entry(slot.pos).obj.assume_init_ref() }) {
                return (Seek::Hit(idx), flags);
            }
            // Same 64-bit hash, different key.
            flags.saw_collision = true;
            collisions += 1;
            if collisions >= MAP_MAX_FULL_COLLISIONS {
                flags.attack = true;
                return (Seek::Hit(idx), flags);
            }
        }
        (Seek::Exhausted, flags)
    }

    fn apply_flags(&mut self, flags: &SeekFlags) {
        self.has_collisions |= flags.saw_collision;
        if flags.attack && !self.under_attack {
            self.enter_attack_mode();
        }
    }

    #[cold]
    fn enter_attack_mode(&mut self) {
        self.under_attack = true;
        stat_inc!(map_attacks);
        tracing::warn!(
            count = self.count,
            capa = self.capa,
            "ordered map: full-hash collision budget exceeded; \
             degrading to hash-only equality (under attack?)"
        );
    }

    /// Append a live entry to the dense storage and the insertion-order
    /// list. Caller guarantees `pos < ordered_capa()`.
    fn append(&mut self, hash: u64, obj: E) -> u32 {
        let p = self.pos;
        debug_assert!(p < self.ordered_capa());
        let tail = self.tail;
        *self.entry_mut(p) = Ordered {
            hash,
            prev: tail,
            next: NIL,
            obj: MaybeUninit::new(obj),
        };
        if tail != NIL {
            self.entry_mut(tail).next = p;
        } else {
            self.head = p;
        }
        self.tail = p;
        self.pos += 1;
        self.count += 1;
        p
    }

    /// Unlink entry `p` from the insertion-order list and mark it a hole.
    fn unlink(&mut self, p: u32) {
        let (prev, next) = {
            let e = self.entry(p);
            (e.prev, e.next)
        };
        if prev != NIL {
            self.entry_mut(prev).next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.entry_mut(next).prev = prev;
        } else {
            self.tail = prev;
        }
        let e = self.entry_mut(p);
        e.hash = 0;
        e.next = NIL;
        e.prev = NIL;
    }

    /// More than 50% of the dense prefix is holes.
    fn is_fragmented(&self) -> bool {
        (self.pos - self.count) > (self.count >> 1)
    }

    /// Insert (or overwrite) `obj` under `hash`. `eq` compares a stored
    /// entry against the candidate; `replace` merges the candidate into a
    /// matching stored entry and returns the displaced material (a keyed
    /// map swaps only the value, keeping the stored key object; a set
    /// swaps the whole entry). Returns the displaced entry on overwrite,
    /// or the rejected candidate when `overwrite == false` found an
    /// existing entry.
    fn insert(
        &mut self,
        hash: u64,
        obj: E,
        overwrite: bool,
        mut eq: impl FnMut(&E, &E) -> bool,
        mut replace: impl FnMut(&mut E, E) -> E,
    ) -> InsertOutcome<E> {
        let hash = Self::fold(hash);

        if self.capa == 0 {
            self.rehash_to(2);
        } else if self.is_fragmented() {
            self.rehash_to(self.used_bits);
        } else if self.pos >= self.ordered_capa() {
            self.rehash_to(self.used_bits + 1);
        }

        let mut failed_growths = 0u8;
        loop {
            let (seek, flags) = {
                let candidate = &obj;
                self.seek(hash, |stored| eq(stored, candidate))
            };
            self.apply_flags(&flags);
            match seek {
                Seek::Hit(idx) => {
                    let p = self.slot(idx).pos;
                    if !overwrite {
                        return InsertOutcome::Kept(obj, p);
                    }
                    let old = {
                        let stored = unsafe { self.entry_mut(p).obj.assume_init_mut() };
                        replace(stored, obj)
                    };
                    return InsertOutcome::Replaced(old, p);
                }
                Seek::Hole(idx) | Seek::Empty(idx) => {
                    let p = self.append(hash, obj);
                    let slot = self.slot_mut(idx);
                    slot.hash = hash;
                    slot.pos = p;
                    return InsertOutcome::Inserted(p);
                }
                Seek::Exhausted => {
                    // No slot within budget: double and try again. Three
                    // consecutive failures mean the keys are engineered;
                    // switch to attack mode instead of growing forever.
                    failed_growths += 1;
                    if failed_growths >= 3 && !self.under_attack {
                        self.enter_attack_mode();
                    }
                    self.rehash_to(self.used_bits.max(1) + 1);
                }
            }
        }
    }

    /// Remove the entry matching `hash`/`eq`. Removing the newest entry
    /// pops the dense tail instead of leaving a hole.
    fn remove(&mut self, hash: u64, eq: impl FnMut(&E) -> bool) -> Option<E> {
        let hash = Self::fold(hash);
        let (seek, flags) = self.seek(hash, eq);
        self.apply_flags(&flags);
        let Seek::Hit(idx) = seek else {
            return None;
        };

        let p = self.slot(idx).pos;
        let obj = unsafe { self.entry(p).obj.assume_init_read() };
        self.unlink(p);
        self.count -= 1;

        if p + 1 == self.pos {
            // Newest entry: reclaim the dense tail (and any holes under
            // it) and hand the probe slot back as truly empty.
            let slot = self.slot_mut(idx);
            slot.hash = 0;
            slot.pos = 0;
            while self.pos > 0 && self.entry(self.pos - 1).hash == 0 {
                self.pos -= 1;
            }
        } else {
            self.slot_mut(idx).pos = NIL;
        }

        self.maybe_shrink();
        Some(obj)
    }

    fn maybe_shrink(&mut self) {
        if self.used_bits < 8 || self.count as usize >= (self.capa as usize) / 8 {
            return;
        }
        let mut bits = self.used_bits;
        while bits > 2 && (self.count as usize) * 4 < (1usize << bits) {
            bits -= 1;
        }
        if bits != self.used_bits {
            self.rehash_to(bits);
        }
    }

    /// Rebuild both arrays at `2^bits` probe slots, dropping holes and
    /// renumbering the dense storage in insertion order.
    fn rehash_to(&mut self, mut bits: u8) {
        stat_inc!(map_rehashes);
        self.has_collisions = false;

        let mut attempts = 0u8;
        'rebuild: loop {
            let capa = 1u32 << bits;
            let ordered_capa = (capa / 2).max(1) as usize;
            if (self.count as usize) > ordered_capa {
                bits += 1;
                continue;
            }

            let map = slab::calloc(size_of::<Slot>(), capa as usize) as *mut Slot;
            let ordered =
                slab::malloc(ordered_capa * size_of::<Ordered<E>>()) as *mut Ordered<E>;
            if map.is_null() || ordered.is_null() {
                panic!("slabkit: map allocation failed ({capa} slots)");
            }

            // Move live entries across in insertion order.
            let mask = (capa - 1) as u64;
            let budget = (mask as usize).min(MAP_MAX_SEEK);
            let mut new_pos: u32 = 0;
            let mut src = self.head;
            while src != NIL {
                let e = self.entry(src);
                let hash = e.hash;
                let next_src = e.next;

                // All entries are distinct keys here, so any hash-equal
                // slot on the path is a genuine full collision.
                let primary = Self::primary(hash, bits, mask);
                let mut collisions = 0usize;
                let mut placed = false;
                for attempt in 0..=budget as u64 {
                    let idx =
                        ((primary + attempt.wrapping_mul(MAP_PROBE_STEP)) & mask) as usize;
                    let slot = unsafe { &mut *map.add(idx) };
                    if slot.hash == 0 {
                        slot.hash = hash;
                        slot.pos = new_pos;
                        placed = true;
                        break;
                    }
                    if slot.hash == hash {
                        self.has_collisions = true;
                        collisions += 1;
                        if self.under_attack || collisions >= MAP_MAX_FULL_COLLISIONS {
                            // Degraded placement: later entry shadows the
                            // earlier same-hash one in the probe table.
                            slot.pos = new_pos;
                            placed = true;
                            break;
                        }
                    }
                }
                if !placed {
                    unsafe {
                        slab::free(map as *mut u8);
                        slab::free(ordered as *mut u8);
                    }
                    attempts += 1;
                    if attempts >= 3 && !self.under_attack {
                        self.enter_attack_mode();
                    }
                    bits += 1;
                    continue 'rebuild;
                }

                unsafe {
                    let obj = self.entry(src).obj.assume_init_read();
                    *ordered.add(new_pos as usize) = Ordered {
                        hash,
                        prev: if new_pos == 0 { NIL } else { new_pos - 1 },
                        next: NIL,
                        obj: MaybeUninit::new(obj),
                    };
                    if new_pos > 0 {
                        (*ordered.add(new_pos as usize - 1)).next = new_pos;
                    }
                }
                new_pos += 1;
                src = next_src;
            }

            debug_assert_eq!(new_pos, self.count);
            self.release_arrays();
            self.map = map;
            self.ordered = ordered;
            self.capa = capa;
            self.used_bits = bits;
            self.pos = new_pos;
            self.head = if new_pos == 0 { NIL } else { 0 };
            self.tail = if new_pos == 0 { NIL } else { new_pos - 1 };
            return;
        }
    }

    fn release_arrays(&mut self) {
        unsafe {
            if !self.map.is_null() {
                slab::free(self.map as *mut u8);
            }
            if !self.ordered.is_null() {
                slab::free(self.ordered as *mut u8);
            }
        }
        self.map = ptr::null_mut();
        self.ordered = ptr::null_mut();
    }

    fn find_idx(&self, hash: u64, eq: impl FnMut(&E) -> bool) -> Option<u32> {
        let hash = Self::fold(hash);
        match self.seek(hash, eq).0 {
            Seek::Hit(idx) => Some(self.slot(idx).pos),
            _ => None,
        }
    }

    fn last(&self) -> Option<&E> {
        if self.tail == NIL {
            return None;
        }
        Some(unsafe { self.entry(self.tail).obj.assume_init_ref() })
    }

    /// Drop every live entry; keep the allocated arrays.
    fn clear(&mut self) {
        let mut at = self.head;
        while at != NIL {
            let e = self.entry_mut(at);
            let next = e.next;
            unsafe { e.obj.assume_init_drop() };
            e.hash = 0;
            at = next;
        }
        if !self.map.is_null() {
            unsafe {
                ptr::write_bytes(self.map as *mut u8, 0, self.capa as usize * size_of::<Slot>());
            }
        }
        self.pos = 0;
        self.count = 0;
        self.head = NIL;
        self.tail = NIL;
        self.has_collisions = false;
    }

    fn iter(&self) -> CoreIter<'_, E> {
        CoreIter {
            core: self,
            next: self.head,
            remaining: self.count as usize,
        }
    }
}

enum InsertOutcome<E> {
    /// Fresh entry stored at the given dense index.
    Inserted(u32),
    /// Existing entry displaced; the old entry is returned.
    Replaced(E, u32),
    /// `overwrite == false` and an entry existed; the candidate returns.
    Kept(E, u32),
}

impl<E> Drop for MapCore<E> {
    fn drop(&mut self) {
        self.clear();
        self.release_arrays();
    }
}

struct CoreIter<'a, E> {
    core: &'a MapCore<E>,
    next: u32,
    remaining: usize,
}

impl<'a, E> Iterator for CoreIter<'a, E> {
    type Item = &'a E;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == NIL {
            return None;
        }
        let e = self.core.entry(self.next);
        self.next = e.next;
        self.remaining -= 1;
        Some(unsafe { e.obj.assume_init_ref() })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

// ---------------------------------------------------------------------------
// Key hashing
// ---------------------------------------------------------------------------

/// Default key hashing for the `*_keyed` convenience methods: Risky Hash
/// over the key's byte representation.
pub trait KeyHash {
    fn key_hash(&self) -> u64;
}

const KEY_SEED: u64 = 0x5194_D4B6_29C3_A347;

impl<T: KeyHash + ?Sized> KeyHash for &T {
    fn key_hash(&self) -> u64 {
        (**self).key_hash()
    }
}

impl KeyHash for [u8] {
    fn key_hash(&self) -> u64 {
        risky_hash(self, KEY_SEED)
    }
}

impl KeyHash for str {
    fn key_hash(&self) -> u64 {
        risky_hash(self.as_bytes(), KEY_SEED)
    }
}

impl KeyHash for String {
    fn key_hash(&self) -> u64 {
        self.as_str().key_hash()
    }
}

impl KeyHash for Vec<u8> {
    fn key_hash(&self) -> u64 {
        self.as_slice().key_hash()
    }
}

macro_rules! impl_keyhash_int {
    ($($t:ty),*) => {$(
        impl KeyHash for $t {
            fn key_hash(&self) -> u64 {
                risky_hash(&(*self as u64).to_le_bytes(), KEY_SEED)
            }
        }
    )*};
}

impl_keyhash_int!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

// ---------------------------------------------------------------------------
// OrderedMap
// ---------------------------------------------------------------------------

/// Key/value couplet stored by [`OrderedMap`]; only keys are compared.
struct Couplet<K, V> {
    key: K,
    value: V,
}

/// An insertion-order-preserving hash map.
///
/// Hashes are supplied by the caller (`insert`/`find`/`remove`), or
/// derived via [`KeyHash`] by the `*_keyed` convenience methods. Iteration
/// yields entries in strict insertion order; overwriting keeps the entry's
/// original position.
///
/// Once [`OrderedMap::under_attack`] reports true, lookups stop comparing
/// keys and return the first entry with a matching 64-bit hash.
pub struct OrderedMap<K, V> {
    core: MapCore<Couplet<K, V>>,
}

impl<K: PartialEq, V> OrderedMap<K, V> {
    pub const fn new() -> Self {
        Self {
            core: MapCore::new(),
        }
    }

    /// Number of live entries.
    pub fn count(&self) -> usize {
        self.core.count as usize
    }

    /// Probe-table capacity (zero before the first insert).
    pub fn capa(&self) -> usize {
        self.core.capa as usize
    }

    pub fn is_empty(&self) -> bool {
        self.core.count == 0
    }

    /// True once the table has degraded to hash-only equality.
    pub fn under_attack(&self) -> bool {
        self.core.under_attack
    }

    /// True when two distinct keys with identical 64-bit hashes have met.
    pub fn has_collisions(&self) -> bool {
        self.core.has_collisions
    }

    /// True when more than half the dense storage is removal holes; a
    /// [`OrderedMap::rehash`] (or the next insert) reclaims them.
    pub fn is_fragmented(&self) -> bool {
        self.core.is_fragmented()
    }

    /// Insert or overwrite, returning the previous value for the key.
    /// Overwriting updates the value in place; the stored key object is
    /// kept, and the candidate key is dropped.
    pub fn insert(&mut self, hash: u64, key: K, value: V) -> Option<V> {
        let outcome = self.core.insert(
            hash,
            Couplet { key, value },
            true,
            |stored, cand| stored.key == cand.key,
            |stored, cand| Couplet {
                key: cand.key,
                value: core::mem::replace(&mut stored.value, cand.value),
            },
        );
        match outcome {
            InsertOutcome::Replaced(old, _) => Some(old.value),
            _ => None,
        }
    }

    /// Look up the value stored under `hash`/`key`.
    pub fn find(&self, hash: u64, key: &K) -> Option<&V> {
        let idx = self.core.find_idx(hash, |c| &c.key == key)?;
        Some(unsafe { &self.core.entry(idx).obj.assume_init_ref().value })
    }

    pub fn find_mut(&mut self, hash: u64, key: &K) -> Option<&mut V> {
        let idx = self.core.find_idx(hash, |c| &c.key == key)?;
        Some(unsafe { &mut self.core.entry_mut(idx).obj.assume_init_mut().value })
    }

    /// Remove the entry for `key`, returning its value.
    pub fn remove(&mut self, hash: u64, key: &K) -> Option<V> {
        self.core.remove(hash, |c| &c.key == key).map(|c| c.value)
    }

    /// The newest live entry.
    pub fn last(&self) -> Option<(&K, &V)> {
        self.core.last().map(|c| (&c.key, &c.value))
    }

    /// Remove and return the newest live entry.
    pub fn pop(&mut self) -> Option<(K, V)> {
        if self.core.tail == NIL {
            return None;
        }
        let tail_entry = self.core.entry(self.core.tail);
        let hash = tail_entry.hash;
        // Identity match against the tail entry, not key equality: pop
        // must take the newest entry even among equal-hash keys.
        let target = unsafe { tail_entry.obj.assume_init_ref() as *const Couplet<K, V> };
        self.core
            .remove(hash, |c| ptr::eq(c, target))
            .map(|c| (c.key, c.value))
    }

    /// Pre-size for at least `min_capa` entries.
    pub fn reserve(&mut self, min_capa: usize) {
        if min_capa * 2 <= self.core.capa as usize {
            return;
        }
        let mut bits = 2u8;
        while (1usize << bits) < min_capa * 2 {
            bits += 1;
        }
        self.core.rehash_to(bits);
    }

    /// Drop holes and shrink to the smallest table that fits.
    pub fn compact(&mut self) {
        let mut bits = 2u8;
        while (1usize << bits) < (self.core.count as usize) * 2 {
            bits += 1;
        }
        self.core.rehash_to(bits);
    }

    /// Force a full rehash at the current size (drops holes).
    pub fn rehash(&mut self) {
        self.core.rehash_to(self.core.used_bits.max(2));
    }

    /// Remove every entry, keeping the table memory.
    pub fn clear(&mut self) {
        self.core.clear();
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.core.iter().map(|c| (&c.key, &c.value))
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.core.iter().map(|c| &c.key)
    }

    /// Values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.core.iter().map(|c| &c.value)
    }
}

impl<K: PartialEq + KeyHash, V> OrderedMap<K, V> {
    /// [`OrderedMap::insert`] with the hash derived from the key.
    pub fn insert_keyed(&mut self, key: K, value: V) -> Option<V> {
        let hash = key.key_hash();
        self.insert(hash, key, value)
    }

    /// [`OrderedMap::find`] with the hash derived from the key.
    pub fn find_keyed(&self, key: &K) -> Option<&V> {
        self.find(key.key_hash(), key)
    }

    /// [`OrderedMap::remove`] with the hash derived from the key.
    pub fn remove_keyed(&mut self, key: &K) -> Option<V> {
        self.remove(key.key_hash(), key)
    }
}

impl<K: PartialEq, V> Default for OrderedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// OrderedSet
// ---------------------------------------------------------------------------

/// An insertion-order-preserving hash set.
///
/// `insert` keeps an existing equal member (dropping the candidate);
/// `overwrite` replaces it. Same attack-mode semantics as [`OrderedMap`].
pub struct OrderedSet<T> {
    core: MapCore<T>,
}

impl<T: PartialEq> OrderedSet<T> {
    pub const fn new() -> Self {
        Self {
            core: MapCore::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.core.count as usize
    }

    pub fn capa(&self) -> usize {
        self.core.capa as usize
    }

    pub fn is_empty(&self) -> bool {
        self.core.count == 0
    }

    pub fn under_attack(&self) -> bool {
        self.core.under_attack
    }

    /// See [`OrderedMap::is_fragmented`].
    pub fn is_fragmented(&self) -> bool {
        self.core.is_fragmented()
    }

    /// Insert `obj` unless an equal member exists. Returns a reference to
    /// the member (existing or fresh).
    pub fn insert(&mut self, hash: u64, obj: T) -> &T {
        let idx = match self.core.insert(
            hash,
            obj,
            false,
            |stored, cand| stored == cand,
            core::mem::replace,
        ) {
            InsertOutcome::Inserted(p)
            | InsertOutcome::Replaced(_, p)
            | InsertOutcome::Kept(_, p) => p,
        };
        unsafe { self.core.entry(idx).obj.assume_init_ref() }
    }

    /// Insert `obj`, replacing (and returning) an equal existing member.
    pub fn overwrite(&mut self, hash: u64, obj: T) -> Option<T> {
        match self.core.insert(
            hash,
            obj,
            true,
            |stored, cand| stored == cand,
            core::mem::replace,
        ) {
            InsertOutcome::Replaced(old, _) => Some(old),
            _ => None,
        }
    }

    /// Look up the member equal to `obj`.
    pub fn find(&self, hash: u64, obj: &T) -> Option<&T> {
        let idx = self.core.find_idx(hash, |e| e == obj)?;
        Some(unsafe { self.core.entry(idx).obj.assume_init_ref() })
    }

    /// Remove and return the member equal to `obj`.
    pub fn remove(&mut self, hash: u64, obj: &T) -> Option<T> {
        self.core.remove(hash, |e| e == obj)
    }

    /// The newest member.
    pub fn last(&self) -> Option<&T> {
        self.core.last()
    }

    /// Members in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.core.iter()
    }

    pub fn clear(&mut self) {
        self.core.clear();
    }
}

impl<T: PartialEq + KeyHash> OrderedSet<T> {
    /// [`OrderedSet::insert`] with the hash derived from the member.
    pub fn insert_keyed(&mut self, obj: T) -> &T {
        let hash = obj.key_hash();
        self.insert(hash, obj)
    }

    /// [`OrderedSet::find`] with the hash derived from the member.
    pub fn find_keyed(&self, obj: &T) -> Option<&T> {
        self.find(obj.key_hash(), obj)
    }

    /// [`OrderedSet::remove`] with the hash derived from the member.
    pub fn remove_keyed(&mut self, obj: &T) -> Option<T> {
        self.remove(obj.key_hash(), obj)
    }
}

impl<T: PartialEq> Default for OrderedSet<T> {
    fn default() -> Self {
        Self::new()
    }
}
