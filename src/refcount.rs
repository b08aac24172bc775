//! Atomic reference-counting envelope over any value type.
//!
//! A [`Ref<T>`] handle points at the value embedded in a slab-allocated
//! header; the counter is recovered by a fixed offset subtraction, so the
//! handle round-trips through raw pointers (`into_raw`/`from_raw`) without
//! carrying the header address. `dup`/drop are safe from any number of
//! threads. Last releaser destroys the value and frees the envelope.
//!
//! No cycle collection: a `Ref` cycle leaks. Callers building
//! container-of-container-of-self graphs must break cycles themselves.

use crate::slab;
use core::mem::offset_of;
use core::ops::Deref;
use core::ptr::NonNull;
use core::sync::atomic::{fence, AtomicUsize, Ordering};

#[repr(C)]
struct RefInner<T, M = ()> {
    refs: AtomicUsize,
    meta: M,
    value: T,
}

/// A shared-ownership handle to a slab-allocated `T`, with optional
/// metadata `M` stored alongside the counter.
pub struct Ref<T, M = ()> {
    value: NonNull<T>,
    _marker: core::marker::PhantomData<RefInner<T, M>>,
}

unsafe impl<T: Send + Sync, M: Send + Sync> Send for Ref<T, M> {}
unsafe impl<T: Send + Sync, M: Send + Sync> Sync for Ref<T, M> {}

impl<T> Ref<T> {
    /// Allocate a new envelope with `refs == 1`.
    pub fn new(value: T) -> Self {
        Self::with_meta(value, ())
    }
}

impl<T, M> Ref<T, M> {
    /// Allocate a new envelope with `refs == 1` and attached metadata.
    pub fn with_meta(value: T, meta: M) -> Self {
        assert!(align_of::<RefInner<T, M>>() <= slab::ALIGNMENT, "over-aligned value");
        let inner = slab::malloc(size_of::<RefInner<T, M>>()) as *mut RefInner<T, M>;
        if inner.is_null() {
            panic!("slabkit: ref envelope allocation failed");
        }
        unsafe {
            inner.write(RefInner {
                refs: AtomicUsize::new(1),
                meta,
                value,
            });
            Self::from_value_ptr(NonNull::new_unchecked(&raw mut (*inner).value))
        }
    }

    #[inline]
    unsafe fn from_value_ptr(value: NonNull<T>) -> Self {
        Self {
            value,
            _marker: core::marker::PhantomData,
        }
    }

    #[inline]
    fn inner(&self) -> &RefInner<T, M> {
        // The header sits a fixed offset before the embedded value.
        unsafe {
            &*((self.value.as_ptr() as *mut u8).sub(offset_of!(RefInner<T, M>, value))
                as *const RefInner<T, M>)
        }
    }

    /// Take another reference to the same envelope.
    pub fn dup(&self) -> Self {
        // Relaxed is enough: the caller already holds a reference, so the
        // count cannot reach zero concurrently.
        self.inner().refs.fetch_add(1, Ordering::Relaxed);
        unsafe { Self::from_value_ptr(self.value) }
    }

    /// Current reference count (racy; for diagnostics and tests).
    pub fn count(&self) -> usize {
        self.inner().refs.load(Ordering::Acquire)
    }

    /// The attached metadata.
    pub fn meta(&self) -> &M {
        &self.inner().meta
    }

    /// Leak this handle as a raw value pointer. Reconstruct (and resume
    /// ownership) with [`Ref::from_raw`]. The pointer may carry low tag
    /// bits through [`crate::TaggedPtr`] without disturbing the envelope.
    pub fn into_raw(self) -> *const T {
        let p = self.value.as_ptr();
        core::mem::forget(self);
        p
    }

    /// Reclaim a handle leaked by [`Ref::into_raw`].
    ///
    /// # Safety
    /// `ptr` must have come from `into_raw` on a handle of the exact same
    /// `T`/`M` instantiation whose reference has not already been
    /// reclaimed.
    pub unsafe fn from_raw(ptr: *const T) -> Self {
        unsafe { Self::from_value_ptr(NonNull::new_unchecked(ptr as *mut T)) }
    }
}

impl<T, M> Deref for Ref<T, M> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { self.value.as_ref() }
    }
}

impl<T, M> Clone for Ref<T, M> {
    fn clone(&self) -> Self {
        self.dup()
    }
}

impl<T, M> Drop for Ref<T, M> {
    fn drop(&mut self) {
        // Release on the decrement so our writes happen-before the
        // destroyer; acquire fence before destroying so we observe every
        // other thread's writes.
        if self.inner().refs.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        fence(Ordering::Acquire);
        unsafe {
            let inner = (self.value.as_ptr() as *mut u8)
                .sub(offset_of!(RefInner<T, M>, value)) as *mut RefInner<T, M>;
            core::ptr::drop_in_place(inner);
            slab::free(inner as *mut u8);
        }
    }
}

impl<T: core::fmt::Debug, M> core::fmt::Debug for Ref<T, M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Ref({:?})", &**self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomic;

    #[test]
    fn test_new_starts_at_one() {
        let r = Ref::new(42u64);
        assert_eq!(r.count(), 1);
        assert_eq!(*r, 42);
    }

    #[test]
    fn test_dup_and_release_destroy_once() {
        static DROPS: StdAtomic = StdAtomic::new(0);
        struct Canary;
        impl Drop for Canary {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        let r = Ref::new(Canary);
        let dups: Vec<_> = (0..10).map(|_| r.dup()).collect();
        assert_eq!(r.count(), 11);
        drop(dups);
        assert_eq!(r.count(), 1);
        assert_eq!(DROPS.load(Ordering::SeqCst), 0);
        drop(r);
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_metadata() {
        let r = Ref::with_meta(String::from("payload"), 7u32);
        assert_eq!(*r.meta(), 7);
        assert_eq!(r.as_str(), "payload");
        let d = r.dup();
        assert_eq!(*d.meta(), 7);
    }

    #[test]
    fn test_raw_round_trip() {
        let r = Ref::new(5i32);
        let d = r.dup();
        let p = r.into_raw();
        assert_eq!(d.count(), 2, "into_raw must not release");
        let back = unsafe { Ref::<i32>::from_raw(p) };
        assert_eq!(*back, 5);
        drop(back);
        assert_eq!(d.count(), 1);
    }

    #[test]
    fn test_concurrent_dup_release() {
        let r = Ref::new(AtomicUsize::new(0));
        let threads = 8;
        let iters = 10_000;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let local = r.dup();
                std::thread::spawn(move || {
                    for _ in 0..iters {
                        let d = local.dup();
                        d.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(r.count(), 1);
        assert_eq!(r.load(Ordering::Relaxed), threads * iters);
    }
}
