//! Lightweight synchronization primitives for use across the kit.
//!
//! We cannot use `std::sync::Mutex` inside the allocator because it
//! allocates. Instead we provide a single-byte test-and-set spinlock and a
//! `SpinMutex<T>` wrapper, plus thin named wrappers over the sequentially
//! consistent atomic operations the rest of the kit leans on.

use crate::platform;
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Atomically swaps in `val`, returning the previous value.
#[inline]
pub fn xchg(a: &AtomicUsize, val: usize) -> usize {
    a.swap(val, Ordering::SeqCst)
}

/// Atomically adds `val`, returning the previous value.
#[inline]
pub fn add(a: &AtomicUsize, val: usize) -> usize {
    a.fetch_add(val, Ordering::SeqCst)
}

/// Atomically subtracts `val`, returning the previous value.
#[inline]
pub fn sub(a: &AtomicUsize, val: usize) -> usize {
    a.fetch_sub(val, Ordering::SeqCst)
}

/// Atomically ANDs in `val`, returning the previous value.
#[inline]
pub fn and(a: &AtomicUsize, val: usize) -> usize {
    a.fetch_and(val, Ordering::SeqCst)
}

/// Atomically ORs in `val`, returning the previous value.
#[inline]
pub fn or(a: &AtomicUsize, val: usize) -> usize {
    a.fetch_or(val, Ordering::SeqCst)
}

/// Atomically XORs in `val`, returning the previous value.
#[inline]
pub fn xor(a: &AtomicUsize, val: usize) -> usize {
    a.fetch_xor(val, Ordering::SeqCst)
}

/// Atomically NANDs in `val`, returning the previous value.
#[inline]
pub fn nand(a: &AtomicUsize, val: usize) -> usize {
    a.fetch_nand(val, Ordering::SeqCst)
}

/// A simple test-and-set spinlock over a single byte.
///
/// Contended acquisition backs off with a 1 ns `nanosleep`, which in
/// practice reschedules the thread. No fairness guarantee: callers keep
/// critical sections down to a few dozen instructions.
pub struct SpinLock {
    locked: AtomicBool,
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn lock(&self) {
        if self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            return;
        }
        self.lock_slow();
    }

    #[cold]
    fn lock_slow(&self) {
        while !self.try_lock() {
            platform::throttle_thread();
        }
    }

    #[inline]
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    #[inline]
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Forces the lock back to the unlocked state.
    ///
    /// Only for post-`fork` recovery, where the thread that held the lock
    /// no longer exists in the child process.
    #[inline]
    pub fn force_unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }
}

unsafe impl Send for SpinLock {}
unsafe impl Sync for SpinLock {}

/// A mutex that uses a spinlock for synchronization.
/// Does not allocate and can be used in a `static`.
pub struct SpinMutex<T> {
    lock: SpinLock,
    data: UnsafeCell<T>,
}

impl<T> SpinMutex<T> {
    pub const fn new(val: T) -> Self {
        Self {
            lock: SpinLock::new(),
            data: UnsafeCell::new(val),
        }
    }

    #[inline]
    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        self.lock.lock();
        SpinMutexGuard { mutex: self }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<SpinMutexGuard<'_, T>> {
        if self.lock.try_lock() {
            Some(SpinMutexGuard { mutex: self })
        } else {
            None
        }
    }

    /// See [`SpinLock::force_unlock`].
    #[inline]
    pub fn force_unlock(&self) {
        self.lock.force_unlock();
    }
}

unsafe impl<T: Send> Send for SpinMutex<T> {}
unsafe impl<T: Send> Sync for SpinMutex<T> {}

/// RAII guard for `SpinMutex`. Unlocks on drop.
pub struct SpinMutexGuard<'a, T> {
    mutex: &'a SpinMutex<T>,
}

impl<T> Deref for SpinMutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for SpinMutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for SpinMutexGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.mutex.lock.unlock();
    }
}
