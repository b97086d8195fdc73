//! # Spin Lock

use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A small spinlock for short critical sections.
///
/// Suitable where critical sections are a handful of loads and stores:
/// reference-count updates, flipping a permission bit, relinking a table
/// slot. Contending threads busy-wait with [`spin_loop`], so the protected
/// work must never block or perform I/O.
///
/// # Guarantees
/// - Mutual exclusion for access to the protected value.
/// - `Sync` when `T: Send`, so the lock may be shared across threads
///   (interior mutability is mediated by the lock itself).
///
/// # Caveats
/// - Does **not** mask interrupts; callers that touch interrupt-sensitive
///   state must bracket the acquisition themselves.
/// - Not fair and not reentrant.
pub struct SpinLock<T> {
    /// Lock state (`false` = unlocked, `true` = locked).
    held: AtomicBool,
    /// The protected value.
    value: UnsafeCell<T>,
}

// Safety: the lock provides mutual exclusion; the value may cross threads
// as long as T is Send.
unsafe impl<T: Send> Sync for SpinLock<T> {}
unsafe impl<T: Send> Send for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Create a new unlocked `SpinLock` wrapping `value`.
    pub const fn new(value: T) -> Self {
        Self {
            held: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquire the lock, spinning until it becomes available.
    ///
    /// The returned guard releases the lock on drop.
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        // Try once, then spin on a plain load to avoid cache-line ping-pong.
        while self.held.swap(true, Ordering::Acquire) {
            while self.held.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
        SpinLockGuard { lock: self }
    }

    /// Attempt to acquire the lock without spinning.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.held.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(SpinLockGuard { lock: self })
        }
    }

    /// Execute `f` with exclusive access to the inner value.
    ///
    /// Equivalent to `lock()` for the duration of `f`; the lock is released
    /// when `f` returns (or unwinds).
    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }

    /// Whether the lock is currently held by someone.
    ///
    /// Only a snapshot; the answer may be stale by the time it is read.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }

    /// Returns a mutable reference to the inner value.
    ///
    /// Holding `&mut self` proves no other reference exists, so no locking
    /// is needed.
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Consume the lock and return the inner value.
    #[inline]
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

/// A guard that releases a [`SpinLock`] when dropped.
///
/// Created by [`SpinLock::lock`] and [`SpinLock::try_lock`]. Implements
/// [`Deref`] and [`DerefMut`] to access the protected value.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard holds the lock exclusively.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard holds the lock exclusively.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}
