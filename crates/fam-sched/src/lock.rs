//! Mutex with owner tracking
//!
//! A `parking_lot` mutex that remembers which thread holds it. Locking it
//! again from the holder panics instead of deadlocking, and a holder that
//! panics leaves the lock poisoned so later users fail fast. A guard taken
//! while its thread is already unwinding does not poison on release.

use parking_lot::{Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

/// No thread holds the lock
const UNOWNED: u64 = 0;

/// Process-unique token for the calling thread
fn thread_token() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static TOKEN: u64 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    TOKEN.with(|t| *t)
}

/// Owner-tracking mutex
pub struct GuardedLock<T> {
    name: &'static str,
    owner: AtomicU64,
    poisoned: AtomicBool,
    inner: Mutex<T>,
}

impl<T> GuardedLock<T> {
    /// Create an unlocked lock. `name` appears in misuse panics.
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            owner: AtomicU64::new(UNOWNED),
            poisoned: AtomicBool::new(false),
            inner: Mutex::new(value),
        }
    }

    /// Acquire the lock, blocking while another thread holds it.
    ///
    /// # Panics
    /// If the calling thread already holds the lock, or a previous holder
    /// panicked while holding it.
    pub fn lock(&self) -> LockGuard<'_, T> {
        let me = thread_token();
        if self.owner.load(Ordering::Acquire) == me {
            panic!("re-entrant acquisition of the {} lock", self.name);
        }
        let guard = self.inner.lock();
        if self.poisoned.load(Ordering::Acquire) {
            panic!("the {} lock was poisoned by a panicking holder", self.name);
        }
        self.owner.store(me, Ordering::Release);
        LockGuard {
            lock: self,
            guard,
            panicking: thread::panicking(),
        }
    }

    /// Acquire the lock even if it is poisoned, for tearing down state that
    /// must be released either way. Re-entry still panics.
    pub(crate) fn lock_for_teardown(&self) -> LockGuard<'_, T> {
        let me = thread_token();
        if self.owner.load(Ordering::Acquire) == me {
            panic!("re-entrant acquisition of the {} lock", self.name);
        }
        let guard = self.inner.lock();
        self.owner.store(me, Ordering::Release);
        LockGuard {
            lock: self,
            guard,
            panicking: thread::panicking(),
        }
    }

    /// True if a holder panicked while holding the lock
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// True if the calling thread holds the lock
    pub fn is_held_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Acquire) == thread_token()
    }
}

impl<T> std::fmt::Debug for GuardedLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedLock")
            .field("name", &self.name)
            .field("locked", &self.inner.is_locked())
            .field("poisoned", &self.is_poisoned())
            .finish()
    }
}

/// Scoped access to the data behind a [`GuardedLock`]
pub struct LockGuard<'a, T> {
    lock: &'a GuardedLock<T>,
    guard: MutexGuard<'a, T>,
    /// The thread was already unwinding when the guard was taken
    panicking: bool,
}

impl<T> Deref for LockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for LockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for LockGuard<'_, T> {
    fn drop(&mut self) {
        if !self.panicking && thread::panicking() {
            self.lock.poisoned.store(true, Ordering::Release);
        }
        // the inner guard unlocks after this body, so ownership is
        // cleared while the mutex is still held
        self.lock.owner.store(UNOWNED, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Arc;

    #[test]
    fn test_lock_and_mutate() {
        let lock = GuardedLock::new("counter", 0u32);
        *lock.lock() += 1;
        *lock.lock() += 1;
        assert_eq!(*lock.lock(), 2);
        assert!(!lock.is_held_by_current_thread());
    }

    #[test]
    fn test_owner_is_tracked() {
        let lock = GuardedLock::new("owner", ());
        let guard = lock.lock();
        assert!(lock.is_held_by_current_thread());
        drop(guard);
        assert!(!lock.is_held_by_current_thread());
    }

    #[test]
    #[should_panic(expected = "re-entrant acquisition of the registry lock")]
    fn test_reentrant_lock_panics() {
        let lock = GuardedLock::new("registry", ());
        let _outer = lock.lock();
        let _inner = lock.lock();
    }

    #[test]
    fn test_panicking_holder_poisons() {
        let lock = Arc::new(GuardedLock::new("shared", 5));
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.lock();
            panic!("holder failed");
        }));
        assert!(result.is_err());
        assert!(lock.is_poisoned());

        let relock = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.lock();
        }));
        assert!(relock.is_err());
    }

    #[test]
    fn test_lock_taken_during_unwind_does_not_poison() {
        struct TouchOnDrop<'a>(&'a GuardedLock<u32>);
        impl Drop for TouchOnDrop<'_> {
            fn drop(&mut self) {
                *self.0.lock() += 1;
            }
        }

        let lock = GuardedLock::new("unwind", 0u32);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _touch = TouchOnDrop(&lock);
            panic!("unrelated failure");
        }));
        assert!(result.is_err());
        assert!(!lock.is_poisoned());
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn test_teardown_lock_ignores_poison() {
        let lock = GuardedLock::new("teardown", vec![1, 2]);
        let _ = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.lock();
            panic!("holder failed");
        }));
        assert!(lock.is_poisoned());
        assert_eq!(lock.lock_for_teardown().len(), 2);
    }

    #[test]
    fn test_other_threads_wait_their_turn() {
        let lock = Arc::new(GuardedLock::new("threads", 0u64));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }
}
