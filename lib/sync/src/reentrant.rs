//! A blocking, reentrant mutual exclusion lock.

use std::{
    error, fmt,
    ops::Deref,
    sync::{Condvar, Mutex},
    thread::{self, ThreadId},
};

/// Tracks which thread currently holds the lock and how many times it has re-entered.
struct Owner {
    thread: Option<ThreadId>,
    depth: u32,
}

/// A mutual exclusion primitive that the owning thread may re-acquire without deadlocking.
///
/// This is the coarse "program lock" a memory map holds across every public mutator and across
/// multi-step reads that need a consistent snapshot. A thread that already holds the lock (for
/// example, a mutator that calls another locking helper internally) re-enters it instead of
/// blocking on itself; the lock is only actually released once the outermost guard is dropped.
pub struct ReentrantLock<T: ?Sized> {
    owner: Mutex<Owner>,
    released: Condvar,
    value: std::cell::UnsafeCell<T>,
}

// SAFETY:
// Access to `value` is always gated by `owner`, which a single thread holds exclusively (modulo
// reentrant re-acquisition by that same thread); nothing about sharing `ReentrantLock<T>` across
// threads changes whether `T` is safe to send.
unsafe impl<T: ?Sized + Send> Send for ReentrantLock<T> {}
// SAFETY:
// If `T` is `Send`, serializing access to it behind `owner` makes concurrent access from multiple
// threads sound.
unsafe impl<T: ?Sized + Send> Sync for ReentrantLock<T> {}

impl<T> ReentrantLock<T> {
    /// Creates a new [`ReentrantLock`] in an unlocked state.
    pub fn new(value: T) -> Self {
        Self {
            owner: Mutex::new(Owner {
                thread: None,
                depth: 0,
            }),
            released: Condvar::new(),
            value: std::cell::UnsafeCell::new(value),
        }
    }

    /// Consumes this [`ReentrantLock`], returning the underlying data.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: ?Sized> ReentrantLock<T> {
    /// Acquires the lock, blocking until it is available or re-entering if this thread already
    /// holds it.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned by a prior panic while the lock was held.
    pub fn lock(&self) -> ReentrantGuard<'_, T> {
        let this_thread = thread::current().id();
        let mut owner = self.owner.lock().expect("program lock mutex poisoned");

        loop {
            match owner.thread {
                None => {
                    owner.thread = Some(this_thread);
                    owner.depth = 1;
                    break;
                }
                Some(thread) if thread == this_thread => {
                    owner.depth += 1;
                    break;
                }
                Some(_) => {
                    owner = self.released.wait(owner).expect("program lock mutex poisoned");
                }
            }
        }

        ReentrantGuard { lock: self }
    }

    /// Attempts to acquire the lock without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`ReentrantLockAcquisitionError`] if another thread currently holds the lock.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned by a prior panic while the lock was held.
    pub fn try_lock(&self) -> Result<ReentrantGuard<'_, T>, ReentrantLockAcquisitionError> {
        let this_thread = thread::current().id();
        let mut owner = self.owner.lock().expect("program lock mutex poisoned");

        match owner.thread {
            None => {
                owner.thread = Some(this_thread);
                owner.depth = 1;
                Ok(ReentrantGuard { lock: self })
            }
            Some(thread) if thread == this_thread => {
                owner.depth += 1;
                Ok(ReentrantGuard { lock: self })
            }
            Some(_) => Err(ReentrantLockAcquisitionError),
        }
    }

    /// Releases one level of re-entrancy, waking a waiting thread once the depth reaches zero.
    fn unlock(&self) {
        let mut owner = self.owner.lock().expect("program lock mutex poisoned");
        owner.depth -= 1;
        if owner.depth == 0 {
            owner.thread = None;
            self.released.notify_one();
        }
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// Since this call borrows the lock mutably, no actual locking needs to take place: the
    /// mutable borrow statically guarantees no guard exists.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

/// A RAII implementation of a scoped, possibly-reentrant acquisition of a [`ReentrantLock`].
///
/// The data protected by the lock can be accessed through this guard via its [`Deref`]
/// implementation, which hands out a shared `&T` only. There is deliberately no `DerefMut`:
/// because the lock is reentrant, a thread can hold two live guards at once (one nested inside a
/// call made through the other), and a `DerefMut` would let safe code derive two aliasing `&mut T`
/// from them, which is undefined behavior regardless of how carefully the call sites are written.
/// Callers that need to mutate `T` through the guard should wrap the mutable fields in `Cell` or
/// `RefCell`, the same way `std::sync::ReentrantLock` restricts itself to `&T`. Dropping the
/// outermost guard for a thread releases the lock for other threads to acquire.
#[must_use = "lock guard must be held to access protected data"]
pub struct ReentrantGuard<'a, T: ?Sized> {
    lock: &'a ReentrantLock<T>,
}

impl<T: ?Sized> Deref for ReentrantGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY:
        // The calling thread holds the lock (possibly reentrantly), so no other thread can be
        // concurrently mutating `value`. Only `&T` is ever handed out, so multiple live guards on
        // this thread (from reentrant acquisition) can never alias a `&mut T`.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T: ?Sized> Drop for ReentrantGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

/// Represents the failure to acquire a [`ReentrantLock`] via [`ReentrantLock::try_lock`].
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReentrantLockAcquisitionError;

impl fmt::Display for ReentrantLockAcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("try_lock failed because the program lock is held by another thread")
    }
}

impl error::Error for ReentrantLockAcquisitionError {}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn reenters_on_same_thread() {
        let lock = ReentrantLock::new(std::cell::Cell::new(0));
        let outer = lock.lock();
        let inner = lock.lock();
        inner.set(inner.get() + 1);
        drop(inner);
        assert_eq!(outer.get(), 1);
    }

    #[test]
    fn blocks_other_threads_until_released() {
        let lock = Arc::new(ReentrantLock::new(std::sync::atomic::AtomicI32::new(0)));
        let guard = lock.lock();

        let other = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            let guard = other.lock();
            guard.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        thread::sleep(std::time::Duration::from_millis(20));
        assert!(lock.try_lock().is_err());
        drop(guard);
        handle.join().unwrap();
        assert_eq!(lock.lock().load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
