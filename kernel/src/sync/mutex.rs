//! Blocking mutex.
//!
//! [`RawMutex`] is the bare lock: explicit `lock`/`unlock`, optionally
//! recursive, usable from C-style code paths and by [`Condvar`]. [`Mutex`]
//! wraps it around data and hands out RAII guards.
//!
//! [`Condvar`]: super::Condvar

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

use crate::arch;
use crate::irq;
use crate::task::{self, sched, ThreadId};
use crate::timer;

use super::{IrqSpinLock, WaitQueue};

struct Ownership {
    owner: Option<ThreadId>,
    /// Times the owner has locked it.
    count: u32,
}

/// A mutex without data.
pub struct RawMutex {
    state: IrqSpinLock<Ownership>,
    waiters: WaitQueue,
    recursive: bool,
}

impl RawMutex {
    /// A mutex that may be locked only once at a time.
    pub const fn new() -> Self {
        Self::with_recursion(false)
    }

    /// A mutex its owner may lock again; it is released by the matching
    /// number of unlocks.
    pub const fn new_recursive() -> Self {
        Self::with_recursion(true)
    }

    const fn with_recursion(recursive: bool) -> Self {
        Self {
            state: IrqSpinLock::new(Ownership {
                owner: None,
                count: 0,
            }),
            waiters: WaitQueue::new(),
            recursive,
        }
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// Current owner, if locked.
    pub fn owner(&self) -> Option<ThreadId> {
        self.state.lock().owner
    }

    pub fn is_locked(&self) -> bool {
        self.owner().is_some()
    }

    /// Take the lock for `me` if that is possible without blocking.
    fn try_acquire(&self, me: ThreadId) -> bool {
        let mut state = self.state.lock();
        match state.owner {
            None => {
                state.owner = Some(me);
                state.count = 1;
                true
            }
            Some(owner) if owner == me => {
                if !self.recursive {
                    drop(state);
                    fatal!("a non-recursive mutex cannot be locked twice");
                }
                state.count += 1;
                true
            }
            Some(_) => false,
        }
    }

    /// Lock, blocking until the mutex is free.
    pub fn lock(&self) {
        let _cs = irq::disabled();
        let me = task::current();
        while !self.try_acquire(me) {
            self.waiters.wait();
        }
    }

    /// Lock only if nobody holds it.
    pub fn try_lock(&self) -> bool {
        self.try_lock_for(0)
    }

    /// Lock, waiting at most `ticks`. Zero tries once and never blocks.
    pub fn try_lock_for(&self, ticks: u64) -> bool {
        let _cs = irq::disabled();
        let me = task::current();
        if self.try_acquire(me) {
            return true;
        }
        if ticks == 0 {
            return false;
        }
        let deadline = timer::ticks().saturating_add(ticks);
        loop {
            let remaining = deadline.saturating_sub(timer::ticks());
            if remaining == 0 || !self.waiters.wait_timeout(remaining) {
                klog::trace!("mutex: lock timeout for {}", me);
                return false;
            }
            if self.try_acquire(me) {
                return true;
            }
        }
    }

    /// Drop one level of ownership. The last one wakes the highest-priority
    /// waiter, which runs right away if it outranks the caller.
    pub fn unlock(&self) {
        let woken = {
            let _cs = irq::disabled();
            if !self.release() {
                return;
            }
            self.waiters.wake_one()
        };
        if let Some(priority) = woken {
            sched::preempt(priority, false);
        }
    }

    /// Returns true if the mutex is now free.
    fn release(&self) -> bool {
        let me = task::current();
        let mut state = self.state.lock();
        if state.owner != Some(me) || state.count == 0 {
            drop(state);
            fatal!(
                "mutex unlock() called, but mutex is not locked by {}[{}]",
                task::name(me),
                me
            );
        }
        state.count -= 1;
        if state.count > 0 {
            return false;
        }
        state.owner = None;
        true
    }

    /// Fully release a mutex locked exactly once, before blocking on a
    /// condition. The first waiter is made ready but the caller does not
    /// yield: it is about to switch away anyway.
    pub(crate) fn release_for_wait(&self, who: &str) {
        let me = task::current();
        {
            let state = self.state.lock();
            let (owner, count) = (state.owner, state.count);
            drop(state);
            kassert!(
                owner == Some(me),
                "{} called, but mutex is not locked by {}[{}]",
                who,
                task::name(me),
                me
            );
            kassert!(count == 1, "{} called, but mutex is locked multiple times", who);
        }
        if self.release() {
            self.waiters.wake_one();
        }
    }
}

impl Default for RawMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RawMutex {
    fn drop(&mut self) {
        if arch::unwinding() {
            return;
        }
        if let Some(owner) = self.state.get_mut().owner {
            fatal!("mutex destroyed while locked by {}", owner);
        }
        kassert!(
            self.waiters.is_empty(),
            "mutex destroyed while threads are waiting"
        );
    }
}

impl fmt::Debug for RawMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawMutex")
            .field("owner", &self.owner())
            .field("recursive", &self.recursive)
            .finish()
    }
}

/// A non-recursive mutex protecting a `T`.
///
/// ```ignore
/// static FRAMES: Mutex<u32> = Mutex::new(0);
///
/// *FRAMES.lock() += 1;
/// ```
pub struct Mutex<T: ?Sized> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

// SAFETY: the data is only reachable through a guard, and at most one guard
// exists at a time.
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawMutex::new(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        let Mutex { raw, data } = self;
        drop(raw);
        data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.raw.lock();
        MutexGuard::new(self)
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.try_lock_for(0)
    }

    /// Lock, waiting at most `ticks`.
    pub fn try_lock_for(&self, ticks: u64) -> Option<MutexGuard<'_, T>> {
        self.raw.try_lock_for(ticks).then(|| MutexGuard::new(self))
    }

    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// RAII guard for a locked [`Mutex`]. Bound to the thread that locked it.
#[must_use = "the mutex is unlocked as soon as the guard is dropped"]
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T: ?Sized> MutexGuard<'a, T> {
    fn new(mutex: &'a Mutex<T>) -> Self {
        Self {
            mutex,
            _not_send: PhantomData,
        }
    }

    pub(crate) fn raw(&self) -> &'a RawMutex {
        &self.mutex.raw
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves we own the lock.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves we own the lock.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        if !arch::unwinding() {
            self.mutex.raw.unlock();
        }
    }
}

#[cfg(all(test, feature = "hosted"))]
mod tests {
    use super::*;
    use crate::arch::hosted::TestMachine;

    #[test]
    fn recursive_mutex_counts_levels() {
        let _m = TestMachine::boot();
        let m = RawMutex::new_recursive();
        m.lock();
        m.lock();
        assert!(m.try_lock());
        m.unlock();
        m.unlock();
        assert_eq!(m.owner(), Some(task::current()));
        m.unlock();
        assert!(!m.is_locked());
    }

    #[test]
    #[should_panic(expected = "a non-recursive mutex cannot be locked twice")]
    fn relocking_a_plain_mutex_is_fatal() {
        let _m = TestMachine::boot();
        let m = RawMutex::new();
        m.lock();
        m.lock();
    }

    #[test]
    #[should_panic(expected = "mutex unlock() called, but mutex is not locked by")]
    fn unlocking_a_free_mutex_is_fatal() {
        let _m = TestMachine::boot();
        RawMutex::new().unlock();
    }

    #[test]
    fn guard_releases_on_drop() {
        let _m = TestMachine::boot();
        let m = Mutex::new(5);
        {
            let mut guard = m.lock();
            *guard += 1;
            assert!(m.is_locked());
        }
        assert!(!m.is_locked());
        assert_eq!(m.into_inner(), 6);
    }
}
