//! Condition variables.

use core::fmt;

use crate::arch;
use crate::irq;
use crate::task::sched;

use super::mutex::{MutexGuard, RawMutex};
use super::WaitQueue;

/// A list of threads waiting for something to change.
///
/// ```ignore
/// let mut ready = STATE.lock();
/// while !*ready {
///     COND.wait(&mut ready);
/// }
/// ```
pub struct Condvar {
    waiters: WaitQueue,
}

impl Condvar {
    pub const fn new() -> Self {
        Self {
            waiters: WaitQueue::new(),
        }
    }

    /// Release the guard's mutex, block until signalled, then lock it again.
    pub fn wait<T: ?Sized>(&self, guard: &mut MutexGuard<'_, T>) {
        self.wait_raw(Some(guard.raw()));
    }

    /// Like [`wait`](Self::wait), giving up after `ticks`. Returns false on
    /// timeout; the mutex is locked again either way.
    pub fn wait_timeout<T: ?Sized>(&self, guard: &mut MutexGuard<'_, T>, ticks: u64) -> bool {
        self.wait_raw_timeout(Some(guard.raw()), ticks)
    }

    /// Block until signalled. `mutex`, if any, must be locked exactly once
    /// by the caller; it is released while waiting.
    pub fn wait_raw(&self, mutex: Option<&RawMutex>) {
        let _cs = irq::disabled();
        if let Some(mutex) = mutex {
            mutex.release_for_wait("condvar wait()");
        }
        self.waiters.wait();
        if let Some(mutex) = mutex {
            mutex.lock();
        }
    }

    pub fn wait_raw_timeout(&self, mutex: Option<&RawMutex>, ticks: u64) -> bool {
        let _cs = irq::disabled();
        if let Some(mutex) = mutex {
            mutex.release_for_wait("condvar wait_timeout()");
        }
        let woken = self.waiters.wait_timeout(ticks);
        if let Some(mutex) = mutex {
            mutex.lock();
        }
        woken
    }

    /// Wake the highest-priority waiter. It runs right away if it outranks
    /// the caller.
    pub fn signal(&self) {
        let woken = {
            let _cs = irq::disabled();
            self.waiters.wake_one()
        };
        if let Some(priority) = woken {
            sched::preempt(priority, false);
        }
    }

    /// Wake every waiter. They run in priority order; the caller yields if
    /// any of them ranks at least as high.
    pub fn broadcast(&self) {
        let woken = {
            let _cs = irq::disabled();
            self.waiters.wake_all()
        };
        if let Some(priority) = woken {
            sched::preempt(priority, true);
        }
    }

    /// [`signal`](Self::signal) for interrupt handlers: never switches, only
    /// requests a switch for when the interrupt returns.
    pub fn signal_isr(&self) {
        if let Some(priority) = self.waiters.wake_one() {
            super::defer_switch(priority);
        }
    }

    /// [`broadcast`](Self::broadcast) for interrupt handlers.
    pub fn broadcast_isr(&self) {
        if let Some(priority) = self.waiters.wake_all() {
            super::defer_switch(priority);
        }
    }

    /// Threads currently waiting.
    pub fn waiters(&self) -> usize {
        self.waiters.len()
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Condvar {
    fn drop(&mut self) {
        if !arch::unwinding() {
            kassert!(
                self.waiters.is_empty(),
                "condition variable destroyed while threads are waiting"
            );
        }
    }
}

impl fmt::Debug for Condvar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condvar")
            .field("waiters", &self.waiters())
            .finish()
    }
}

#[cfg(all(test, feature = "hosted"))]
mod tests {
    use super::*;
    use crate::arch::hosted::TestMachine;
    use crate::sync::Mutex;

    #[test]
    fn timed_wait_without_signal_times_out() {
        let _m = TestMachine::boot();
        let state = Mutex::new(0u32);
        let cond = Condvar::new();
        let mut guard = state.lock();
        let before = crate::timer::ticks();
        assert!(!cond.wait_timeout(&mut guard, 1000));
        assert!(crate::timer::ticks() >= before + 1000);
        assert!(state.is_locked());
        assert_eq!(cond.waiters(), 0);
    }

    #[test]
    fn signal_without_waiters_is_a_no_op() {
        let _m = TestMachine::boot();
        let cond = Condvar::new();
        cond.signal();
        cond.broadcast();
        assert_eq!(cond.waiters(), 0);
    }

    #[test]
    #[should_panic(expected = "mutex is locked multiple times")]
    fn waiting_with_a_recursively_held_mutex_is_fatal() {
        let _m = TestMachine::boot();
        let mutex = RawMutex::new_recursive();
        mutex.lock();
        mutex.lock();
        Condvar::new().wait_raw(Some(&mutex));
    }
}
