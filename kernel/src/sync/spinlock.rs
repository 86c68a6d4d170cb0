// =============================================================================
// n64-kernel — IRQ-safe Ticket Spinlock
// =============================================================================
//
// On a single core a spinlock never actually spins against another CPU;
// what protects kernel state is that interrupts are masked while the lock
// is held. The ticket pair is kept anyway so that a re-entrant acquisition
// (an interrupt handler reaching for a lock the interrupted code holds) is
// caught as a hang in the spin loop rather than as silent corruption.
//
// HOW IT WORKS:
//   - lock():   irq::disable() (nestable), take a ticket, wait for it
//   - unlock(): serve the next ticket, then irq::enable()
//
//   The order on unlock matters: the lock is released before interrupts
//   come back, so a pending interrupt delivered by enable() finds the
//   lock free.
//
// CONTEXT SWITCHES:
//   A thread must never be switched out while holding one of these locks.
//   HELD counts live guards; the trap boundary asserts it is zero before
//   every voluntary switch.
//
// =============================================================================

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::irq;

/// Guards currently alive across all IrqSpinLocks.
static HELD: AtomicUsize = AtomicUsize::new(0);

/// Number of IrqSpinLock guards currently held.
pub(crate) fn held() -> usize {
    HELD.load(Ordering::Relaxed)
}

#[cfg(feature = "hosted")]
pub(crate) fn reset_held() {
    HELD.store(0, Ordering::Relaxed);
}

/// A ticket spinlock that masks interrupts while held.
///
/// ```ignore
/// static COUNTER: IrqSpinLock<u64> = IrqSpinLock::new(0);
///
/// *COUNTER.lock() += 1;
/// ```
pub struct IrqSpinLock<T> {
    next_ticket: AtomicU32,
    now_serving: AtomicU32,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by the ticket pair with interrupts
// masked, so the value is only ever touched by one context at a time.
unsafe impl<T: Send> Send for IrqSpinLock<T> {}
unsafe impl<T: Send> Sync for IrqSpinLock<T> {}

impl<T> IrqSpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            next_ticket: AtomicU32::new(0),
            now_serving: AtomicU32::new(0),
            data: UnsafeCell::new(value),
        }
    }

    /// Mask interrupts and acquire the lock.
    pub fn lock(&self) -> IrqSpinLockGuard<'_, T> {
        irq::disable();

        let my_ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        while self.now_serving.load(Ordering::Acquire) != my_ticket {
            core::hint::spin_loop();
        }

        HELD.fetch_add(1, Ordering::Relaxed);
        IrqSpinLockGuard { lock: self }
    }

    /// Acquire the lock only if nobody holds it.
    pub fn try_lock(&self) -> Option<IrqSpinLockGuard<'_, T>> {
        irq::disable();

        let current = self.now_serving.load(Ordering::Relaxed);
        let result = self.next_ticket.compare_exchange(
            current,
            current.wrapping_add(1),
            Ordering::Acquire,
            Ordering::Relaxed,
        );

        match result {
            Ok(_) => {
                HELD.fetch_add(1, Ordering::Relaxed);
                Some(IrqSpinLockGuard { lock: self })
            }
            Err(_) => {
                irq::enable();
                None
            }
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

/// RAII guard for a held [`IrqSpinLock`].
pub struct IrqSpinLockGuard<'a, T> {
    lock: &'a IrqSpinLock<T>,
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves we hold the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves we hold the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for IrqSpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.now_serving.fetch_add(1, Ordering::Release);
        HELD.fetch_sub(1, Ordering::Relaxed);
        if !crate::arch::unwinding() {
            irq::enable();
        }
    }
}

#[cfg(all(test, feature = "hosted"))]
mod tests {
    use super::*;
    use crate::arch::hosted::TestMachine;
    use crate::irq::InterruptState;

    #[test]
    fn guard_masks_interrupts_until_dropped() {
        let _m = TestMachine::new();
        crate::irq::init();
        static VALUE: IrqSpinLock<u32> = IrqSpinLock::new(0);
        {
            let mut guard = VALUE.lock();
            *guard += 1;
            assert_eq!(crate::irq::state(), InterruptState::Disabled);
            assert_eq!(held(), 1);
        }
        assert_eq!(crate::irq::state(), InterruptState::Enabled);
        assert_eq!(held(), 0);
        assert_eq!(*VALUE.lock(), 1);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let _m = TestMachine::new();
        let lock = IrqSpinLock::new(());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }
}
