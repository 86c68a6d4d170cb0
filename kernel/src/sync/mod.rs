// =============================================================================
// n64-kernel — Synchronization Primitives
// =============================================================================
//
// Everything here is layered on two things only: "interrupts are disabled"
// and the scheduler's wait lists.
//
//   IrqSpinLock  — short critical sections over plain data (no blocking)
//   Mutex        — blocking, optionally recursive, priority-ordered waiters
//   Condvar      — wait/signal/broadcast, optionally paired with a mutex
//   Semaphore    — counter on top of Mutex + Condvar
//   Mailbox      — bounded ring of messages; Event fans out into mailboxes
//   KQueue       — bounded FIFO on top of Mutex + two Condvars
//   irqwait      — one Condvar per RCP line plus an occurrence counter
//
// WAIT LISTS:
//   A blocking object owns a `WaitQueue`: a lazily allocated handle to a
//   scheduler wait list. The handle stays valid for one kernel session;
//   after close()/init() it is silently reallocated.
//
// TIMEOUTS:
//   A timed wait arms a one-shot timer whose callback takes the thread off
//   the wait list only if it is still on it. Whichever of the timer and
//   the normal wakeup gets there first wins; the other does nothing.
//
// =============================================================================

mod condvar;
mod mailbox;
mod mutex;
mod queue;
mod semaphore;
pub(crate) mod spinlock;

pub mod irqwait;

pub use condvar::Condvar;
pub use mailbox::{Event, Mailbox};
pub use mutex::{Mutex, MutexGuard, RawMutex};
pub use queue::KQueue;
pub use semaphore::Semaphore;
pub use spinlock::{IrqSpinLock, IrqSpinLockGuard};

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::arch;
use crate::irq;
use crate::task::sched::{self, Kernel};
use crate::task::QueueId;
use crate::timer::{self, TimerMode};

/// Scheduler wait list owned by a synchronization object.
pub(crate) struct WaitQueue {
    /// `QueueId` bits; 0 until first used.
    id: AtomicU64,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self { id: AtomicU64::new(0) }
    }

    fn existing(&self, k: &Kernel) -> Option<QueueId> {
        match self.id.load(Ordering::Relaxed) {
            0 => None,
            bits => Some(QueueId::from_bits(bits)).filter(|&q| k.queue_valid(q)),
        }
    }

    fn resolve(&self, k: &mut Kernel) -> QueueId {
        if let Some(queue) = self.existing(k) {
            return queue;
        }
        let queue = k.queue_alloc();
        self.id.store(queue.to_bits(), Ordering::Relaxed);
        queue
    }

    /// Block the running thread until woken. Interrupts must be disabled by
    /// the caller, which re-checks its condition afterwards.
    pub fn wait(&self) {
        kassert!(!irq::in_interrupt(), "cannot block inside an interrupt handler");
        sched::with(|k| {
            let queue = self.resolve(k);
            k.enqueue_current(queue);
        });
        arch::switch_thread();
    }

    /// Like [`wait`](Self::wait), giving up after `ticks`. Returns false if
    /// the timeout took the thread off the list.
    pub fn wait_timeout(&self, ticks: u64) -> bool {
        kassert!(!irq::in_interrupt(), "cannot block inside an interrupt handler");
        let (queue, me) = sched::with(|k| {
            let queue = self.resolve(k);
            (queue, k.enqueue_current(queue))
        });

        let expired = Arc::new(AtomicBool::new(false));
        let flag = expired.clone();
        let timer = timer::start(ticks, TimerMode::OneShot, move || {
            if let Some(priority) = sched::try_with(|k| k.remove_waiter(queue, me)).flatten() {
                klog::trace!("sync: wait timeout for {}", me);
                flag.store(true, Ordering::Relaxed);
                sched::preempt(priority, true);
            }
        });

        arch::switch_thread();
        timer::stop(timer);
        !expired.load(Ordering::Relaxed)
    }

    /// Make the highest-priority waiter ready. Returns its priority.
    pub fn wake_one(&self) -> Option<i8> {
        sched::try_with(|k| {
            let queue = self.existing(k)?;
            k.wake_one(queue)
        })
        .flatten()
    }

    /// Make every waiter ready. Returns the highest priority woken.
    pub fn wake_all(&self) -> Option<i8> {
        sched::try_with(|k| {
            let queue = self.existing(k)?;
            k.wake_all(queue)
        })
        .flatten()
    }

    pub fn len(&self) -> usize {
        sched::try_with(|k| self.existing(k).map_or(0, |q| k.queue_len(q))).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for WaitQueue {
    fn drop(&mut self) {
        if arch::unwinding() {
            return;
        }
        let bits = *self.id.get_mut();
        if bits != 0 {
            sched::try_with(|k| k.queue_free(QueueId::from_bits(bits)));
        }
    }
}

/// From interrupt context: ask for a switch on the way out if a thread of
/// priority `woken` should preempt the interrupted one.
pub(crate) fn defer_switch(woken: i8) {
    let outranks = sched::try_with(|k| woken >= k.current_priority()).unwrap_or(false);
    if outranks {
        sched::request_switch();
    }
}
