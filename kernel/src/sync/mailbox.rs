//! Mailboxes and events.
//!
//! A [`Mailbox`] is a bounded ring of messages with blocking send and
//! receive. An [`Event`] is a broadcast source: triggering it posts its
//! payload into every mailbox attached to it. The kernel keeps one event
//! per interrupt line (see [`crate::irq::event`]).

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::arch;
use crate::config::MAX_EVENT_MAILBOXES;
use crate::irq;
use crate::task::sched;

use super::{IrqSpinLock, WaitQueue};

struct Shared<T> {
    mails: IrqSpinLock<VecDeque<T>>,
    capacity: usize,
    /// Threads waiting for a mail.
    receivers: WaitQueue,
    /// Threads waiting for room.
    senders: WaitQueue,
    /// Events this mailbox is attached to.
    events: AtomicUsize,
}

impl<T> Shared<T> {
    /// Enqueue without blocking. On success, returns the priority of the
    /// receiver woken to take it, if any.
    fn push(&self, mail: T) -> Result<Option<i8>, T> {
        {
            let mut mails = self.mails.lock();
            if mails.len() == self.capacity {
                return Err(mail);
            }
            mails.push_back(mail);
        }
        Ok(self.receivers.wake_one())
    }

    fn pop(&self) -> Option<(T, Option<i8>)> {
        let mail = self.mails.lock().pop_front()?;
        Some((mail, self.senders.wake_one()))
    }
}

/// Bounded message queue between threads (and from interrupt handlers,
/// through [`Event::trigger_isr`]).
pub struct Mailbox<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Mailbox<T> {
    pub fn new(capacity: usize) -> Self {
        kassert!(capacity > 0, "mailbox capacity must be at least 1");
        Self {
            shared: Arc::new(Shared {
                mails: IrqSpinLock::new(VecDeque::with_capacity(capacity)),
                capacity,
                receivers: WaitQueue::new(),
                senders: WaitQueue::new(),
                events: AtomicUsize::new(0),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn len(&self) -> usize {
        self.shared.mails.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.shared.capacity
    }

    /// Post `mail` if there is room, handing it back otherwise. A receiver
    /// of equal or higher priority woken by it runs right away.
    pub fn try_send(&self, mail: T) -> Result<(), T> {
        let woken = {
            let _cs = irq::disabled();
            self.shared.push(mail)?
        };
        if let Some(priority) = woken {
            sched::preempt(priority, true);
        }
        Ok(())
    }

    /// Post `mail`, blocking while the mailbox is full.
    pub fn send(&self, mut mail: T) {
        let _cs = irq::disabled();
        loop {
            match self.try_send(mail) {
                Ok(()) => return,
                Err(back) => {
                    mail = back;
                    self.shared.senders.wait();
                }
            }
        }
    }

    /// Take the oldest mail, if any.
    pub fn try_recv(&self) -> Option<T> {
        let (mail, woken) = {
            let _cs = irq::disabled();
            self.shared.pop()?
        };
        if let Some(priority) = woken {
            sched::preempt(priority, true);
        }
        Some(mail)
    }

    /// Take the oldest mail, blocking while the mailbox is empty.
    pub fn recv(&self) -> T {
        let _cs = irq::disabled();
        loop {
            if let Some(mail) = self.try_recv() {
                return mail;
            }
            self.shared.receivers.wait();
        }
    }

    /// Have `event` deliver into this mailbox from now on.
    pub fn attach_event(&self, event: &Event<T>) {
        let mut targets = event.targets.lock();
        if targets.len() == MAX_EVENT_MAILBOXES {
            drop(targets);
            fatal!("Too many mailboxes attached to one event");
        }
        targets.push(self.shared.clone());
        self.shared.events.fetch_add(1, Ordering::Relaxed);
    }

    /// Undo one [`attach_event`](Self::attach_event). Returns false if the
    /// mailbox was not attached.
    pub fn detach_event(&self, event: &Event<T>) -> bool {
        let mut targets = event.targets.lock();
        let Some(pos) = targets.iter().position(|t| Arc::ptr_eq(t, &self.shared)) else {
            return false;
        };
        targets.remove(pos);
        self.shared.events.fetch_sub(1, Ordering::Relaxed);
        true
    }
}

impl<T> Drop for Mailbox<T> {
    fn drop(&mut self) {
        if arch::unwinding() {
            return;
        }
        let events = self.shared.events.load(Ordering::Relaxed);
        kassert!(
            events == 0,
            "mailbox dropped while still attached to {} events",
            events
        );
    }
}

impl<T> fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("len", &self.len())
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

/// A broadcast source that posts a copy of its payload into every attached
/// mailbox when triggered. Mailboxes that are full miss the occurrence.
pub struct Event<T> {
    payload: T,
    targets: IrqSpinLock<Vec<Arc<Shared<T>>>>,
}

impl<T: Clone> Event<T> {
    pub const fn new(payload: T) -> Self {
        Self {
            payload,
            targets: IrqSpinLock::new(Vec::new()),
        }
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Mailboxes currently attached.
    pub fn attached(&self) -> usize {
        self.targets.lock().len()
    }

    /// Post into every attached mailbox. Returns the highest priority among
    /// the receivers that were woken.
    fn deliver(&self) -> Option<i8> {
        let targets = self.targets.lock();
        let mut highest = None;
        for target in targets.iter() {
            if let Ok(woken) = target.push(self.payload.clone()) {
                highest = highest.max(woken);
            }
        }
        highest
    }

    /// Trigger from thread context: yield at once if a receiver of equal or
    /// higher priority was woken.
    pub fn trigger(&self) {
        let woken = {
            let _cs = irq::disabled();
            self.deliver()
        };
        if let Some(priority) = woken {
            sched::preempt(priority, true);
        }
    }

    /// Trigger from an interrupt handler: the switch, if any, happens when
    /// the interrupt returns.
    pub fn trigger_isr(&self) {
        if let Some(priority) = self.deliver() {
            super::defer_switch(priority);
        }
    }

    /// Block until the next time the event triggers.
    pub fn wait_event(&self) -> T {
        let mailbox = Mailbox::new(1);
        mailbox.attach_event(self);
        let payload = mailbox.recv();
        mailbox.detach_event(self);
        payload
    }

    /// Drop every attachment.
    pub fn detach_all(&self) {
        let mut targets = self.targets.lock();
        for target in targets.drain(..) {
            target.events.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("attached", &self.targets.lock().len())
            .finish()
    }
}

#[cfg(all(test, feature = "hosted"))]
mod tests {
    use super::*;
    use crate::arch::hosted::TestMachine;

    #[test]
    fn ring_is_fifo_and_bounded() {
        let _m = TestMachine::boot();
        let mbox = Mailbox::new(2);
        assert!(mbox.try_send(1).is_ok());
        assert!(mbox.try_send(2).is_ok());
        assert!(mbox.is_full());
        assert_eq!(mbox.try_send(3), Err(3));
        assert_eq!(mbox.try_recv(), Some(1));
        assert_eq!(mbox.try_recv(), Some(2));
        assert_eq!(mbox.try_recv(), None);
        assert!(mbox.is_empty());
    }

    #[test]
    fn event_fans_out_to_every_mailbox() {
        let _m = TestMachine::boot();
        let event = Event::new(7u8);
        let a = Mailbox::new(1);
        let b = Mailbox::new(4);
        a.attach_event(&event);
        b.attach_event(&event);
        event.trigger();
        event.trigger();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 2);
        assert!(a.detach_event(&event));
        assert!(!a.detach_event(&event));
        event.trigger();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 3);
        b.detach_event(&event);
        assert_eq!(event.attached(), 0);
    }

    #[test]
    #[should_panic(expected = "mailbox dropped while still attached to 1 events")]
    fn dropping_an_attached_mailbox_is_fatal() {
        let _m = TestMachine::boot();
        let event = Event::new(());
        let mbox = Mailbox::new(1);
        mbox.attach_event(&event);
        drop(mbox);
    }
}
