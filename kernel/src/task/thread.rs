//! The thread record.

use alloc::boxed::Box;
use core::ptr::NonNull;

use bitflags::bitflags;

use crate::arch::{self, regs::RegisterBlock};

use super::stack::ThreadStack;
use super::{QueueId, ThreadId};

bitflags! {
    /// Lifecycle flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct ThreadFlags: u8 {
        /// Nobody will join it; freed as soon as it dies.
        const DETACHED = 1 << 0;
        /// Parked at the next scheduling point until resumed.
        const SUSPENDED = 1 << 1;
        /// Dead; the memory is reclaimed when the scheduler next sees it.
        const ZOMBIE = 1 << 2;
        /// Dead; kept until a join collects the result.
        const WAIT_FOR_JOIN = 1 << 3;
    }
}

/// Where a thread currently is. Every thread is in exactly one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Residence {
    Running,
    Ready,
    /// In the wait list of a synchronization object.
    Waiting(QueueId),
    /// Waiting for its sleep timer.
    Sleeping,
    /// Waiting for another thread to terminate.
    Joining,
    /// Suspended; on no list at all.
    Parked,
    /// Dead and off every list.
    Exited,
}

/// Public view of a thread's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    Ready,
    /// Blocked on a mutex, condition, mailbox or queue.
    Waiting,
    Sleeping,
    Joining,
    Suspended,
    Exited,
}

impl From<Residence> for ThreadState {
    fn from(residence: Residence) -> Self {
        match residence {
            Residence::Running => ThreadState::Running,
            Residence::Ready => ThreadState::Ready,
            Residence::Waiting(_) => ThreadState::Waiting,
            Residence::Sleeping => ThreadState::Sleeping,
            Residence::Joining => ThreadState::Joining,
            Residence::Parked => ThreadState::Suspended,
            Residence::Exited => ThreadState::Exited,
        }
    }
}

pub(crate) type Entry = Box<dyn FnOnce() -> i32 + Send>;

pub(crate) struct Thread {
    pub name: &'static str,
    pub priority: i8,
    pub flags: ThreadFlags,
    pub residence: Residence,
    pub stack: ThreadStack,
    /// Saved register frame while switched out.
    pub regs: NonNull<RegisterBlock>,
    /// Interrupt masking state at the time it was switched out.
    pub irq_depth: i32,
    pub irq_sr: u32,
    /// Thread blocked in `join` on this one.
    pub joiner: Option<ThreadId>,
    /// Exit code, valid once WAIT_FOR_JOIN is set.
    pub result: i32,
    /// Exit code delivered by the thread this one joined.
    pub joined: i32,
    pub entry: Option<Entry>,
    pub context: arch::Context,
}

// SAFETY: `regs` points into `stack`, which the record owns.
unsafe impl Send for Thread {}

impl Thread {
    pub fn new(
        name: &'static str,
        priority: i8,
        flags: ThreadFlags,
        stack: ThreadStack,
        entry: Option<Entry>,
        context: arch::Context,
    ) -> Self {
        let regs = stack.frame_slot();
        Self {
            name,
            priority,
            flags,
            residence: Residence::Ready,
            stack,
            regs,
            irq_depth: 0,
            irq_sr: 0,
            joiner: None,
            result: 0,
            joined: 0,
            entry,
            context,
        }
    }

    /// Killed, whether or not anyone collected it yet.
    pub fn is_dead(&self) -> bool {
        self.flags.intersects(ThreadFlags::ZOMBIE | ThreadFlags::WAIT_FOR_JOIN)
    }
}
