//! Threads and the scheduler.
//!
//! Scheduling is strictly priority based and cooperative between equal
//! priorities: a thread runs until it blocks, yields, or a thread of equal
//! or higher priority becomes ready. The idle thread (priority
//! [`PRIORITY_IDLE`]) runs when nothing else can.
//!
//! ```ignore
//! let worker = task::create("worker", 8192, 1, || {
//!     task::sleep(timer::ticks_from_ms(10));
//!     42
//! });
//! assert_eq!(task::join(worker), 42);
//! ```

mod arena;
mod list;
pub(crate) mod sched;
mod stack;
mod thread;

use alloc::vec::Vec;
use core::fmt;

use crate::arch;
use crate::config::PRIORITY_IDLE;
use crate::irq;
use crate::timer::{self, TimerMode};

pub use stack::MIN_STACK_SIZE;
pub use thread::ThreadState;

use arena::Key;
use thread::ThreadFlags;

/// Handle to a kernel thread. Stays valid until the thread is freed; after
/// that every use is a fatal error rather than undefined behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(Key);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0.index())
    }
}

/// Handle to a kernel wait list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct QueueId(Key);

impl QueueId {
    pub fn to_bits(self) -> u64 {
        self.0.to_bits()
    }

    pub fn from_bits(bits: u64) -> Self {
        QueueId(Key::from_bits(bits))
    }
}

/// Snapshot of one thread, see [`threads`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: &'static str,
    pub priority: i8,
    pub state: ThreadState,
    pub stack_size: usize,
    pub detached: bool,
}

pub fn is_running() -> bool {
    sched::is_running()
}

fn check_priority(priority: i8) {
    kassert!(
        priority > PRIORITY_IDLE,
        "thread priority {} is reserved for the idle thread",
        priority
    );
}

/// Create a thread and make it ready.
///
/// The new thread preempts the caller immediately if its priority is equal
/// or higher. `stack_size` must be a multiple of 8.
pub fn create<F>(name: &'static str, stack_size: usize, priority: i8, entry: F) -> ThreadId
where
    F: FnOnce() -> i32 + Send + 'static,
{
    kassert!(
        stack_size % 8 == 0,
        "stack size must be a multiple of 8 (got {})",
        stack_size
    );
    kassert!(
        stack_size >= MIN_STACK_SIZE,
        "stack size {} is too small (minimum {})",
        stack_size,
        MIN_STACK_SIZE
    );
    check_priority(priority);

    let (id, preempt) = {
        let _cs = irq::disabled();
        sched::with(|k| {
            let id = k.spawn(
                name,
                stack_size,
                priority,
                ThreadFlags::empty(),
                alloc::boxed::Box::new(entry),
            );
            (id, priority >= k.current_priority())
        })
    };
    if preempt {
        yield_now();
    }
    id
}

/// Handle of the running thread.
pub fn current() -> ThreadId {
    sched::with(|k| k.current())
}

/// Give the CPU to the next ready thread of equal or higher priority, if
/// there is one.
pub fn yield_now() {
    let _cs = irq::disabled();
    let switch = sched::with(|k| {
        let head = k.ready_head_priority();
        if head.is_some_and(|pri| pri >= k.current_priority()) {
            k.requeue_current();
            true
        } else {
            false
        }
    });
    if switch {
        arch::switch_thread();
    }
}

/// Block the calling thread for at least `ticks` COUNT ticks. Zero just
/// yields.
pub fn sleep(ticks: u64) {
    if ticks == 0 {
        yield_now();
        return;
    }
    let _cs = irq::disabled();
    let me = sched::with(|k| k.sleep_current());
    timer::start(ticks, TimerMode::OneShot, move || {
        if let Some(priority) = sched::try_with(|k| k.wake_sleeper(me)).flatten() {
            sched::preempt(priority, true);
        }
    });
    arch::switch_thread();
}

/// Kill a thread.
///
/// Killing the running thread does not return. Any other thread is flagged
/// and retired the next time the scheduler reaches it; if it is blocked it
/// is woken for that purpose.
pub fn kill(id: ThreadId, result: i32) {
    if sched::current() == Some(id) {
        exit(result);
    }
    let _cs = irq::disabled();
    sched::with(|k| k.kill(id, result));
    yield_now();
}

/// Terminate the calling thread with `result`.
pub fn exit(result: i32) -> ! {
    sched::terminate(result);
    arch::abandon()
}

/// Mark a thread as never going to be joined. Its memory is reclaimed as
/// soon as it dies.
pub fn detach(id: ThreadId) {
    let _cs = irq::disabled();
    sched::with(|k| k.detach(id));
}

/// Wait for a thread to terminate and return its exit code. The handle is
/// invalid afterwards.
pub fn join(id: ThreadId) -> i32 {
    let _cs = irq::disabled();
    if let Some(result) = sched::with(|k| k.join(id)) {
        return result;
    }
    arch::switch_thread();
    sched::with(|k| {
        let me = k.current();
        k.thread(me).joined
    })
}

/// Like [`join`], but returns `None` instead of blocking if the thread is
/// still alive.
pub fn try_join(id: ThreadId) -> Option<i32> {
    let _cs = irq::disabled();
    sched::with(|k| k.try_join(id))
}

/// Change a thread's priority and reschedule.
pub fn set_priority(id: ThreadId, priority: i8) {
    check_priority(priority);
    {
        let _cs = irq::disabled();
        sched::with(|k| k.set_priority(id, priority));
    }
    yield_now();
}

pub fn priority(id: ThreadId) -> i8 {
    sched::with(|k| k.thread(id).priority)
}

pub fn name(id: ThreadId) -> &'static str {
    sched::with(|k| k.thread(id).name)
}

pub fn state(id: ThreadId) -> ThreadState {
    sched::with(|k| k.thread(id).residence.into())
}

/// Stop scheduling a thread until [`resume`] is called. Suspending the
/// running thread switches away immediately.
pub fn suspend(id: ThreadId) {
    let _cs = irq::disabled();
    if sched::with(|k| k.suspend(id)) {
        arch::switch_thread();
    }
}

/// Undo [`suspend`]. The thread preempts the caller if it outranks it.
pub fn resume(id: ThreadId) {
    let woken = {
        let _cs = irq::disabled();
        sched::with(|k| k.resume(id))
    };
    if let Some(priority) = woken {
        sched::preempt(priority, false);
    }
}

/// Threads created and not yet killed, main and idle included.
pub fn thread_count() -> usize {
    sched::with(|k| k.live())
}

/// Every thread known to the kernel, including exited ones still waiting
/// to be joined.
pub fn threads() -> Vec<ThreadInfo> {
    sched::with(|k| k.info())
}

/// Handle of the main thread.
pub fn main_thread() -> ThreadId {
    sched::with(|k| k.main())
}

/// Scramble the overflow guard of a thread's stack. Test hook.
#[cfg(feature = "hosted")]
pub fn corrupt_stack_guard(id: ThreadId) {
    sched::with(|k| k.thread(id).stack.clobber_guard());
}
