// =============================================================================
// n64-kernel — Scheduler Core
// =============================================================================
//
// STATE:
//   One `Kernel` value behind an IrqSpinLock. It owns every thread record
//   (in a generational arena, so handles never dangle), every wait list,
//   and the ready list. Nothing outside this file touches it directly;
//   the rest of the crate goes through `with()`.
//
// SWITCHING:
//   All switches happen in `schedule()`, called by the trap dispatcher in
//   two cases:
//     - SYSCALL 0: the running thread asked for it after putting itself
//       somewhere (ready list, a wait list, sleeping, joining, parked).
//     - an interrupt whose handlers woke a thread that outranks (or ties)
//       the running one. The interrupted thread goes back on the ready list.
//
//   The outgoing thread's interrupt masking depth travels with it: each
//   thread resumes with exactly the disable() nesting it had when it left.
//
// DEATH:
//   A killed thread stays in the tables until the scheduler next touches
//   it. Detached threads become zombies and are freed then. Joinable ones
//   become WAIT_FOR_JOIN and are freed by whoever joins them.
//
// =============================================================================

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use khal::{Cause, ExcCode};

use crate::arch::{self, regs::RegisterBlock};
use crate::config::{KernelConfig, PRIORITY_IDLE};
use crate::irq;
use crate::sync::IrqSpinLock;

use super::arena::Arena;
use super::list::ThreadList;
use super::stack::ThreadStack;
use super::thread::{Entry, Residence, Thread, ThreadFlags};
use super::{QueueId, ThreadId, ThreadInfo};

/// The only instruction the scheduler accepts at a switch point.
pub(crate) const SWITCH_OPCODE: u32 = 0x0000_000C;

static KERNEL: IrqSpinLock<Option<Kernel>> = IrqSpinLock::new(None);

static RUNNING: AtomicBool = AtomicBool::new(false);

/// An interrupt handler woke a thread that should preempt the interrupted
/// one; switch on the way out of the interrupt.
static DEFERRED_SWITCH: AtomicBool = AtomicBool::new(false);

static SESSION: AtomicU16 = AtomicU16::new(0);

pub(crate) struct Kernel {
    threads: Arena<Thread>,
    queues: Arena<ThreadList>,
    ready: ThreadList,
    current: ThreadId,
    main: ThreadId,
    idle: ThreadId,
    /// Threads created and not yet killed, main and idle included.
    live: usize,
    config: KernelConfig,
}

// ── Access ──────────────────────────────────────────────────────

pub(crate) fn is_running() -> bool {
    RUNNING.load(Ordering::Acquire)
}

/// Run `f` on the kernel state. Fatal if the kernel is not running.
pub(crate) fn with<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    let mut guard = KERNEL.lock();
    match guard.as_mut() {
        Some(kernel) => f(kernel),
        None => {
            drop(guard);
            fatal!("kernel not initialized: call init() first")
        }
    }
}

/// Like [`with`], but `None` when the kernel is not running.
pub(crate) fn try_with<R>(f: impl FnOnce(&mut Kernel) -> R) -> Option<R> {
    if !is_running() {
        return None;
    }
    KERNEL.lock().as_mut().map(f)
}

/// Handle of the running thread, if the kernel is up.
pub(crate) fn current() -> Option<ThreadId> {
    try_with(|k| k.current)
}

pub(crate) fn config() -> Option<KernelConfig> {
    try_with(|k| k.config)
}

/// Ask for a switch when the current interrupt returns.
pub(crate) fn request_switch() {
    DEFERRED_SWITCH.store(true, Ordering::Relaxed);
}

pub(crate) fn take_deferred_switch() -> bool {
    DEFERRED_SWITCH.swap(false, Ordering::Relaxed)
}

/// A thread of priority `woken` has just been made ready. Let it run now if
/// it should preempt the caller: immediately from thread context, on the way
/// out from interrupt context. With `ties`, an equal priority preempts too.
pub(crate) fn preempt(woken: i8, ties: bool) {
    let Some(current) = try_with(|k| k.thread(k.current).priority) else {
        return;
    };
    if woken > current || (ties && woken == current) {
        if irq::in_interrupt() {
            request_switch();
        } else {
            super::yield_now();
        }
    }
}

// ── Lifecycle ───────────────────────────────────────────────────

pub(crate) fn start(config: KernelConfig) -> ThreadId {
    if let Some(current) = current() {
        return current;
    }

    let session = SESSION.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
    let main_stack = match arch::boot_stack(config.main_stack_size) {
        // SAFETY: the boot code guarantees the region stays reserved.
        Some((base, size)) => unsafe { ThreadStack::borrowed(base, size) },
        None => ThreadStack::new(config.main_stack_size),
    };
    let mut threads = Arena::new(session);
    let mut main = Thread::new(
        "main",
        0,
        ThreadFlags::DETACHED,
        main_stack,
        None,
        arch::adopt_main(),
    );
    main.residence = Residence::Running;
    let main = ThreadId(threads.insert(main));

    let mut kernel = Kernel {
        threads,
        queues: Arena::new(session),
        ready: ThreadList::new(),
        current: main,
        main,
        idle: main,
        live: 1,
        config,
    };
    kernel.idle = kernel.spawn(
        "idle",
        config.idle_stack_size,
        PRIORITY_IDLE,
        ThreadFlags::DETACHED,
        Box::new(idle_main),
    );

    let idle = kernel.idle;
    *KERNEL.lock() = Some(kernel);
    DEFERRED_SWITCH.store(false, Ordering::Relaxed);
    RUNNING.store(true, Ordering::Release);
    klog::info!("kernel: started (main={}, idle={})", main, idle);
    main
}

pub(crate) fn stop() {
    let mut guard = KERNEL.lock();
    let Some(kernel) = guard.as_mut() else {
        drop(guard);
        fatal!("kernel not initialized: call init() first");
    };
    kassert!(
        kernel.current == kernel.main,
        "kernel close can only be called from main thread"
    );
    let idle = kernel.idle;
    kernel.kill(idle, 0);
    kassert!(
        kernel.live == 1,
        "not all threads were killed ({} still alive)",
        kernel.live - 1
    );

    RUNNING.store(false, Ordering::Release);
    DEFERRED_SWITCH.store(false, Ordering::Relaxed);
    let kernel = guard.take();
    drop(guard);
    if let Some(mut kernel) = kernel {
        kernel.retire_all();
    }
    klog::info!("kernel: closed");
}

/// Drop the kernel state without any checks.
#[cfg(feature = "hosted")]
pub(crate) fn force_reset() {
    RUNNING.store(false, Ordering::Release);
    DEFERRED_SWITCH.store(false, Ordering::Relaxed);
    let kernel = KERNEL.lock().take();
    drop(kernel);
}

fn idle_main() -> i32 {
    loop {
        arch::idle_wait();
    }
}

/// Body of every created thread. Runs on the thread's own stack the first
/// time it is switched in.
pub(crate) fn thread_main() {
    let (id, name, entry) = with(|k| {
        let id = k.current;
        let thread = k.thread_mut(id);
        (id, thread.name, thread.entry.take())
    });
    let Some(entry) = entry else {
        fatal!("thread {}[{}] has no entry point", name, id)
    };
    let result = entry();
    klog::debug!("thread end: {}[{}] res={}", name, id, result);
    terminate(result);
}

/// Kill the calling thread and switch away for good.
///
/// Only returns on hosted builds, once the context has been retired. The
/// interrupt mask taken here is never released: it belongs to a dead
/// thread and the scheduler installs the next thread's own state.
pub(crate) fn terminate(result: i32) {
    irq::disable();
    with(|k| {
        let me = k.current;
        k.kill(me, result);
    });
    arch::switch_thread();
}

// ── Trap entry points ───────────────────────────────────────────

/// Switch away from the thread whose registers are in `regs`; returns the
/// frame to resume.
pub(crate) fn schedule(regs: NonNull<RegisterBlock>) -> NonNull<RegisterBlock> {
    let depth = irq::depth();
    let sr = irq::saved_sr();
    let (next, next_depth, next_sr) = with(|k| k.schedule(regs, depth, sr));
    irq::restore(next_depth, next_sr);
    next
}

/// Where the trap boundary saves the running thread's registers.
#[cfg(feature = "hosted")]
pub(crate) fn trap_frame() -> Option<NonNull<RegisterBlock>> {
    try_with(|k| k.thread(k.current).stack.frame_slot())
}

/// The running thread's execution context.
#[cfg(feature = "hosted")]
pub(crate) fn current_context() -> Option<arch::Context> {
    try_with(|k| k.thread(k.current).context)
}

/// The thread is still alive and may be switched back in later.
#[cfg(feature = "hosted")]
pub(crate) fn may_resume(id: ThreadId) -> bool {
    try_with(|k| k.threads.get(id.0).is_some_and(|t| !t.is_dead())).unwrap_or(false)
}

// ── Kernel state ────────────────────────────────────────────────

impl Kernel {
    pub fn current(&self) -> ThreadId {
        self.current
    }

    pub fn main(&self) -> ThreadId {
        self.main
    }

    pub fn live(&self) -> usize {
        self.live
    }

    pub fn thread(&self, id: ThreadId) -> &Thread {
        match self.threads.get(id.0) {
            Some(thread) => thread,
            None => fatal!("invalid thread handle: {}", id),
        }
    }

    pub fn thread_mut(&mut self, id: ThreadId) -> &mut Thread {
        match self.threads.get_mut(id.0) {
            Some(thread) => thread,
            None => fatal!("invalid thread handle: {}", id),
        }
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.threads.contains(id.0)
    }

    pub fn current_priority(&self) -> i8 {
        self.thread(self.current).priority
    }

    pub fn info(&self) -> Vec<ThreadInfo> {
        self.threads
            .iter()
            .map(|(key, t)| ThreadInfo {
                id: ThreadId(key),
                name: t.name,
                priority: t.priority,
                state: t.residence.into(),
                stack_size: t.stack.size(),
                detached: t.flags.contains(ThreadFlags::DETACHED),
            })
            .collect()
    }

    /// Allocate a thread and put it on the ready list.
    pub fn spawn(
        &mut self,
        name: &'static str,
        stack_size: usize,
        priority: i8,
        flags: ThreadFlags,
        entry: Entry,
    ) -> ThreadId {
        let stack = ThreadStack::new(stack_size);
        let frame = stack.frame_slot();
        // SAFETY: the frame slot lies inside the fresh stack.
        unsafe { frame.as_ptr().write(arch::initial_frame(stack.top())) };

        let thread = Thread::new(name, priority, flags, stack, Some(entry), arch::spawn_context(name));
        let id = ThreadId(self.threads.insert(thread));
        self.ready.push(id, priority);
        self.live += 1;
        klog::debug!("thread create: {}[{}] pri={}", name, id, priority);
        id
    }

    /// Put `id` on the ready list. It must not be on any other list.
    pub fn make_ready(&mut self, id: ThreadId) {
        let thread = self.thread_mut(id);
        kassert!(
            !matches!(thread.residence, Residence::Ready | Residence::Waiting(_)),
            "thread {}[{}] is already in a list",
            thread.name,
            id
        );
        self.push_ready(id);
    }

    fn push_ready(&mut self, id: ThreadId) {
        let thread = self.thread_mut(id);
        thread.residence = Residence::Ready;
        let priority = thread.priority;
        self.ready.push(id, priority);
    }

    /// Priority of the ready head, if any.
    pub fn ready_head_priority(&self) -> Option<i8> {
        self.ready.peek().map(|(_, pri)| pri)
    }

    /// Move the current thread to the back of its priority on the ready list.
    pub fn requeue_current(&mut self) {
        let me = self.current;
        self.make_ready(me);
    }

    /// Mark the current thread as sleeping. Returns its handle.
    pub fn sleep_current(&mut self) -> ThreadId {
        let me = self.current;
        self.thread_mut(me).residence = Residence::Sleeping;
        me
    }

    /// Wake `id` if it is still sleeping. Returns its priority if it was.
    pub fn wake_sleeper(&mut self, id: ThreadId) -> Option<i8> {
        let thread = self.threads.get(id.0)?;
        if thread.residence != Residence::Sleeping {
            return None;
        }
        let priority = thread.priority;
        self.make_ready(id);
        Some(priority)
    }

    /// Unlink `id` from whatever list it is on.
    fn unlink(&mut self, id: ThreadId) {
        let Some(thread) = self.threads.get(id.0) else {
            return;
        };
        match thread.residence {
            Residence::Ready => {
                self.ready.remove(id);
            }
            Residence::Waiting(queue) => {
                if let Some(list) = self.queues.get_mut(queue.0) {
                    list.remove(id);
                }
            }
            _ => {}
        }
    }

    fn free(&mut self, id: ThreadId) {
        self.unlink(id);
        if let Some(thread) = self.threads.remove(id.0) {
            klog::debug!("thread free: {}[{}]", thread.name, id);
            arch::retire(&thread.context);
        }
    }

    fn retire_all(&mut self) {
        for thread in self.threads.drain() {
            arch::retire(&thread.context);
        }
    }

    /// Release a dead, joinable thread and hand back its exit code.
    pub fn reap(&mut self, id: ThreadId) -> i32 {
        let result = self.thread(id).result;
        self.free(id);
        result
    }

    /// Mark `id` as dead. Returns true if it is the running thread, which
    /// must then switch away.
    ///
    /// Another thread is only flagged; if it is blocked it is pulled back to
    /// the ready list so that the scheduler gets to retire it.
    pub fn kill(&mut self, id: ThreadId, result: i32) -> bool {
        let thread = self.thread(id);
        kassert!(
            !thread.is_dead(),
            "cannot kill thread {}[{}] which is already exited",
            thread.name,
            id
        );
        let joiner = thread
            .joiner
            .filter(|j| self.threads.get(j.0).is_some_and(|t| t.residence == Residence::Joining));
        self.live -= 1;

        let thread = self.thread_mut(id);
        if thread.flags.contains(ThreadFlags::DETACHED) {
            thread.flags |= ThreadFlags::ZOMBIE;
        } else if let Some(joiner) = joiner {
            thread.flags |= ThreadFlags::ZOMBIE | ThreadFlags::DETACHED;
            self.thread_mut(joiner).joined = result;
            self.make_ready(joiner);
        } else {
            thread.flags |= ThreadFlags::WAIT_FOR_JOIN;
            thread.result = result;
        }

        if id == self.current {
            return true;
        }
        match self.thread(id).residence {
            Residence::Waiting(_) | Residence::Sleeping | Residence::Joining | Residence::Parked => {
                self.unlink(id);
                self.push_ready(id);
            }
            _ => {}
        }
        false
    }

    // ── Wait lists ──────────────────────────────────────────────

    pub fn queue_alloc(&mut self) -> QueueId {
        QueueId(self.queues.insert(ThreadList::new()))
    }

    pub fn queue_valid(&self, queue: QueueId) -> bool {
        self.queues.contains(queue.0)
    }

    fn queue(&mut self, queue: QueueId) -> &mut ThreadList {
        match self.queues.get_mut(queue.0) {
            Some(list) => list,
            None => fatal!("invalid wait list handle"),
        }
    }

    /// Release a wait list. Returns false if threads are still waiting on it
    /// (the list is left alone then).
    pub fn queue_free(&mut self, queue: QueueId) -> bool {
        match self.queues.get(queue.0) {
            Some(list) if !list.is_empty() => false,
            Some(_) => {
                self.queues.remove(queue.0);
                true
            }
            None => true,
        }
    }

    pub fn queue_len(&self, queue: QueueId) -> usize {
        self.queues.get(queue.0).map_or(0, |list| list.len())
    }

    /// Block the current thread on `queue`. The caller switches away next.
    pub fn enqueue_current(&mut self, queue: QueueId) -> ThreadId {
        let me = self.current;
        let thread = self.thread_mut(me);
        thread.residence = Residence::Waiting(queue);
        let priority = thread.priority;
        self.queue(queue).push(me, priority);
        me
    }

    /// Make the first waiter of `queue` ready. Returns its priority.
    pub fn wake_one(&mut self, queue: QueueId) -> Option<i8> {
        let id = self.queues.get_mut(queue.0)?.pop()?;
        let priority = self.thread(id).priority;
        self.push_ready(id);
        Some(priority)
    }

    /// Make every waiter of `queue` ready. Returns the highest priority woken.
    pub fn wake_all(&mut self, queue: QueueId) -> Option<i8> {
        let mut highest = None;
        while let Some(priority) = self.wake_one(queue) {
            highest = highest.max(Some(priority));
        }
        highest
    }

    /// Take `id` off `queue` and make it ready, if it is still waiting there.
    /// Used by timeouts that race against a wakeup.
    pub fn remove_waiter(&mut self, queue: QueueId, id: ThreadId) -> Option<i8> {
        let thread = self.threads.get(id.0)?;
        if thread.residence != Residence::Waiting(queue) {
            return None;
        }
        let priority = thread.priority;
        self.queue(queue).remove(id);
        self.push_ready(id);
        Some(priority)
    }

    // ── Priorities and suspension ───────────────────────────────

    pub fn set_priority(&mut self, id: ThreadId, priority: i8) {
        let thread = self.thread_mut(id);
        thread.priority = priority;
        match thread.residence {
            Residence::Ready => {
                self.ready.remove(id);
                self.ready.push(id, priority);
            }
            Residence::Waiting(queue) => {
                let list = self.queue(queue);
                list.remove(id);
                list.push(id, priority);
            }
            _ => {}
        }
    }

    /// Flag `id` as suspended. The running thread is parked right away (the
    /// caller then switches); any other thread is parked the next time the
    /// scheduler picks it.
    pub fn suspend(&mut self, id: ThreadId) -> bool {
        let current = self.current;
        let thread = self.thread_mut(id);
        thread.flags |= ThreadFlags::SUSPENDED;
        if id == current {
            thread.residence = Residence::Parked;
            return true;
        }
        false
    }

    /// Clear the suspension of `id`. Returns its priority if it had been
    /// parked and is now ready again.
    pub fn resume(&mut self, id: ThreadId) -> Option<i8> {
        let thread = self.thread_mut(id);
        thread.flags -= ThreadFlags::SUSPENDED;
        if thread.residence != Residence::Parked {
            return None;
        }
        let priority = thread.priority;
        self.make_ready(id);
        Some(priority)
    }

    // ── Joining ─────────────────────────────────────────────────

    pub fn detach(&mut self, id: ThreadId) {
        let thread = self.thread(id);
        kassert!(
            !thread.flags.contains(ThreadFlags::WAIT_FOR_JOIN),
            "cannot detach thread {}[{}] which is already exited",
            thread.name,
            id
        );
        kassert!(
            thread.joiner.is_none(),
            "cannot detach thread {}[{}] which is being joined",
            thread.name,
            id
        );
        self.thread_mut(id).flags |= ThreadFlags::DETACHED;
    }

    /// Collect `id` if it already exited; otherwise register the current
    /// thread as its joiner (the caller then switches away).
    pub fn join(&mut self, id: ThreadId) -> Option<i32> {
        let me = self.current;
        kassert!(id != me, "a thread cannot join itself");
        let thread = self.thread(id);
        kassert!(
            !thread.flags.contains(ThreadFlags::DETACHED),
            "cannot join a detached thread: {}[{}]",
            thread.name,
            id
        );
        if thread.flags.contains(ThreadFlags::WAIT_FOR_JOIN) {
            return Some(self.reap(id));
        }
        if let Some(other) = thread.joiner {
            fatal!("thread {}[{}] already joined by {}", thread.name, id, other);
        }
        self.thread_mut(id).joiner = Some(me);
        self.thread_mut(me).residence = Residence::Joining;
        None
    }

    pub fn try_join(&mut self, id: ThreadId) -> Option<i32> {
        let thread = self.thread(id);
        kassert!(
            !thread.flags.contains(ThreadFlags::DETACHED),
            "cannot join a detached thread: {}[{}]",
            thread.name,
            id
        );
        if let Some(other) = thread.joiner {
            fatal!("thread {}[{}] already joined by {}", thread.name, id, other);
        }
        if thread.flags.contains(ThreadFlags::WAIT_FOR_JOIN) {
            return Some(self.reap(id));
        }
        None
    }

    // ── Scheduling ──────────────────────────────────────────────

    /// Pop the next runnable thread, retiring dead and suspended ones on
    /// the way.
    fn pick_next(&mut self) -> ThreadId {
        loop {
            let Some(id) = self.ready.pop() else {
                fatal!("ready list is empty: the idle thread is gone")
            };
            let thread = self.thread_mut(id);
            if thread.flags.contains(ThreadFlags::ZOMBIE) {
                thread.residence = Residence::Exited;
                self.free(id);
            } else if thread.flags.contains(ThreadFlags::WAIT_FOR_JOIN) {
                thread.residence = Residence::Exited;
            } else if thread.flags.contains(ThreadFlags::SUSPENDED) {
                thread.residence = Residence::Parked;
            } else {
                return id;
            }
        }
    }

    fn schedule(
        &mut self,
        regs: NonNull<RegisterBlock>,
        depth: i32,
        sr: u32,
    ) -> (NonNull<RegisterBlock>, i32, u32) {
        let me = self.current;
        // SAFETY: the trap layer hands over the frame it just filled.
        let (cause, epc) = unsafe { (Cause(regs.as_ref().cr), regs.as_ref().epc) };

        let thread = self.thread_mut(me);
        thread.regs = regs;
        thread.irq_depth = depth;
        thread.irq_sr = sr;
        thread.stack.check(regs.as_ptr() as usize, thread.name, me);

        if thread.flags.contains(ThreadFlags::ZOMBIE) {
            kassert!(
                thread.flags.contains(ThreadFlags::DETACHED),
                "thread {}[{}] is a zombie but not detached",
                thread.name,
                me
            );
            thread.residence = Residence::Exited;
            self.free(me);
        } else if thread.flags.contains(ThreadFlags::WAIT_FOR_JOIN) {
            thread.residence = Residence::Exited;
        } else if cause.code() == Some(ExcCode::Syscall) {
            kassert!(
                thread.residence != Residence::Running,
                "thread {}[{}] switched out without being in a list",
                thread.name,
                me
            );
            let opcode = arch::fetch_opcode(epc);
            kassert!(
                opcode == SWITCH_OPCODE,
                "invalid opcode found by the scheduler:\nexpected {:#010x} (SYSCALL 0x0), found: {:#010x}",
                SWITCH_OPCODE,
                opcode
            );
            // SAFETY: as above.
            unsafe { (*regs.as_ptr()).epc = epc.wrapping_add(4) };
        } else {
            kassert!(
                thread.residence == Residence::Running,
                "thread {}[{}] preempted while in a list",
                thread.name,
                me
            );
            self.make_ready(me);
        }

        let next = self.pick_next();
        self.current = next;
        let thread = self.thread_mut(next);
        thread.residence = Residence::Running;
        if next != me {
            klog::trace!("switch: {} -> {}[{}]", me, thread.name, next);
        }
        (thread.regs, thread.irq_depth, thread.irq_sr)
    }
}
