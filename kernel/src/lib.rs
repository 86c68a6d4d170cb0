// =============================================================================
// n64-kernel — Crate Root
// =============================================================================
//
// Threads, synchronization and trap dispatch for a single-core VR4300.
//
// LAYERING (leaf first):
//   arch     — register block layout, CPU access, the trap boundary
//   irq      — nestable interrupt masking + per-line callback chains
//   traps    — exception classification, syscall routing, diagnostics
//   timer    — deadline queue driven by the COUNT/COMPARE interrupt
//   task     — the scheduler: threads, ready list, context switches
//   sync     — mutex, condvar, semaphore, mailbox/event, queue, IRQ waits
//
// EXECUTION MODEL:
//   There is exactly one CPU and no time slicing. A thread runs until it
//   traps into the kernel (yield, sleep, a blocking wait, exit) or until an
//   interrupt wakes a thread of equal or higher priority, in which case the
//   switch happens on the way out of that interrupt.
//
//   The only mutual exclusion primitive underneath everything is "interrupts
//   are disabled". With the `hosted` feature the CPU is simulated and each
//   kernel thread is carried by an OS thread, but exactly one of them runs
//   at any time, so the same invariant holds.
//
// =============================================================================

#![cfg_attr(not(any(test, feature = "hosted")), no_std)]

extern crate alloc;

#[doc(hidden)]
#[macro_use]
pub mod util;

pub mod arch;
pub mod config;
pub mod irq;
pub mod sync;
pub mod task;
pub mod timer;
pub mod traps;

#[cfg(feature = "hosted")]
pub use arch::hosted;

pub use config::KernelConfig;
pub use task::ThreadId;

/// Start the scheduler with the default configuration.
///
/// The caller becomes the main thread. Returns its handle.
pub fn init() -> ThreadId {
    init_with(KernelConfig::default())
}

/// Start the scheduler.
///
/// Brings up interrupts and the timer if nobody did yet, turns the calling
/// context into the main thread (priority 0, detached) and creates the idle
/// thread. Calling it while the kernel is already running is a no-op that
/// returns the current thread.
pub fn init_with(config: KernelConfig) -> ThreadId {
    util::logger::init();
    irq::init();
    timer::init();
    task::sched::start(config)
}

/// Tear the scheduler down.
///
/// Must be called from the main thread after every other thread has been
/// killed or has exited.
pub fn close() {
    task::sched::stop();
}

/// Whether [`init`] has run and [`close`] has not.
pub fn is_running() -> bool {
    task::sched::is_running()
}
