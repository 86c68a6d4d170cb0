// =============================================================================
// n64-kernel — Architecture Boundary
// =============================================================================
//
// Everything the kernel needs from the machine goes through here:
//
//   cpu()            — the COP0/MI register interface (khal::Cpu)
//   switch_thread()  — trap into the scheduler (SYSCALL 0)
//   fetch_opcode()   — read an instruction word, for syscall decoding
//   spawn_context()  — execution context for a new thread
//   poll_pending()   — deliver interrupts that became deliverable
//   idle_wait()      — what the idle thread does between interrupts
//
// Two backends implement it:
//   baremetal — the real VR4300: assembly trap vector, hardware interrupts.
//   hosted    — a simulated CPU. Each kernel thread rides on an OS thread
//               and a baton makes sure exactly one of them runs; traps are
//               ordinary function calls into the same dispatcher.
//
// =============================================================================

pub mod regs;

#[cfg(not(feature = "hosted"))]
mod baremetal;
#[cfg(feature = "hosted")]
pub mod hosted;

#[cfg(not(feature = "hosted"))]
pub(crate) use baremetal::{
    abandon, adopt_main, boot_stack, fetch_opcode, idle_wait, initial_frame, install_traps,
    poll_pending, retire, spawn_context, switch_thread, unwinding, Context,
};
#[cfg(feature = "hosted")]
pub(crate) use hosted::{
    abandon, adopt_main, boot_stack, fetch_opcode, idle_wait, initial_frame, install_traps,
    poll_pending, retire, spawn_context, switch_thread, unwinding, Context,
};

use khal::{Cpu, Status};

#[cfg(feature = "hosted")]
pub type PlatformCpu = khal::sim::SimCpu;
#[cfg(not(feature = "hosted"))]
pub type PlatformCpu = khal::vr4300::Vr4300;

/// The CPU the kernel runs on.
pub fn cpu() -> &'static PlatformCpu {
    #[cfg(feature = "hosted")]
    {
        hosted::cpu()
    }
    #[cfg(not(feature = "hosted"))]
    {
        baremetal::cpu()
    }
}

/// Outcome of a trap, from the point of view of the thread that took it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resume {
    /// Execution continues where it trapped.
    Continue,
    /// The thread is dead; its context must not touch the kernel again.
    Retired,
}

/// Status register a new thread starts with: the caller's interrupt mask,
/// interrupts enabled, and the exception level that the return from the
/// first trap clears.
pub(crate) fn initial_status() -> u32 {
    ((cpu().status() | Status::IE | Status::EXL) - Status::ERL).bits()
}
