// =============================================================================
// n64-kernel — Trap Dispatch
// =============================================================================
//
// Every exception and interrupt enters the kernel through `dispatch()` with
// the interrupted thread's saved registers, and leaves with the registers
// to resume (the same block, or another thread's after a switch).
//
//   Interrupt      → irq line handlers; then a deferred switch if a handler
//                    woke a thread that should preempt
//   SYSCALL 0      → the scheduler
//   SYSCALL n      → the handler registered for n, EPC skips the instruction
//   anything else  → the exception handler (by default: dump and abort)
//
// =============================================================================

mod diagnosis;
mod exception;
mod syscall;

use core::ptr::NonNull;

use khal::{Cause, ExcCode};

use crate::arch::{self, regs::RegisterBlock};
use crate::task::sched;

pub use diagnosis::{describe, is_unmapped_kx64};
pub use exception::{
    default_handler, format_register, register_exception_handler, set_inspector, write_gprs,
    write_header, Exception, ExceptionHandler, ExceptionKind, Inspector,
};
pub use syscall::{
    register_syscall_handler, unregister_syscall_handler, SyscallHandler, MAX_SYSCALL_CODE,
};

/// Handle one trap. Returns the register block to resume.
pub(crate) fn dispatch(regs: NonNull<RegisterBlock>) -> NonNull<RegisterBlock> {
    // SAFETY: the trap boundary passes a filled, exclusively owned frame.
    let cause = Cause(unsafe { regs.as_ref().cr });

    match cause.code() {
        Some(ExcCode::Interrupt) => {
            crate::irq::dispatch(cause.pending());
            if sched::take_deferred_switch() && sched::is_running() {
                return sched::schedule(regs);
            }
            regs
        }
        Some(ExcCode::Syscall) => {
            // SAFETY: as above.
            let epc = unsafe { regs.as_ref().epc };
            let code = (arch::fetch_opcode(epc) >> 6) & syscall::MAX_SYSCALL_CODE;
            if code == 0 {
                kassert!(
                    sched::is_running(),
                    "scheduler syscall without a running kernel: call init() first"
                );
                return sched::schedule(regs);
            }
            // SAFETY: as above.
            let frame = unsafe { &mut *regs.as_ptr() };
            let mut ex = Exception::new(ExceptionKind::Syscall, frame);
            if syscall::route(&mut ex, code) {
                ex.regs.epc = ex.regs.epc.wrapping_add(4);
            } else {
                exception::critical(ex.regs);
            }
            regs
        }
        _ => {
            // SAFETY: as above.
            exception::critical(unsafe { &mut *regs.as_ptr() });
            regs
        }
    }
}

#[cfg(feature = "hosted")]
pub(crate) fn reset() {
    exception::reset();
    syscall::reset();
}
