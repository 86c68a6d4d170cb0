//! Human-readable names for CPU exceptions.
//!
//! The generic Cause code says little ("TLB Miss (store)"). Looking at the
//! faulting address, the PC and the FPU status usually tells what the
//! program actually did wrong.

use khal::{ExcCode, FpuCause};

use crate::arch::{self, regs::RegisterBlock};
use crate::config::{KernelConfig, NULL_POINTER_LIMIT};
use crate::task::sched;

/// Trap code GCC emits to guard integer divisions (`teq $div, $zero, 7`).
const TRAP_CODE_DIVIDE_BY_ZERO: u32 = 7;

/// True for 64-bit kernel addresses that no segment maps, so that any
/// access faults with an address error regardless of alignment.
pub fn is_unmapped_kx64(addr: u64) -> bool {
    const RANGES: [(u64, bool); 23] = [
        (0x0000_00ff_ffff_ffff, false),
        (0x3fff_ffff_ffff_ffff, true),
        (0x4000_00ff_ffff_ffff, false),
        (0x7fff_ffff_ffff_ffff, true),
        (0x8000_0000_ffff_ffff, false),
        (0x87ff_ffff_ffff_ffff, true),
        (0x8800_0000_ffff_ffff, false),
        (0x8fff_ffff_ffff_ffff, true),
        (0x9000_0000_ffff_ffff, false),
        (0x97ff_ffff_ffff_ffff, true),
        (0x9800_0000_ffff_ffff, false),
        (0x9fff_ffff_ffff_ffff, true),
        (0xa000_0000_ffff_ffff, false),
        (0xa7ff_ffff_ffff_ffff, true),
        (0xa800_0000_ffff_ffff, false),
        (0xafff_ffff_ffff_ffff, true),
        (0xb000_0000_ffff_ffff, false),
        (0xb7ff_ffff_ffff_ffff, true),
        (0xb800_0000_ffff_ffff, false),
        (0xbfff_ffff_ffff_ffff, true),
        (0xc000_00ff_7fff_ffff, false),
        (0xffff_ffff_7fff_ffff, true),
        (u64::MAX, false),
    ];
    RANGES
        .iter()
        .find(|(last, _)| addr <= *last)
        .is_some_and(|(_, unmapped)| *unmapped)
}

/// Which TLS complaint applies to an access inside the invalid TLS window.
fn tls_message(write: bool) -> &'static str {
    match (sched::is_running(), write) {
        (true, false) => "Read from TLS in interrupt handler",
        (true, true) => "Write to TLS in interrupt handler",
        (false, _) => "Cannot access TLS without kernel_init()",
    }
}

fn in_tls_window(addr: u64) -> bool {
    sched::config()
        .unwrap_or_else(KernelConfig::default)
        .in_tls_window(addr)
}

/// Describe the exception in `regs`, with `badvaddr` the faulting address.
pub fn describe(code: Option<ExcCode>, regs: &RegisterBlock, badvaddr: u64) -> &'static str {
    let Some(code) = code else {
        return "Reserved";
    };
    let epc = regs.fault_pc();
    let pc_fault = epc == badvaddr as u32;

    match code {
        ExcCode::FloatingPoint => {
            let cause = FpuCause::from_fcr31(regs.fc31);
            if cause.contains(FpuCause::DIV_BY_0) {
                "Floating point divide by zero"
            } else if cause.contains(FpuCause::INVALID) {
                "Floating point invalid operation"
            } else if cause.contains(FpuCause::OVERFLOW) {
                "Floating point overflow"
            } else if cause.contains(FpuCause::UNDERFLOW) {
                "Floating point underflow"
            } else if cause.contains(FpuCause::INEXACT) {
                "Floating point inexact operation"
            } else {
                "Generic floating point"
            }
        }
        ExcCode::TlbLoadMiss => {
            if pc_fault {
                "Invalid program counter address"
            } else if badvaddr < NULL_POINTER_LIMIT {
                "NULL pointer dereference (read)"
            } else if in_tls_window(badvaddr) {
                tls_message(false)
            } else {
                "Read from invalid memory address"
            }
        }
        ExcCode::TlbStoreMiss => {
            if badvaddr < NULL_POINTER_LIMIT {
                "NULL pointer dereference (write)"
            } else if in_tls_window(badvaddr) {
                tls_message(true)
            } else {
                "Write to invalid memory address"
            }
        }
        ExcCode::TlbModification => "Write to read-only memory",
        ExcCode::LoadAddressError => {
            if pc_fault {
                if is_unmapped_kx64(badvaddr) {
                    "Program counter in invalid 64-bit address"
                } else {
                    "Misaligned program counter address"
                }
            } else if is_unmapped_kx64(badvaddr) {
                "Read from invalid 64-bit address"
            } else if in_tls_window(badvaddr) {
                tls_message(false)
            } else {
                "Misaligned read from memory"
            }
        }
        ExcCode::StoreAddressError => {
            if in_tls_window(badvaddr) {
                tls_message(true)
            } else {
                "Misaligned write to memory"
            }
        }
        ExcCode::Syscall => "Unhandled syscall",
        ExcCode::Trap => {
            let trap_code = (arch::fetch_opcode(epc) >> 6) & 0x3FF;
            if trap_code == TRAP_CODE_DIVIDE_BY_ZERO {
                "Integer divide by zero"
            } else {
                code.name()
            }
        }
        _ => code.name(),
    }
}

#[cfg(all(test, feature = "hosted"))]
mod tests {
    use super::*;
    use crate::arch::hosted::TestMachine;

    fn regs_at(epc: u32) -> RegisterBlock {
        let mut regs = RegisterBlock::zeroed();
        regs.epc = epc;
        regs
    }

    #[test]
    fn kx64_table_edges() {
        assert!(!is_unmapped_kx64(0x0000_00ff_ffff_ffff));
        assert!(is_unmapped_kx64(0x0000_0100_0000_0000));
        assert!(is_unmapped_kx64(0x2000_0000_0000_0000));
        assert!(!is_unmapped_kx64(0x4000_0000_0000_0000));
        assert!(!is_unmapped_kx64(0x8000_0000_8000_0000));
        assert!(is_unmapped_kx64(0x8000_0001_0000_0000));
        assert!(!is_unmapped_kx64(0xffff_ffff_8000_0000));
        assert!(is_unmapped_kx64(0xffff_ffff_7fff_ffff));
    }

    #[test]
    fn null_and_pc_faults() {
        let _m = TestMachine::new();
        let regs = regs_at(0x8000_0400);
        assert_eq!(
            describe(Some(ExcCode::TlbLoadMiss), &regs, 0x10),
            "NULL pointer dereference (read)"
        );
        assert_eq!(
            describe(Some(ExcCode::TlbLoadMiss), &regs, 0x8000_0400),
            "Invalid program counter address"
        );
        assert_eq!(
            describe(Some(ExcCode::TlbStoreMiss), &regs, 0x7f),
            "NULL pointer dereference (write)"
        );
        assert_eq!(
            describe(Some(ExcCode::TlbStoreMiss), &regs, 0x80),
            "Write to invalid memory address"
        );
    }

    #[test]
    fn fpu_cause_priority() {
        let _m = TestMachine::new();
        let mut regs = regs_at(0);
        regs.fc31 = (FpuCause::INEXACT | FpuCause::DIV_BY_0).bits();
        assert_eq!(
            describe(Some(ExcCode::FloatingPoint), &regs, 0),
            "Floating point divide by zero"
        );
        regs.fc31 = 0;
        assert_eq!(
            describe(Some(ExcCode::FloatingPoint), &regs, 0),
            "Generic floating point"
        );
    }

    #[test]
    fn address_errors() {
        let _m = TestMachine::new();
        let regs = regs_at(0x8000_0401);
        assert_eq!(
            describe(Some(ExcCode::LoadAddressError), &regs, 0x8000_0401),
            "Misaligned program counter address"
        );
        assert_eq!(
            describe(Some(ExcCode::LoadAddressError), &regs, 0x8000_1002),
            "Misaligned read from memory"
        );
        assert_eq!(
            describe(Some(ExcCode::LoadAddressError), &regs, 0x2000_0000_0000_0000),
            "Read from invalid 64-bit address"
        );
        // Mapped, so only the alignment is wrong.
        assert_eq!(
            describe(Some(ExcCode::LoadAddressError), &regs, 0x4000_0000_0000_0002),
            "Misaligned read from memory"
        );
        assert_eq!(
            describe(Some(ExcCode::StoreAddressError), &regs, 0x8000_1002),
            "Misaligned write to memory"
        );
        assert_eq!(
            describe(Some(ExcCode::TlbModification), &regs, 0),
            "Write to read-only memory"
        );
    }

    #[test]
    fn unknown_codes_are_reserved() {
        let _m = TestMachine::new();
        assert_eq!(describe(None, &regs_at(0), 0), "Reserved");
        assert_eq!(describe(Some(ExcCode::Breakpoint), &regs_at(0), 0), "Breakpoint");
    }
}
