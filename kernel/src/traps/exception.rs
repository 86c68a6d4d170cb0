//! Exception descriptors, the replaceable exception handler, and the
//! default handler's register dump.

use alloc::string::String;
use core::fmt::{self, Write};

use khal::{Cause, Cpu, ExcCode, FpuCause};
use spin::RwLock;

use crate::arch::{self, regs::RegisterBlock, regs::GPR_NAMES};

use super::diagnosis;

/// How the exception reached the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    /// Unrecoverable unless a custom handler fixes things up.
    Critical,
    /// A `SYSCALL` routed to a registered handler.
    Syscall,
}

/// Everything known about one exception.
pub struct Exception<'a> {
    pub kind: ExceptionKind,
    /// Raw Cause exception code.
    pub code: u32,
    /// Short diagnosis, see [`diagnosis::describe`].
    pub info: &'static str,
    /// Registers at the time of the exception. Handlers may modify them;
    /// they are reloaded when the exception returns.
    pub regs: &'a mut RegisterBlock,
}

impl Exception<'_> {
    pub(crate) fn new(kind: ExceptionKind, regs: &mut RegisterBlock) -> Exception<'_> {
        let cause = Cause(regs.cr);
        let info = diagnosis::describe(cause.code(), regs, arch::cpu().badvaddr());
        Exception {
            kind,
            code: cause.code_bits(),
            info,
            regs,
        }
    }

    pub fn exc_code(&self) -> Option<ExcCode> {
        ExcCode::from_bits(self.code)
    }

    /// PC of the faulting instruction.
    pub fn pc(&self) -> u32 {
        self.regs.fault_pc()
    }

    /// Code embedded in the `SYSCALL` instruction at EPC.
    pub fn syscall_code(&self) -> u32 {
        (arch::fetch_opcode(self.regs.epc) >> 6) & 0xFFFFF
    }
}

impl fmt::Debug for Exception<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exception")
            .field("kind", &self.kind)
            .field("code", &self.code)
            .field("info", &self.info)
            .field("epc", &format_args!("{:#010x}", self.regs.epc))
            .finish()
    }
}

/// Exception handler. Called for every critical exception.
pub type ExceptionHandler = fn(&mut Exception<'_>);

/// Extra reporting hook run by the default handler before it aborts.
pub type Inspector = fn(&Exception<'_>);

static HANDLER: RwLock<Option<ExceptionHandler>> = RwLock::new(Some(default_handler));

static INSPECTOR: RwLock<Option<Inspector>> = RwLock::new(None);

/// Install `handler` for critical exceptions and return the previous one.
/// `None` ignores critical exceptions entirely.
pub fn register_exception_handler(handler: Option<ExceptionHandler>) -> Option<ExceptionHandler> {
    core::mem::replace(&mut *HANDLER.write(), handler)
}

/// Install a hook that sees every exception the default handler reports.
pub fn set_inspector(inspector: Option<Inspector>) -> Option<Inspector> {
    core::mem::replace(&mut *INSPECTOR.write(), inspector)
}

pub(crate) fn critical(regs: &mut RegisterBlock) {
    let handler = *HANDLER.read();
    if let Some(handler) = handler {
        let mut exception = Exception::new(ExceptionKind::Critical, regs);
        handler(&mut exception);
    }
}

/// Write the one-screen summary of an exception: what and where, plus the
/// COP0/FPU detail relevant to its code.
pub fn write_header(out: &mut impl Write, ex: &Exception<'_>) -> fmt::Result {
    writeln!(out, "{} exception at PC:{:08X}", ex.info, ex.pc())?;
    match ex.exc_code() {
        Some(
            ExcCode::StoreAddressError
            | ExcCode::LoadAddressError
            | ExcCode::TlbStoreMiss
            | ExcCode::TlbLoadMiss
            | ExcCode::TlbModification,
        ) => write_address(out, arch::cpu().badvaddr()),
        Some(ExcCode::FloatingPoint) => {
            write!(out, "FPU status: {:08X} [", ex.regs.fc31)?;
            let cause = FpuCause::from_fcr31(ex.regs.fc31);
            let names = [
                (FpuCause::INEXACT, "INEXACT"),
                (FpuCause::OVERFLOW, "OVERFLOW"),
                (FpuCause::UNDERFLOW, "UNDERFLOW"),
                (FpuCause::DIV_BY_0, "DIV0"),
                (FpuCause::INVALID, "INVALID"),
                (FpuCause::NOT_IMPLEMENTED, "NOTIMPL"),
            ];
            let mut space = "";
            for (flag, name) in names {
                if cause.contains(flag) {
                    write!(out, "{}{}", space, name)?;
                    space = " ";
                }
            }
            writeln!(out, "]")
        }
        Some(ExcCode::CoprocessorUnusable) => {
            writeln!(out, "COP: {}", Cause(ex.regs.cr).coprocessor())
        }
        Some(ExcCode::Syscall) => writeln!(out, "Syscall code: {:05X}", ex.syscall_code()),
        Some(ExcCode::DataBusError) => {
            // Recompute the address from the faulting load/store.
            let opcode = arch::fetch_opcode(ex.pc());
            let base = ex.regs.gpr[((opcode >> 21) & 0x1F) as usize];
            let offset = (opcode & 0xFFFF) as u16 as i16 as i64 as u64;
            write_address(out, base.wrapping_add(offset))
        }
        _ => Ok(()),
    }
}

fn write_address(out: &mut impl Write, addr: u64) -> fmt::Result {
    if addr as i32 as i64 as u64 == addr {
        writeln!(out, "Exception address: {:08X}", addr as u32)
    } else {
        writeln!(out, "Exception address: {:016X}", addr)
    }
}

/// Format one register the way the dump shows it: sign-extended 32-bit
/// values get their upper half dashed out.
pub fn format_register(value: u64) -> String {
    let mut out = String::new();
    let parts = [(value >> 48) & 0xFFFF, (value >> 32) & 0xFFFF, (value >> 16) & 0xFFFF, value & 0xFFFF];
    // Formatting into a String cannot fail.
    let _ = if value as i32 as i64 as u64 == value {
        write!(out, "---- ---- {:04x} {:04x}", parts[2], parts[3])
    } else {
        write!(out, "{:04x} {:04x} {:04x} {:04x}", parts[0], parts[1], parts[2], parts[3])
    };
    out
}

/// Write every GPR plus hi/lo, four per line.
pub fn write_gprs(out: &mut impl Write, regs: &RegisterBlock) -> fmt::Result {
    writeln!(out, "GPR:")?;
    for (i, name) in GPR_NAMES.iter().enumerate() {
        let sep = if (i + 1) % 4 == 0 { "\n" } else { "   " };
        write!(out, "{}: {}{}", name, format_register(regs.dump_value(i)), sep)?;
    }
    writeln!(out)
}

/// Default handler: dump everything, let the inspector look, then abort.
pub fn default_handler(ex: &mut Exception<'_>) {
    let mut report = String::new();
    let _ = writeln!(report, "******* CPU EXCEPTION *******");
    let _ = write_header(&mut report, ex);
    let _ = write_gprs(&mut report, ex.regs);
    klog::error!("{}", report);

    let inspector = *INSPECTOR.read();
    if let Some(inspector) = inspector {
        inspector(ex);
    }
    fatal!("{} exception at PC:{:08X}", ex.info, ex.pc());
}

#[cfg(feature = "hosted")]
pub(crate) fn reset() {
    *HANDLER.write() = Some(default_handler);
    *INSPECTOR.write() = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_format_dashes_sign_extended_values() {
        assert_eq!(format_register(0x1234_5678), "---- ---- 1234 5678");
        assert_eq!(format_register(0xffff_ffff_8000_0000), "---- ---- 8000 0000");
        assert_eq!(format_register(0x0000_0001_0000_0000), "0000 0001 0000 0000");
    }

    #[test]
    fn gpr_dump_has_all_registers() {
        let mut regs = RegisterBlock::zeroed();
        regs.gpr[29] = 0xffff_ffff_8030_0000;
        let mut out = String::new();
        write_gprs(&mut out, &regs).unwrap();
        assert!(out.contains("sp: ---- ---- 8030 0000"));
        assert!(out.contains("hi: ---- ---- 0000 0000"));
        assert!(out.contains("lo: "));
    }
}
