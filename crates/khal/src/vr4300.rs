//! Real VR4300 coprocessor 0 and MI register access.

use core::arch::asm;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::cop0::Status;
use crate::cpu::Cpu;
use crate::mi::{self, MiLines};
use crate::mmio::{read32, write32};

const SP_STATUS: usize = 0xA404_0010;
const SI_STATUS: usize = 0xA480_0018;
const AI_STATUS: usize = 0xA450_000C;
const VI_CURRENT: usize = 0xA440_0010;
const PI_STATUS: usize = 0xA460_0010;
const MI_MODE: usize = mi::MI_BASE;

const SP_WSTATUS_CLEAR_INTR: u32 = 1 << 3;
const PI_CLEAR_INTR: u32 = 1 << 1;
const MI_WMODE_CLEAR_DP: u32 = 1 << 11;

/// The physical CPU. COUNT is 32 bits and wraps every ~91 seconds, so
/// [`Cpu::ticks`] extends it with a software epoch that must be observed at
/// least once per wrap (the timer interrupt guarantees this).
pub struct Vr4300 {
    last_count: AtomicU32,
    epoch: AtomicU32,
}

impl Vr4300 {
    pub const fn new() -> Self {
        Self {
            last_count: AtomicU32::new(0),
            epoch: AtomicU32::new(0),
        }
    }
}

macro_rules! mfc0 {
    ($reg:literal) => {{
        let value: u32;
        // SAFETY: reading a COP0 register has no side effects.
        unsafe { asm!(concat!("mfc0 {0}, $", $reg), out(reg) value, options(nomem, nostack)) };
        value
    }};
}

macro_rules! mtc0 {
    ($reg:literal, $value:expr) => {{
        let value: u32 = $value;
        // SAFETY: callers only write the documented COP0 fields.
        unsafe { asm!(concat!("mtc0 {0}, $", $reg), "nop", in(reg) value, options(nomem, nostack)) };
    }};
}

impl Cpu for Vr4300 {
    fn status(&self) -> Status {
        Status::from_bits_retain(mfc0!("12"))
    }

    fn set_status(&self, status: Status) {
        mtc0!("12", status.bits());
    }

    fn cause(&self) -> u32 {
        mfc0!("13")
    }

    fn badvaddr(&self) -> u64 {
        let value: u64;
        // SAFETY: reading BadVAddr has no side effects.
        unsafe { asm!("dmfc0 {0}, $8", out(reg) value, options(nomem, nostack)) };
        value
    }

    fn ticks(&self) -> u64 {
        let count = mfc0!("9");
        let last = self.last_count.swap(count, Ordering::Relaxed);
        if count < last {
            self.epoch.fetch_add(1, Ordering::Relaxed);
        }
        ((self.epoch.load(Ordering::Relaxed) as u64) << 32) | count as u64
    }

    fn set_compare(&self, deadline: u64) {
        mtc0!("11", deadline as u32);
    }

    fn disarm_compare(&self) {
        // Writing COMPARE acknowledges; parking it just behind COUNT keeps
        // it quiet for a full wrap.
        mtc0!("11", mfc0!("9").wrapping_sub(1));
    }

    fn mi_pending(&self) -> MiLines {
        // SAFETY: MI registers are always mapped.
        let raw = unsafe { read32(mi::MI_INTERRUPT) & read32(mi::MI_MASK) };
        MiLines::from_bits_truncate(raw)
    }

    fn mi_ack(&self, lines: MiLines) {
        // SAFETY: each write is the documented acknowledge for its source.
        unsafe {
            if lines.contains(MiLines::SP) {
                write32(SP_STATUS, SP_WSTATUS_CLEAR_INTR);
            }
            if lines.contains(MiLines::SI) {
                write32(SI_STATUS, 0);
            }
            if lines.contains(MiLines::AI) {
                write32(AI_STATUS, 0);
            }
            if lines.contains(MiLines::VI) {
                write32(VI_CURRENT, read32(VI_CURRENT));
            }
            if lines.contains(MiLines::PI) {
                write32(PI_STATUS, PI_CLEAR_INTR);
            }
            if lines.contains(MiLines::DP) {
                write32(MI_MODE, MI_WMODE_CLEAR_DP);
            }
        }
    }

    fn mi_set_mask(&self, lines: MiLines, enable: bool) {
        // SAFETY: MI_MASK uses set/clear pairs, untouched sources keep state.
        unsafe { write32(mi::MI_MASK, mi::mask_write_value(lines, enable)) };
    }

    fn mi_mask(&self) -> MiLines {
        // SAFETY: MI registers are always mapped.
        MiLines::from_bits_truncate(unsafe { read32(mi::MI_MASK) })
    }
}
