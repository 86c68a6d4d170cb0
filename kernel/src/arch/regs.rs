//! Saved CPU state.
//!
//! The trap entry code spills every register into a [`RegisterBlock`] at the
//! top of the interrupted thread's stack and hands its address to the
//! kernel; the exit code reloads whatever block the kernel returns. The
//! layout is shared with that assembly and must never change.

use core::mem::{offset_of, size_of};

/// Full VR4300 register snapshot.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RegisterBlock {
    /// General purpose registers `$0..$31`.
    pub gpr: [u64; 32],
    pub hi: u64,
    pub lo: u64,
    /// COP0 Status.
    pub sr: u32,
    /// COP0 Cause.
    pub cr: u32,
    /// Exception program counter.
    pub epc: u32,
    /// FPU control/status register.
    pub fc31: u32,
    /// Floating point registers (FR=1 layout).
    pub fpr: [u64; 32],
}

pub const REGISTER_BLOCK_SIZE: usize = 544;

pub const OFFSET_HI: usize = 256;
pub const OFFSET_LO: usize = 264;
pub const OFFSET_SR: usize = 272;
pub const OFFSET_CR: usize = 276;
pub const OFFSET_EPC: usize = 280;
pub const OFFSET_FC31: usize = 284;
pub const OFFSET_FPR: usize = 288;

const _: () = {
    assert!(size_of::<RegisterBlock>() == REGISTER_BLOCK_SIZE);
    assert!(offset_of!(RegisterBlock, hi) == OFFSET_HI);
    assert!(offset_of!(RegisterBlock, lo) == OFFSET_LO);
    assert!(offset_of!(RegisterBlock, sr) == OFFSET_SR);
    assert!(offset_of!(RegisterBlock, cr) == OFFSET_CR);
    assert!(offset_of!(RegisterBlock, epc) == OFFSET_EPC);
    assert!(offset_of!(RegisterBlock, fc31) == OFFSET_FC31);
    assert!(offset_of!(RegisterBlock, fpr) == OFFSET_FPR);
};

/// Index of the stack pointer in [`RegisterBlock::gpr`].
pub const GPR_SP: usize = 29;
/// Index of the return address.
pub const GPR_RA: usize = 31;
/// Index of the first return value register.
pub const GPR_V0: usize = 2;
/// Index of the first argument register.
pub const GPR_A0: usize = 4;

/// ABI names of the GPRs, followed by `hi` and `lo`, in dump order.
pub const GPR_NAMES: [&str; 34] = [
    "zr", "at", "v0", "v1", "a0", "a1", "a2", "a3", "t0", "t1", "t2", "t3", "t4", "t5", "t6", "t7",
    "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "t8", "t9", "k0", "k1", "gp", "sp", "fp", "ra",
    "hi", "lo",
];

impl RegisterBlock {
    pub const fn zeroed() -> Self {
        Self {
            gpr: [0; 32],
            hi: 0,
            lo: 0,
            sr: 0,
            cr: 0,
            epc: 0,
            fc31: 0,
            fpr: [0; 32],
        }
    }

    /// PC of the faulting instruction, accounting for branch delay slots.
    pub fn fault_pc(&self) -> u32 {
        if self.cr & khal::Cause::BD != 0 {
            self.epc.wrapping_add(4)
        } else {
            self.epc
        }
    }

    /// Value of GPR/hi/lo `index` in [`GPR_NAMES`] order.
    pub fn dump_value(&self, index: usize) -> u64 {
        match index {
            0..=31 => self.gpr[index],
            32 => self.hi,
            _ => self.lo,
        }
    }
}

impl Default for RegisterBlock {
    fn default() -> Self {
        Self::zeroed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_trap_assembly() {
        assert_eq!(size_of::<RegisterBlock>(), 544);
        assert_eq!(offset_of!(RegisterBlock, epc), 280);
        assert_eq!(offset_of!(RegisterBlock, fpr), 288);
    }

    #[test]
    fn fault_pc_skips_delay_slot_branch() {
        let mut regs = RegisterBlock::zeroed();
        regs.epc = 0x8000_1000;
        assert_eq!(regs.fault_pc(), 0x8000_1000);
        regs.cr |= khal::Cause::BD;
        assert_eq!(regs.fault_pc(), 0x8000_1004);
    }
}
