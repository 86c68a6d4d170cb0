//! Coprocessor 0 register encodings (Status, Cause) and the FPU control/status
//! register (FCR31) cause bits.

use bitflags::bitflags;

bitflags! {
    /// COP0 Status register bits used by the kernel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u32 {
        /// Global interrupt enable.
        const IE = 1 << 0;
        /// Exception level: set by hardware on trap entry, masks interrupts.
        const EXL = 1 << 1;
        /// Error level: set on reset/NMI, masks interrupts.
        const ERL = 1 << 2;
        /// IM2: RCP (MIPS Interface) interrupt mask.
        const IM_RCP = 1 << 10;
        /// IM3: cartridge interrupt mask.
        const IM_CART = 1 << 11;
        /// IM4: pre-NMI (reset button) interrupt mask.
        const IM_PRENMI = 1 << 12;
        /// IM7: COUNT/COMPARE timer interrupt mask.
        const IM_TIMER = 1 << 15;
        /// Coprocessor 1 usable.
        const CU1 = 1 << 29;
    }
}

impl Status {
    /// Mask of all interrupt-mask bits (IM0..IM7).
    pub const IM_ALL: u32 = 0xff << 8;

    /// Interrupts can actually be taken.
    pub fn interrupts_deliverable(self) -> bool {
        self.contains(Status::IE) && !self.intersects(Status::EXL | Status::ERL)
    }
}

/// Decoded view over a raw Cause register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cause(pub u32);

impl Cause {
    /// IP2: RCP interrupt pending.
    pub const IP_RCP: u32 = 1 << 10;
    /// IP3: cartridge interrupt pending.
    pub const IP_CART: u32 = 1 << 11;
    /// IP4: pre-NMI pending.
    pub const IP_PRENMI: u32 = 1 << 12;
    /// IP7: timer interrupt pending.
    pub const IP_TIMER: u32 = 1 << 15;
    /// All interrupt-pending bits.
    pub const IP_ALL: u32 = 0xff << 8;
    /// Branch delay: the faulting instruction sits in a delay slot.
    pub const BD: u32 = 1 << 31;

    pub fn from_code(code: ExcCode, pending: u32) -> Cause {
        Cause(((code as u32) << 2) | (pending & Self::IP_ALL))
    }

    /// Raw exception code, bits 2..6.
    pub fn code_bits(self) -> u32 {
        (self.0 >> 2) & 0x1f
    }

    pub fn code(self) -> Option<ExcCode> {
        ExcCode::from_bits(self.code_bits())
    }

    pub fn branch_delay(self) -> bool {
        self.0 & Self::BD != 0
    }

    /// Coprocessor number for a coprocessor-unusable exception.
    pub fn coprocessor(self) -> u32 {
        (self.0 >> 28) & 0x3
    }

    pub fn pending(self) -> u32 {
        self.0 & Self::IP_ALL
    }
}

/// MIPS exception codes reported in Cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ExcCode {
    Interrupt = 0,
    TlbModification = 1,
    TlbLoadMiss = 2,
    TlbStoreMiss = 3,
    LoadAddressError = 4,
    StoreAddressError = 5,
    InstructionBusError = 6,
    DataBusError = 7,
    Syscall = 8,
    Breakpoint = 9,
    ReservedInstruction = 10,
    CoprocessorUnusable = 11,
    ArithmeticOverflow = 12,
    Trap = 13,
    FloatingPoint = 15,
    Watch = 23,
}

impl ExcCode {
    pub fn from_bits(code: u32) -> Option<ExcCode> {
        Some(match code {
            0 => ExcCode::Interrupt,
            1 => ExcCode::TlbModification,
            2 => ExcCode::TlbLoadMiss,
            3 => ExcCode::TlbStoreMiss,
            4 => ExcCode::LoadAddressError,
            5 => ExcCode::StoreAddressError,
            6 => ExcCode::InstructionBusError,
            7 => ExcCode::DataBusError,
            8 => ExcCode::Syscall,
            9 => ExcCode::Breakpoint,
            10 => ExcCode::ReservedInstruction,
            11 => ExcCode::CoprocessorUnusable,
            12 => ExcCode::ArithmeticOverflow,
            13 => ExcCode::Trap,
            15 => ExcCode::FloatingPoint,
            23 => ExcCode::Watch,
            _ => return None,
        })
    }

    /// Short human-readable name, used when no finer diagnosis applies.
    pub fn name(self) -> &'static str {
        match self {
            ExcCode::Interrupt => "Interrupt",
            ExcCode::TlbModification => "TLB Modification",
            ExcCode::TlbLoadMiss => "TLB Miss (load/instruction fetch)",
            ExcCode::TlbStoreMiss => "TLB Miss (store)",
            ExcCode::LoadAddressError => "Address Error (load/instruction fetch)",
            ExcCode::StoreAddressError => "Address Error (store)",
            ExcCode::InstructionBusError => "Bus Error (instruction fetch)",
            ExcCode::DataBusError => "Bus Error (load/store)",
            ExcCode::Syscall => "Syscall",
            ExcCode::Breakpoint => "Breakpoint",
            ExcCode::ReservedInstruction => "Reserved Instruction",
            ExcCode::CoprocessorUnusable => "Coprocessor Unusable",
            ExcCode::ArithmeticOverflow => "Arithmetic Overflow",
            ExcCode::Trap => "Trap",
            ExcCode::FloatingPoint => "Floating-Point",
            ExcCode::Watch => "Watch",
        }
    }
}

bitflags! {
    /// Cause bits of the FPU control/status register (FCR31).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FpuCause: u32 {
        const INEXACT = 1 << 12;
        const UNDERFLOW = 1 << 13;
        const OVERFLOW = 1 << 14;
        const DIV_BY_0 = 1 << 15;
        const INVALID = 1 << 16;
        const NOT_IMPLEMENTED = 1 << 17;
    }
}

impl FpuCause {
    pub fn from_fcr31(fcr31: u32) -> FpuCause {
        FpuCause::from_bits_truncate(fcr31)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cause_decodes_code_and_delay_slot() {
        let cause = Cause(Cause::BD | (13 << 2) | Cause::IP_TIMER);
        assert_eq!(cause.code(), Some(ExcCode::Trap));
        assert!(cause.branch_delay());
        assert_eq!(cause.pending(), Cause::IP_TIMER);
    }

    #[test]
    fn unknown_codes_do_not_decode() {
        assert_eq!(ExcCode::from_bits(14), None);
        assert_eq!(ExcCode::from_bits(31), None);
    }

    #[test]
    fn coprocessor_unusable_reports_unit() {
        let cause = Cause((1 << 28) | ((ExcCode::CoprocessorUnusable as u32) << 2));
        assert_eq!(cause.coprocessor(), 1);
    }

    #[test]
    fn exl_masks_interrupts() {
        assert!(Status::IE.interrupts_deliverable());
        assert!(!(Status::IE | Status::EXL).interrupts_deliverable());
        assert!(!(Status::IE | Status::ERL).interrupts_deliverable());
    }
}
