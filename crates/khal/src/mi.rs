//! MIPS Interface (MI): the RCP's interrupt aggregator.
//!
//! All six RCP sources funnel into a single CPU interrupt line (IP2). The MI
//! exposes which of them are pending and lets software mask each one.

use bitflags::bitflags;

/// MI register block in KSEG1.
pub const MI_BASE: usize = 0xA430_0000;
pub const MI_INTERRUPT: usize = MI_BASE + 0x08;
pub const MI_MASK: usize = MI_BASE + 0x0C;

bitflags! {
    /// RCP interrupt sources, in MI_INTERRUPT bit order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MiLines: u32 {
        const SP = 1 << 0;
        const SI = 1 << 1;
        const AI = 1 << 2;
        const VI = 1 << 3;
        const PI = 1 << 4;
        const DP = 1 << 5;
    }
}

/// MI_MASK write encoding: each source has a clear bit and a set bit.
pub fn mask_write_value(lines: MiLines, enable: bool) -> u32 {
    let mut value = 0;
    for bit in 0..6 {
        if lines.bits() & (1 << bit) != 0 {
            value |= if enable { 2 << (bit * 2) } else { 1 << (bit * 2) };
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_encoding_uses_set_and_clear_pairs() {
        assert_eq!(mask_write_value(MiLines::SP, false), 0x001);
        assert_eq!(mask_write_value(MiLines::SP, true), 0x002);
        assert_eq!(mask_write_value(MiLines::DP, true), 0x800);
        assert_eq!(mask_write_value(MiLines::all(), false), 0x555);
    }
}
