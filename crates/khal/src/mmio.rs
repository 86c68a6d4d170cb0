//! Uncached memory-mapped register access.
//!
//! All RCP and cartridge registers are 32-bit and must be accessed with
//! 32-bit loads and stores through KSEG1.

/// Read a 32-bit hardware register.
///
/// # Safety
///
/// `addr` must be a valid, mapped, 4-byte aligned register address.
#[inline]
pub unsafe fn read32(addr: usize) -> u32 {
    core::ptr::read_volatile(addr as *const u32)
}

/// Write a 32-bit hardware register.
///
/// # Safety
///
/// `addr` must be a valid, mapped, 4-byte aligned register address, and the
/// write must not violate the protocol of the device behind it.
#[inline]
pub unsafe fn write32(addr: usize, value: u32) {
    core::ptr::write_volatile(addr as *mut u32, value)
}
