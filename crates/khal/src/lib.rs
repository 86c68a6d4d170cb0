//! Hardware Abstraction Layer for the VR4300 CPU and the RCP interrupt fabric.
//!
//! The kernel never touches coprocessor 0 or the MIPS Interface directly; it
//! goes through the [`Cpu`] trait. [`vr4300::Vr4300`] drives the real
//! registers, [`sim::SimCpu`] models them with atomics so the same kernel
//! code can run on a development host.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_arch = "mips", feature(asm_experimental_arch))]

pub mod cop0;
pub mod cpu;
pub mod debug;
pub mod mi;
pub mod mmio;
pub mod sim;
#[cfg(target_arch = "mips")]
pub mod vr4300;

pub use cop0::{Cause, ExcCode, FpuCause, Status};
pub use cpu::Cpu;
pub use mi::MiLines;

/// COP0 COUNT increments at half the 93.75 MHz CPU clock.
pub const TICKS_PER_SECOND: u64 = 46_875_000;
