//! The CPU contract the kernel is written against.

use crate::cop0::Status;
use crate::mi::MiLines;

/// Access to coprocessor 0 and the RCP interrupt registers.
///
/// There is one CPU, so implementations are shared statics and every method
/// takes `&self`. Callers are expected to serialize read-modify-write
/// sequences by masking interrupts.
pub trait Cpu: Sync {
    fn status(&self) -> Status;
    fn set_status(&self, status: Status);

    /// Raw Cause register.
    fn cause(&self) -> u32;

    /// Address that caused the last TLB or address-error exception.
    fn badvaddr(&self) -> u64;

    /// Monotonic COUNT ticks, extended to 64 bits.
    fn ticks(&self) -> u64;

    /// Program the timer interrupt for `deadline` ticks. Writing the
    /// deadline acknowledges a pending timer interrupt.
    fn set_compare(&self, deadline: u64);

    /// Silence the timer until the next `set_compare`.
    fn disarm_compare(&self);

    /// RCP sources both pending and unmasked.
    fn mi_pending(&self) -> MiLines;

    /// Acknowledge RCP sources at the originating peripheral.
    fn mi_ack(&self, lines: MiLines);

    fn mi_set_mask(&self, lines: MiLines, enable: bool);

    fn mi_mask(&self) -> MiLines;
}
