//! The pre-NMI (reset button) line.
//!
//! Pressing reset raises a level interrupt that cannot be acknowledged and
//! keeps firing until the console actually resets, at least
//! [`RESET_GRACE_TICKS`] later. The handler therefore runs its callbacks
//! only on the first occurrence and records when that happened.

use core::sync::atomic::{AtomicU64, Ordering};

use khal::Cpu;

use super::lines::{self, Line};
use crate::arch;
use crate::config::RESET_GRACE_TICKS;

/// Tick of the first pre-NMI, or-ed with 1 so zero means "none".
static PRENMI_TICK: AtomicU64 = AtomicU64::new(0);

pub(super) fn handle() {
    if PRENMI_TICK.load(Ordering::Relaxed) != 0 {
        return;
    }
    PRENMI_TICK.store(arch::cpu().ticks() | 1, Ordering::Relaxed);
    klog::warn!("irq: reset button pressed");
    lines::run(Line::Reset);
    lines::notify(Line::Reset);
}

/// Ticks elapsed since the reset button was pressed, or 0 if it was not.
pub fn reset_time() -> u64 {
    match PRENMI_TICK.load(Ordering::Relaxed) {
        0 => 0,
        tick => arch::cpu().ticks().saturating_sub(tick),
    }
}

/// A hard reset is on its way.
pub fn is_reset_pending() -> bool {
    PRENMI_TICK.load(Ordering::Relaxed) != 0
}

/// Ticks left before the hardware is guaranteed to still be running, if a
/// reset is pending.
pub fn reset_grace_remaining() -> Option<u64> {
    is_reset_pending().then(|| RESET_GRACE_TICKS.saturating_sub(reset_time()))
}

#[cfg(feature = "hosted")]
pub(super) fn reset() {
    PRENMI_TICK.store(0, Ordering::Relaxed);
}
