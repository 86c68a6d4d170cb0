// =============================================================================
// n64-kernel — Interrupt Controller
// =============================================================================
//
// MASKING:
//   disable()/enable() nest. The first disable() captures the Status
//   register and clears IE; the matching last enable() restores only the
//   IE bit that was captured. Inside an interrupt handler (EXL set) this
//   means interrupts stay masked after enable(), which is what keeps
//   handlers from being re-entered.
//
//   Depth -1 means "not initialized yet": both calls are no-ops so early
//   boot code and static constructors can use locks freely.
//
// LINES:
//   Six RCP sources behind the MI (SP, SI, AI, VI, PI, DP), the COUNT/
//   COMPARE timer, the cartridge line and the pre-NMI reset line. Each
//   has an ordered chain of plain `fn()` callbacks; see `lines.rs`.
//
// =============================================================================

mod lines;
mod reset;

use core::marker::PhantomData;
use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use khal::{Cpu, MiLines, Status};

use crate::arch;

pub use lines::{event, is_enabled, register, set_enabled, unregister, Callback, Line};
pub use reset::{is_reset_pending, reset_grace_remaining, reset_time};

pub(crate) use lines::dispatch;

/// Nesting depth of disable(); -1 until init().
static DEPTH: AtomicI32 = AtomicI32::new(-1);

/// Status captured by the outermost disable().
static SAVED_SR: AtomicU32 = AtomicU32::new(0);

/// Result of [`state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptState {
    Uninitialized,
    Disabled,
    Enabled,
}

/// Bring the interrupt controller up: mask every RCP source and enable
/// the RCP and pre-NMI lines. Idempotent.
pub fn init() {
    if DEPTH.load(Ordering::Relaxed) >= 0 {
        return;
    }
    arch::install_traps();
    let cpu = arch::cpu();
    cpu.mi_set_mask(MiLines::all(), false);
    DEPTH.store(0, Ordering::Relaxed);
    cpu.set_status(cpu.status() | Status::IE | Status::IM_RCP | Status::IM_PRENMI);
    klog::debug!("irq: initialized, status={:#010x}", cpu.status().bits());
}

/// Mask interrupts. Nestable.
pub fn disable() {
    let depth = DEPTH.load(Ordering::Relaxed);
    if depth < 0 {
        return;
    }
    if depth == 0 {
        let cpu = arch::cpu();
        let sr = cpu.status();
        cpu.set_status(sr - Status::IE);
        SAVED_SR.store(sr.bits(), Ordering::Relaxed);
    }
    DEPTH.store(depth + 1, Ordering::Relaxed);
}

/// Undo one [`disable`]. The outermost call restores the IE bit that was
/// in effect before the first disable.
pub fn enable() {
    let depth = DEPTH.load(Ordering::Relaxed);
    if depth < 0 {
        return;
    }
    kassert!(depth > 0, "unbalanced enable_interrupts() call");
    DEPTH.store(depth - 1, Ordering::Relaxed);
    if depth == 1 {
        let cpu = arch::cpu();
        let saved = Status::from_bits_retain(SAVED_SR.load(Ordering::Relaxed));
        cpu.set_status(cpu.status() | (saved & Status::IE));
        arch::poll_pending();
    }
}

pub fn state() -> InterruptState {
    match DEPTH.load(Ordering::Relaxed) {
        d if d < 0 => InterruptState::Uninitialized,
        0 => InterruptState::Enabled,
        _ => InterruptState::Disabled,
    }
}

/// Mask interrupts until the returned guard is dropped.
pub fn disabled() -> InterruptGuard {
    disable();
    InterruptGuard {
        _not_send: PhantomData,
    }
}

/// Critical section; see [`disabled`].
#[must_use = "interrupts are re-enabled as soon as the guard is dropped"]
pub struct InterruptGuard {
    _not_send: PhantomData<*const ()>,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if !arch::unwinding() {
            enable();
        }
    }
}

/// Running inside an exception or interrupt handler.
pub fn in_interrupt() -> bool {
    arch::cpu().status().contains(Status::EXL)
}

// ── Per-thread masking state ────────────────────────────────────

pub(crate) fn depth() -> i32 {
    DEPTH.load(Ordering::Relaxed)
}

pub(crate) fn saved_sr() -> u32 {
    SAVED_SR.load(Ordering::Relaxed)
}

/// Install the masking state of the thread being resumed.
pub(crate) fn restore(depth: i32, sr: u32) {
    DEPTH.store(depth, Ordering::Relaxed);
    SAVED_SR.store(sr, Ordering::Relaxed);
}

#[cfg(feature = "hosted")]
pub(crate) fn reset() {
    DEPTH.store(-1, Ordering::Relaxed);
    SAVED_SR.store(0, Ordering::Relaxed);
    lines::reset();
    reset::reset();
}

#[cfg(all(test, feature = "hosted"))]
mod tests {
    use super::*;
    use crate::arch::hosted::TestMachine;

    #[test]
    fn uninitialized_calls_are_ignored() {
        let _m = TestMachine::new();
        assert_eq!(state(), InterruptState::Uninitialized);
        disable();
        enable();
        enable();
        assert_eq!(state(), InterruptState::Uninitialized);
    }

    #[test]
    fn nesting_restores_on_last_enable() {
        let _m = TestMachine::new();
        init();
        disable();
        disable();
        assert_eq!(state(), InterruptState::Disabled);
        assert!(!arch::cpu().status().contains(Status::IE));
        enable();
        assert_eq!(state(), InterruptState::Disabled);
        assert!(!arch::cpu().status().contains(Status::IE));
        enable();
        assert_eq!(state(), InterruptState::Enabled);
        assert!(arch::cpu().status().contains(Status::IE));
    }

    #[test]
    fn enable_restores_captured_bit_not_blindly() {
        let _m = TestMachine::new();
        init();
        let cpu = arch::cpu();
        cpu.set_status(cpu.status() - Status::IE);
        disable();
        enable();
        assert!(!cpu.status().contains(Status::IE));
    }

    #[test]
    #[should_panic(expected = "unbalanced enable_interrupts() call")]
    fn unbalanced_enable_is_fatal() {
        let _m = TestMachine::new();
        init();
        enable();
    }

    #[test]
    fn guard_reenables_on_drop() {
        let _m = TestMachine::new();
        init();
        {
            let _cs = disabled();
            assert_eq!(state(), InterruptState::Disabled);
        }
        assert_eq!(state(), InterruptState::Enabled);
    }
}
