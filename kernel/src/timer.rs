// =============================================================================
// n64-kernel — Deadline Timers
// =============================================================================
//
// A flat list of deadlines multiplexed onto the single COUNT/COMPARE
// interrupt. COMPARE is always programmed with the earliest deadline, or
// disarmed when the list is empty.
//
// Callbacks run in interrupt context, outside the queue lock, so they may
// start or stop timers (including their own).
//
// =============================================================================

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use khal::Cpu;

use crate::arch;
use crate::config::TICKS_PER_SECOND;
use crate::irq::{self, Line};
use crate::sync::IrqSpinLock;

/// Whether a timer re-arms itself after firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    OneShot,
    Periodic,
}

/// Handle returned by [`start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

type Callback = Box<dyn FnMut() + Send>;

struct Timer {
    id: TimerId,
    deadline: u64,
    period: Option<u64>,
    callback: Callback,
}

struct TimerQueue {
    timers: Vec<Timer>,
    /// Timer whose callback is executing, and whether it was stopped meanwhile.
    firing: Option<(TimerId, bool)>,
}

static QUEUE: IrqSpinLock<TimerQueue> = IrqSpinLock::new(TimerQueue {
    timers: Vec::new(),
    firing: None,
});

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub const fn ticks_from_ms(ms: u64) -> u64 {
    ms * (TICKS_PER_SECOND / 1000)
}

pub const fn ticks_from_us(us: u64) -> u64 {
    us * TICKS_PER_SECOND / 1_000_000
}

pub const fn ms_from_ticks(ticks: u64) -> u64 {
    ticks / (TICKS_PER_SECOND / 1000)
}

/// Current COUNT value, extended to 64 bits.
pub fn ticks() -> u64 {
    arch::cpu().ticks()
}

/// Enable the timer interrupt. Idempotent.
pub fn init() {
    irq::set_enabled(Line::Timer, true);
}

/// Run `callback` once `ticks` have elapsed, and then every `ticks` again if
/// `mode` is [`TimerMode::Periodic`].
pub fn start<F>(ticks: u64, mode: TimerMode, callback: F) -> TimerId
where
    F: FnMut() + Send + 'static,
{
    kassert!(
        ticks > 0 || mode == TimerMode::OneShot,
        "periodic timer with a zero period"
    );
    let id = TimerId(NEXT_ID.fetch_add(1, Ordering::Relaxed));
    let mut queue = QUEUE.lock();
    queue.timers.push(Timer {
        id,
        deadline: self::ticks().saturating_add(ticks),
        period: (mode == TimerMode::Periodic).then_some(ticks),
        callback: Box::new(callback),
    });
    queue.rearm();
    id
}

/// Cancel a timer. Returns false if it already fired (one-shot) or was
/// never started.
pub fn stop(id: TimerId) -> bool {
    let mut queue = QUEUE.lock();
    if let Some((firing, cancelled)) = queue.firing.as_mut() {
        if *firing == id {
            let was_live = !*cancelled;
            *cancelled = true;
            return was_live;
        }
    }
    let Some(pos) = queue.timers.iter().position(|t| t.id == id) else {
        return false;
    };
    queue.timers.remove(pos);
    queue.rearm();
    true
}

/// Earliest pending deadline.
pub fn next_deadline() -> Option<u64> {
    QUEUE.lock().next_deadline()
}

/// Number of armed timers.
pub fn pending() -> usize {
    QUEUE.lock().timers.len()
}

impl TimerQueue {
    fn next_deadline(&self) -> Option<u64> {
        self.timers.iter().map(|t| t.deadline).min()
    }

    fn rearm(&self) {
        let cpu = arch::cpu();
        match self.next_deadline() {
            Some(deadline) => cpu.set_compare(deadline),
            None => cpu.disarm_compare(),
        }
    }

    /// Remove and return the earliest timer due at `now`.
    fn take_due(&mut self, now: u64) -> Option<Timer> {
        let pos = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.deadline <= now)
            .min_by_key(|(_, t)| t.deadline)
            .map(|(pos, _)| pos)?;
        Some(self.timers.remove(pos))
    }
}

/// Run every expired timer. Called from the timer interrupt.
pub(crate) fn dispatch() {
    loop {
        let now = ticks();
        let Some(mut timer) = ({
            let mut queue = QUEUE.lock();
            let due = queue.take_due(now);
            if let Some(timer) = &due {
                queue.firing = Some((timer.id, false));
            }
            due
        }) else {
            break;
        };

        (timer.callback)();

        let mut queue = QUEUE.lock();
        let cancelled = matches!(queue.firing.take(), Some((_, true)));
        if let (Some(period), false) = (timer.period, cancelled) {
            timer.deadline = timer.deadline.saturating_add(period).max(now + 1);
            queue.timers.push(timer);
        }
    }
    QUEUE.lock().rearm();
}

#[cfg(feature = "hosted")]
pub(crate) fn reset() {
    let mut queue = QUEUE.lock();
    queue.timers.clear();
    queue.firing = None;
}
