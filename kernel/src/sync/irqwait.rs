//! Waiting for RCP interrupts from threads.
//!
//! Each RCP line has a condition variable broadcast by the interrupt
//! controller and a counter of occurrences. A driver that remembers the
//! counter value it last saw can never miss an interrupt: if one fired in
//! the meantime, [`wait_since`] returns immediately.
//!
//! ```ignore
//! let seen = irqwait::count(Line::Vi);
//! start_vblank_dependent_work();
//! irqwait::wait_since(Line::Vi, seen);
//! ```

use core::sync::atomic::{AtomicU64, Ordering};

use crate::irq::{self, Line};
use crate::task;

use super::Condvar;

const RCP_LINES: usize = Line::MI.len();

static CONDS: [Condvar; RCP_LINES] = [
    Condvar::new(),
    Condvar::new(),
    Condvar::new(),
    Condvar::new(),
    Condvar::new(),
    Condvar::new(),
];

static COUNTS: [AtomicU64; RCP_LINES] = [
    AtomicU64::new(0),
    AtomicU64::new(0),
    AtomicU64::new(0),
    AtomicU64::new(0),
    AtomicU64::new(0),
    AtomicU64::new(0),
];

fn slot(line: Line) -> usize {
    kassert!(
        line.mi_bit().is_some(),
        "interrupt waits are only available for RCP lines (got {:?})",
        line
    );
    line.index()
}

/// Occurrences of `line` since the kernel started counting.
pub fn count(line: Line) -> u64 {
    COUNTS[slot(line)].load(Ordering::Relaxed)
}

/// Block until `line` fires again.
pub fn wait(line: Line) {
    wait_since(line, count(line));
}

/// Block until `line` has fired more than `seen` times in total, and return
/// the new total. Returns at once if that already happened, or if the
/// kernel is not running.
pub fn wait_since(line: Line, seen: u64) -> u64 {
    let i = slot(line);
    if !task::is_running() {
        return COUNTS[i].load(Ordering::Relaxed);
    }
    let _cs = irq::disabled();
    loop {
        let now = COUNTS[i].load(Ordering::Relaxed);
        if now > seen {
            return now;
        }
        CONDS[i].wait_raw(None);
    }
}

/// Called by the interrupt controller every time an RCP line fires.
pub(crate) fn notify(line: Line) {
    let i = slot(line);
    COUNTS[i].fetch_add(1, Ordering::Relaxed);
    CONDS[i].broadcast_isr();
}

#[cfg(feature = "hosted")]
pub(crate) fn reset() {
    for count in &COUNTS {
        count.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rcp_lines_map_to_their_own_slot() {
        for (i, line) in Line::MI.iter().enumerate() {
            assert_eq!(line.index(), i);
        }
    }
}
