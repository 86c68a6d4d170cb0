//! Interrupt lines and their callback chains.

use core::sync::atomic::{AtomicU32, Ordering};

use khal::{Cause, Cpu, MiLines, Status};

use crate::arch;
use crate::config::{CART_DEADLOCK_THRESHOLD, MAX_LINE_CALLBACKS, MAX_RESET_HANDLERS};
use crate::sync::Event;
use crate::sync::IrqSpinLock;

/// A physical interrupt source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Line {
    /// Signal processor (RSP) halted or signalled.
    Sp,
    /// Serial interface (joybus DMA) complete.
    Si,
    /// Audio interface buffer consumed.
    Ai,
    /// Video interface reached the programmed scanline.
    Vi,
    /// Peripheral interface (cartridge DMA) complete.
    Pi,
    /// Display processor (RDP) full sync.
    Dp,
    /// COP0 COUNT reached COMPARE.
    Timer,
    /// Cartridge-generated interrupt.
    Cart,
    /// Reset button pressed; the console will hard reset shortly.
    Reset,
}

impl Line {
    pub const ALL: [Line; 9] = [
        Line::Sp,
        Line::Si,
        Line::Ai,
        Line::Vi,
        Line::Pi,
        Line::Dp,
        Line::Timer,
        Line::Cart,
        Line::Reset,
    ];

    /// The RCP sources multiplexed through the MI, in service order.
    pub const MI: [Line; 6] = [Line::Sp, Line::Si, Line::Ai, Line::Vi, Line::Pi, Line::Dp];

    pub(crate) const fn index(self) -> usize {
        self as usize
    }

    /// MI bit for RCP sources.
    pub fn mi_bit(self) -> Option<MiLines> {
        match self {
            Line::Sp => Some(MiLines::SP),
            Line::Si => Some(MiLines::SI),
            Line::Ai => Some(MiLines::AI),
            Line::Vi => Some(MiLines::VI),
            Line::Pi => Some(MiLines::PI),
            Line::Dp => Some(MiLines::DP),
            _ => None,
        }
    }

    fn status_mask(self) -> Status {
        match self {
            Line::Timer => Status::IM_TIMER,
            Line::Cart => Status::IM_CART,
            Line::Reset => Status::IM_PRENMI,
            _ => Status::IM_RCP,
        }
    }

    fn capacity(self) -> usize {
        match self {
            Line::Reset => MAX_RESET_HANDLERS,
            _ => MAX_LINE_CALLBACKS,
        }
    }
}

/// Interrupt callback. Runs in interrupt context with interrupts masked.
pub type Callback = fn();

#[derive(Clone, Copy)]
struct Chain {
    slots: [Option<Callback>; MAX_LINE_CALLBACKS],
    len: usize,
}

impl Chain {
    const EMPTY: Chain = Chain {
        slots: [None; MAX_LINE_CALLBACKS],
        len: 0,
    };

    fn remove(&mut self, callback: Callback) -> bool {
        let Some(pos) = self.slots[..self.len]
            .iter()
            .position(|slot| slot.is_some_and(|cb| same(cb, callback)))
        else {
            return false;
        };
        self.slots.copy_within(pos + 1..self.len, pos);
        self.len -= 1;
        self.slots[self.len] = None;
        true
    }
}

fn same(a: Callback, b: Callback) -> bool {
    a as usize == b as usize
}

static CHAINS: IrqSpinLock<[Chain; 9]> = IrqSpinLock::new([Chain::EMPTY; 9]);

static EVENTS: [Event<Line>; 9] = [
    Event::new(Line::Sp),
    Event::new(Line::Si),
    Event::new(Line::Ai),
    Event::new(Line::Vi),
    Event::new(Line::Pi),
    Event::new(Line::Dp),
    Event::new(Line::Timer),
    Event::new(Line::Cart),
    Event::new(Line::Reset),
];

/// Consecutive CART interrupts that left the line asserted.
static CART_RETRIGGERS: AtomicU32 = AtomicU32::new(0);

/// Append `callback` to the chain of `line`.
pub fn register(line: Line, callback: Callback) {
    let mut chains = CHAINS.lock();
    let chain = &mut chains[line.index()];
    if chain.len == line.capacity() {
        drop(chains);
        match line {
            Line::Reset => fatal!("Too many pre-NMI handlers"),
            _ => fatal!("Too many {:?} interrupt handlers", line),
        }
    }
    chain.slots[chain.len] = Some(callback);
    chain.len += 1;
    klog::debug!("irq: registered {:?} handler {:#x}", line, callback as usize);
}

/// Remove the first registration of `callback` from `line`.
///
/// Removing a callback that is not registered is ignored, except on the
/// reset line where it is a fatal error.
pub fn unregister(line: Line, callback: Callback) {
    let removed = CHAINS.lock()[line.index()].remove(callback);
    if !removed && line == Line::Reset {
        fatal!("Reset handler not found");
    }
}

/// Unmask or mask `line`.
pub fn set_enabled(line: Line, active: bool) {
    let _cs = super::disabled();
    let cpu = arch::cpu();
    match line.mi_bit() {
        Some(bit) => cpu.mi_set_mask(bit, active),
        None => {
            let status = cpu.status();
            let mask = line.status_mask();
            cpu.set_status(if active { status | mask } else { status - mask });
        }
    }
}

pub fn is_enabled(line: Line) -> bool {
    let cpu = arch::cpu();
    match line.mi_bit() {
        Some(bit) => cpu.mi_mask().contains(bit),
        None => cpu.status().contains(line.status_mask()),
    }
}

/// Kernel event triggered every time `line` fires while the scheduler runs.
pub fn event(line: Line) -> &'static Event<Line> {
    &EVENTS[line.index()]
}

pub(super) fn run(line: Line) {
    let chain = CHAINS.lock()[line.index()];
    for callback in chain.slots[..chain.len].iter().flatten() {
        callback();
    }
}

/// Wake the kernel-side waiters of `line`.
pub(super) fn notify(line: Line) {
    if crate::task::is_running() {
        if line != Line::Reset && line != Line::Timer && line != Line::Cart {
            crate::sync::irqwait::notify(line);
        }
        EVENTS[line.index()].trigger_isr();
    }
}

/// Service every pending, unmasked source in `cause`.
pub(crate) fn dispatch(cause: u32) {
    let cpu = arch::cpu();
    let pending = cause & cpu.status().bits() & Status::IM_ALL;

    if pending & Cause::IP_PRENMI != 0 {
        super::reset::handle();
    }
    if pending & Cause::IP_RCP != 0 {
        service_mi(cpu);
    }
    if pending & Cause::IP_TIMER != 0 {
        crate::timer::dispatch();
        notify(Line::Timer);
        run(Line::Timer);
    }
    if pending & Cause::IP_CART != 0 {
        service_cart(cpu);
    }
}

fn service_mi(cpu: &impl Cpu) {
    let status = cpu.mi_pending();
    for line in Line::MI {
        let Some(bit) = line.mi_bit() else { continue };
        if status.contains(bit) {
            cpu.mi_ack(bit);
            notify(line);
            run(line);
        }
    }
}

/// Cartridge interrupts must be acknowledged by their handlers. A line that
/// stays asserted would re-trigger forever and starve everything else.
fn service_cart(cpu: &impl Cpu) {
    notify(Line::Cart);
    run(Line::Cart);

    if cpu.cause() & Cause::IP_CART == 0 {
        CART_RETRIGGERS.store(0, Ordering::Relaxed);
    } else {
        let count = CART_RETRIGGERS.fetch_add(1, Ordering::Relaxed) + 1;
        kassert!(
            count < CART_DEADLOCK_THRESHOLD,
            "CART interrupt deadlock: a CART interrupt is continuously triggering, with no ack"
        );
    }
}

#[cfg(feature = "hosted")]
pub(super) fn reset() {
    *CHAINS.lock() = [Chain::EMPTY; 9];
    CART_RETRIGGERS.store(0, Ordering::Relaxed);
    for event in &EVENTS {
        event.detach_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a() {}
    fn b() {}
    fn c() {}

    #[test]
    fn chain_removal_keeps_order() {
        let mut chain = Chain::EMPTY;
        for cb in [a as Callback, b, c] {
            chain.slots[chain.len] = Some(cb);
            chain.len += 1;
        }
        assert!(chain.remove(b));
        assert_eq!(chain.len, 2);
        assert!(same(chain.slots[0].unwrap(), a));
        assert!(same(chain.slots[1].unwrap(), c));
        assert!(!chain.remove(b));
    }

    #[test]
    fn only_rcp_sources_have_mi_bits() {
        assert_eq!(Line::MI.iter().filter(|l| l.mi_bit().is_some()).count(), 6);
        assert!(Line::Timer.mi_bit().is_none());
        assert!(Line::Reset.mi_bit().is_none());
    }
}
