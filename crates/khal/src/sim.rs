//! Simulated VR4300 + MI for hosted builds.
//!
//! Time is virtual: COUNT only moves when [`SimCpu::advance`] or
//! [`SimCpu::set_ticks`] is called, which keeps scheduling tests
//! deterministic. Interrupt sources are latched by the `raise_*` methods and
//! reported through [`SimCpu::pending_ip`] exactly like Cause.IP would.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::cop0::{Cause, Status};
use crate::cpu::Cpu;
use crate::mi::MiLines;

const DISARMED: u64 = u64::MAX;

pub struct SimCpu {
    status: AtomicU32,
    badvaddr: AtomicU64,
    ticks: AtomicU64,
    compare: AtomicU64,
    mi_raised: AtomicU32,
    mi_mask: AtomicU32,
    cart: AtomicBool,
    prenmi: AtomicBool,
}

impl SimCpu {
    pub const fn new() -> Self {
        Self {
            status: AtomicU32::new(0),
            badvaddr: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            compare: AtomicU64::new(DISARMED),
            mi_raised: AtomicU32::new(0),
            mi_mask: AtomicU32::new(0),
            cart: AtomicBool::new(false),
            prenmi: AtomicBool::new(false),
        }
    }

    /// Back to power-on state: interrupts off, nothing pending, time zero.
    pub fn reset(&self) {
        self.status.store(0, Ordering::SeqCst);
        self.badvaddr.store(0, Ordering::SeqCst);
        self.ticks.store(0, Ordering::SeqCst);
        self.compare.store(DISARMED, Ordering::SeqCst);
        self.mi_raised.store(0, Ordering::SeqCst);
        self.mi_mask.store(0, Ordering::SeqCst);
        self.cart.store(false, Ordering::SeqCst);
        self.prenmi.store(false, Ordering::SeqCst);
    }

    pub fn raise_mi(&self, lines: MiLines) {
        self.mi_raised.fetch_or(lines.bits(), Ordering::SeqCst);
    }

    pub fn raise_cart(&self) {
        self.cart.store(true, Ordering::SeqCst);
    }

    /// Cartridge interrupts are level-triggered; the device driver lowers them.
    pub fn lower_cart(&self) {
        self.cart.store(false, Ordering::SeqCst);
    }

    pub fn raise_prenmi(&self) {
        self.prenmi.store(true, Ordering::SeqCst);
    }

    pub fn set_badvaddr(&self, addr: u64) {
        self.badvaddr.store(addr, Ordering::SeqCst);
    }

    pub fn advance(&self, ticks: u64) {
        self.ticks.fetch_add(ticks, Ordering::SeqCst);
    }

    pub fn set_ticks(&self, ticks: u64) {
        self.ticks.store(ticks, Ordering::SeqCst);
    }

    /// Currently programmed timer deadline.
    pub fn compare(&self) -> Option<u64> {
        match self.compare.load(Ordering::SeqCst) {
            DISARMED => None,
            deadline => Some(deadline),
        }
    }

    /// Cause.IP bits as hardware would report them right now.
    pub fn pending_ip(&self) -> u32 {
        let mut ip = 0;
        if self.mi_raised.load(Ordering::SeqCst) & self.mi_mask.load(Ordering::SeqCst) != 0 {
            ip |= Cause::IP_RCP;
        }
        if self.cart.load(Ordering::SeqCst) {
            ip |= Cause::IP_CART;
        }
        if self.prenmi.load(Ordering::SeqCst) {
            ip |= Cause::IP_PRENMI;
        }
        if self.ticks.load(Ordering::SeqCst) >= self.compare.load(Ordering::SeqCst) {
            ip |= Cause::IP_TIMER;
        }
        ip
    }

    /// Pending bits for a trap being taken now. The pre-NMI line behaves as
    /// an edge: taking it clears the latch.
    pub fn latch_cause(&self) -> u32 {
        let ip = self.pending_ip();
        self.prenmi.store(false, Ordering::SeqCst);
        ip
    }

    /// An interrupt would be taken if execution continued.
    pub fn interrupt_ready(&self) -> bool {
        let status = self.status();
        status.interrupts_deliverable() && self.pending_ip() & status.bits() & Status::IM_ALL != 0
    }
}

impl Default for SimCpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu for SimCpu {
    fn status(&self) -> Status {
        Status::from_bits_retain(self.status.load(Ordering::SeqCst))
    }

    fn set_status(&self, status: Status) {
        self.status.store(status.bits(), Ordering::SeqCst);
    }

    fn cause(&self) -> u32 {
        self.pending_ip()
    }

    fn badvaddr(&self) -> u64 {
        self.badvaddr.load(Ordering::SeqCst)
    }

    fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn set_compare(&self, deadline: u64) {
        self.compare.store(deadline, Ordering::SeqCst);
    }

    fn disarm_compare(&self) {
        self.compare.store(DISARMED, Ordering::SeqCst);
    }

    fn mi_pending(&self) -> MiLines {
        let raised = self.mi_raised.load(Ordering::SeqCst);
        MiLines::from_bits_truncate(raised & self.mi_mask.load(Ordering::SeqCst))
    }

    fn mi_ack(&self, lines: MiLines) {
        self.mi_raised.fetch_and(!lines.bits(), Ordering::SeqCst);
    }

    fn mi_set_mask(&self, lines: MiLines, enable: bool) {
        if enable {
            self.mi_mask.fetch_or(lines.bits(), Ordering::SeqCst);
        } else {
            self.mi_mask.fetch_and(!lines.bits(), Ordering::SeqCst);
        }
    }

    fn mi_mask(&self) -> MiLines {
        MiLines::from_bits_truncate(self.mi_mask.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_mi_sources_do_not_raise_ip2() {
        let cpu = SimCpu::new();
        cpu.raise_mi(MiLines::VI);
        assert_eq!(cpu.pending_ip() & Cause::IP_RCP, 0);
        cpu.mi_set_mask(MiLines::VI, true);
        assert_eq!(cpu.pending_ip() & Cause::IP_RCP, Cause::IP_RCP);
        cpu.mi_ack(MiLines::VI);
        assert_eq!(cpu.pending_ip(), 0);
    }

    #[test]
    fn timer_fires_once_count_reaches_compare() {
        let cpu = SimCpu::new();
        cpu.set_compare(100);
        cpu.advance(99);
        assert_eq!(cpu.pending_ip() & Cause::IP_TIMER, 0);
        cpu.advance(1);
        assert_ne!(cpu.pending_ip() & Cause::IP_TIMER, 0);
        cpu.set_compare(200);
        assert_eq!(cpu.pending_ip() & Cause::IP_TIMER, 0);
    }

    #[test]
    fn prenmi_is_consumed_by_latch() {
        let cpu = SimCpu::new();
        cpu.raise_prenmi();
        assert_eq!(cpu.latch_cause(), Cause::IP_PRENMI);
        assert_eq!(cpu.pending_ip(), 0);
    }

    #[test]
    fn delivery_requires_ie_and_mask() {
        let cpu = SimCpu::new();
        cpu.raise_cart();
        cpu.set_status(Status::IE);
        assert!(!cpu.interrupt_ready());
        cpu.set_status(Status::IE | Status::IM_CART);
        assert!(cpu.interrupt_ready());
        cpu.set_status(Status::IE | Status::IM_CART | Status::EXL);
        assert!(!cpu.interrupt_ready());
    }
}
