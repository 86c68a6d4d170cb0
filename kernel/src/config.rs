//! Kernel tunables.
//!
//! Limits that size static tables are compile-time constants. Values that
//! depend on the program being run (stack sizes, the TLS image) live in
//! [`KernelConfig`] and are passed to [`crate::init_with`].

/// Bytes reserved at the bottom of every thread stack and filled with
/// [`STACK_COOKIE`].
pub const STACK_GUARD: usize = 64;

/// Pattern written over the stack guard region.
pub const STACK_COOKIE: u64 = 0xDEAD_BEEF_BAAD_C0DE;

/// Priority of the idle thread. No other thread may use it.
pub const PRIORITY_IDLE: i8 = i8::MIN;

/// Registered syscall ranges.
pub const MAX_SYSCALL_HANDLERS: usize = 4;

/// Callbacks on the reset (pre-NMI) line.
pub const MAX_RESET_HANDLERS: usize = 4;

/// Callbacks on every other interrupt line.
pub const MAX_LINE_CALLBACKS: usize = 8;

/// Mailboxes one event can fan out to.
pub const MAX_EVENT_MAILBOXES: usize = 8;

/// Consecutive unacknowledged cartridge interrupts tolerated before the
/// kernel declares the bus wedged.
pub const CART_DEADLOCK_THRESHOLD: u32 = 128;

/// Faulting addresses below this are reported as NULL pointer accesses.
pub const NULL_POINTER_LIMIT: u64 = 128;

/// Distance between the thread pointer and the start of the TLS block.
pub const TP_OFFSET: u32 = 0x7000;

/// Thread pointer installed while no thread context is active (interrupt
/// handlers, or before `init`). Any TLS access then lands in a window that
/// the exception diagnosis recognizes.
pub const TP_INVALID: u32 = 0x1000_7000;

/// COP0 COUNT rate.
pub const TICKS_PER_SECOND: u64 = khal::TICKS_PER_SECOND;

/// The hardware keeps running for at least this long after the reset
/// button is pressed.
pub const RESET_GRACE_TICKS: u64 = TICKS_PER_SECOND / 2;

/// Runtime configuration for [`crate::init_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Size of the boot stack inherited by the main thread.
    pub main_stack_size: usize,
    /// Stack of the idle thread.
    pub idle_stack_size: usize,
    /// Size of the per-thread TLS image.
    pub tls_size: u32,
}

impl KernelConfig {
    pub const fn new() -> Self {
        Self {
            main_stack_size: 0x10000,
            idle_stack_size: 4096,
            tls_size: 0x100,
        }
    }

    /// First address of the window hit by TLS accesses without a thread.
    pub const fn tls_invalid_min(&self) -> u32 {
        TP_INVALID - TP_OFFSET
    }

    /// `addr` falls inside the invalid TLS window.
    pub fn in_tls_window(&self, addr: u64) -> bool {
        let min = self.tls_invalid_min() as u64;
        addr >= min && addr < min + self.tls_size as u64
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_window_bounds() {
        let cfg = KernelConfig::new();
        let min = cfg.tls_invalid_min() as u64;
        assert!(!cfg.in_tls_window(min - 1));
        assert!(cfg.in_tls_window(min));
        assert!(cfg.in_tls_window(min + cfg.tls_size as u64 - 1));
        assert!(!cfg.in_tls_window(min + cfg.tls_size as u64));
    }

    #[test]
    fn idle_priority_is_the_floor() {
        assert_eq!(PRIORITY_IDLE, i8::MIN);
        assert!(STACK_GUARD % 8 == 0);
    }
}
