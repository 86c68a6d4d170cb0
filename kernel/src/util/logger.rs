//! Platform wiring for the klog sink.
//!
//! On hardware klog already writes to the IS-Viewer port; all we do is probe
//! it. Hosted builds redirect the sink to stderr so test output shows kernel
//! diagnostics next to the failing assertion. Either way the `log` facade is
//! routed into klog.

#[cfg(feature = "hosted")]
use core::fmt;

#[cfg(feature = "hosted")]
fn stderr_sink(level: klog::Level, args: fmt::Arguments) {
    use std::io::Write;
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "[{}] {}", level.as_str(), args);
}

pub fn init() {
    #[cfg(feature = "hosted")]
    {
        klog::set_sink(stderr_sink);
        // Test binaries construct many kernels; keep the chatter down.
        klog::set_max_level(klog::Level::Warn);
    }
    #[cfg(not(feature = "hosted"))]
    klog::init();
    // Drivers log through the `log` facade. A second init finds the bridge
    // already installed.
    let _ = klog::bridge::install();
}
