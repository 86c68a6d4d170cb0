// =============================================================================
// n64-kernel — Kernel Utilities
// =============================================================================
//
//   fatal.rs  — kassert!/fatal!: log the diagnostic, then panic
//   logger.rs — wires the klog sink for the current platform
//   panic.rs  — bare-metal panic handler (feature `panic-handler`)
// =============================================================================

#[macro_use]
pub mod fatal;
pub mod logger;
#[cfg(all(target_os = "none", feature = "panic-handler"))]
pub mod panic;
