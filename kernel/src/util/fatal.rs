//! Fatal programmer errors.
//!
//! Contract violations (unbalanced interrupt enables, double joins, stack
//! overflows, ...) are never reported as error values. They are logged at
//! error level and then the kernel panics; on hardware that ends in the
//! panic handler, hosted it unwinds into whoever is watching.

use core::fmt;

#[cold]
#[inline(never)]
#[track_caller]
pub fn fail(args: fmt::Arguments) -> ! {
    klog::error!("{}", args);
    panic!("{}", args)
}

/// Abort with a diagnostic unless `cond` holds.
#[macro_export]
macro_rules! kassert {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::util::fatal::fail(format_args!($($arg)+))
        }
    };
}

/// Abort with a diagnostic.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {
        $crate::util::fatal::fail(format_args!($($arg)+))
    };
}
