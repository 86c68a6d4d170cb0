//! Kernel logging subsystem.
//!
//! Messages are formatted lazily through `fmt::Arguments` and handed to a
//! single sink. On hardware the default sink is the IS-Viewer debug port
//! exposed by `khal`; hosted builds install their own sink (stderr) with
//! [`set_sink`]. The [`bridge`] module forwards records from the `log`
//! facade so driver crates end up in the same place.
#![cfg_attr(not(test), no_std)]

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};
use spin::RwLock;

pub mod bridge;

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => " INFO",
            Level::Warn => " WARN",
            Level::Error => "ERROR",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Level::Trace => "\x1b[90m", // Gray
            Level::Debug => "\x1b[36m", // Cyan
            Level::Info => "\x1b[32m",  // Green
            Level::Warn => "\x1b[33m",  // Yellow
            Level::Error => "\x1b[31m", // Red
        }
    }

    fn from_u8(raw: u8) -> Level {
        match raw {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            _ => Level::Error,
        }
    }
}

/// A log sink receives every message that passes the level filter.
pub type Sink = fn(Level, fmt::Arguments);

static MAX_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static SINK: RwLock<Sink> = RwLock::new(debug_port_sink);

/// Default sink: colored line on the debug port.
fn debug_port_sink(level: Level, args: fmt::Arguments) {
    khal::debug::write_str(level.color());
    khal::debug::write_str("[");
    khal::debug::write_str(level.as_str());
    khal::debug::write_str("]\x1b[0m ");
    khal::debug::write_fmt(args);
    khal::debug::write_str("\n");
}

/// Initialize the kernel logger (sets up the debug port)
pub fn init() {
    khal::debug::init();
}

/// Replace the sink, returning the previous one.
pub fn set_sink(sink: Sink) -> Sink {
    core::mem::replace(&mut *SINK.write(), sink)
}

/// Messages below `level` are discarded before formatting.
pub fn set_max_level(level: Level) {
    MAX_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn max_level() -> Level {
    Level::from_u8(MAX_LEVEL.load(Ordering::Relaxed))
}

#[inline]
pub fn enabled(level: Level) -> bool {
    level as u8 >= MAX_LEVEL.load(Ordering::Relaxed)
}

/// Log a message with a specific level
pub fn log(level: Level, args: fmt::Arguments) {
    if !enabled(level) {
        return;
    }
    let sink = *SINK.read();
    sink(level, args);
}

/// Print to the debug port without formatting
pub fn print(args: fmt::Arguments) {
    khal::debug::write_fmt(args);
}

/// Log at TRACE level
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::log($crate::Level::Trace, format_args!($($arg)*))
    };
}

/// Log at DEBUG level
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::log($crate::Level::Debug, format_args!($($arg)*))
    };
}

/// Log at INFO level
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log($crate::Level::Info, format_args!($($arg)*))
    };
}

/// Log at WARN level
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::log($crate::Level::Warn, format_args!($($arg)*))
    };
}

/// Log at ERROR level
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log($crate::Level::Error, format_args!($($arg)*))
    };
}

/// Print without newline
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::print(format_args!($($arg)*))
    };
}

/// Print with newline
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => {{
        $crate::print(format_args!($($arg)*));
        $crate::print(format_args!("\n"));
    }};
}
