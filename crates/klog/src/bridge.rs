//! Adapter from the `log` facade into klog.

use crate::Level;

struct Bridge;

static BRIDGE: Bridge = Bridge;

impl From<log::Level> for Level {
    fn from(level: log::Level) -> Level {
        match level {
            log::Level::Trace => Level::Trace,
            log::Level::Debug => Level::Debug,
            log::Level::Info => Level::Info,
            log::Level::Warn => Level::Warn,
            log::Level::Error => Level::Error,
        }
    }
}

impl log::Log for Bridge {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        crate::enabled(metadata.level().into())
    }

    fn log(&self, record: &log::Record) {
        let level = record.level().into();
        if crate::enabled(level) {
            crate::log(level, format_args!("{}: {}", record.target(), record.args()));
        }
    }

    fn flush(&self) {}
}

/// Route `log::info!` and friends into the klog sink.
///
/// Fails if another logger was already installed for this process.
pub fn install() -> Result<(), log::SetLoggerError> {
    log::set_logger(&BRIDGE)?;
    log::set_max_level(log::LevelFilter::Trace);
    Ok(())
}
