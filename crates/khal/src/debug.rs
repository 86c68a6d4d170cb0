//! IS-Viewer 64 debug port.
//!
//! Development cartridges and emulators expose a text buffer in cartridge
//! space. Text is copied into the buffer one 32-bit word at a time and then
//! flushed by writing its length. On targets without the device every write
//! is dropped.

use core::fmt;
use spin::Mutex;

#[cfg(target_arch = "mips")]
use crate::mmio::{read32, write32};

#[cfg(target_arch = "mips")]
const ISV_BASE: usize = 0xB3FF_0000;
#[cfg(target_arch = "mips")]
const ISV_MAGIC: u32 = 0x4953_3634; // "IS64"
#[cfg(target_arch = "mips")]
const ISV_WRITE_LEN: usize = ISV_BASE + 0x14;
#[cfg(target_arch = "mips")]
const ISV_BUFFER: usize = ISV_BASE + 0x20;
const ISV_BUFFER_LEN: usize = 0x200;

pub struct DebugPort {
    present: bool,
}

impl DebugPort {
    const fn new() -> Self {
        Self { present: false }
    }

    /// Probe for the device by writing and reading back the magic word.
    pub fn init(&mut self) {
        #[cfg(target_arch = "mips")]
        {
            // SAFETY: cartridge domain 1 address space; reads of unmapped
            // cartridge addresses return open-bus values, never fault.
            unsafe {
                write32(ISV_BASE, ISV_MAGIC);
                self.present = read32(ISV_BASE) == ISV_MAGIC;
                write32(ISV_BASE, 0);
            }
        }
    }

    pub fn write_bytes(&self, bytes: &[u8]) {
        if !self.present {
            return;
        }
        for chunk in bytes.chunks(ISV_BUFFER_LEN) {
            self.flush_chunk(chunk);
        }
    }

    #[cfg(target_arch = "mips")]
    fn flush_chunk(&self, chunk: &[u8]) {
        for (i, word) in chunk.chunks(4).enumerate() {
            let mut raw = [0u8; 4];
            raw[..word.len()].copy_from_slice(word);
            // SAFETY: `present` was established by init(); the buffer is
            // ISV_BUFFER_LEN bytes and chunks never exceed it.
            unsafe { write32(ISV_BUFFER + i * 4, u32::from_be_bytes(raw)) };
        }
        // SAFETY: as above.
        unsafe { write32(ISV_WRITE_LEN, chunk.len() as u32) };
    }

    #[cfg(not(target_arch = "mips"))]
    fn flush_chunk(&self, _chunk: &[u8]) {}
}

impl fmt::Write for DebugPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_bytes(s.as_bytes());
        Ok(())
    }
}

static PORT: Mutex<DebugPort> = Mutex::new(DebugPort::new());

/// Initialize the global debug port
pub fn init() {
    PORT.lock().init();
}

/// Whether a debug device was detected
pub fn present() -> bool {
    PORT.lock().present
}

/// Write a string to the global debug port
pub fn write_str(s: &str) {
    PORT.lock().write_bytes(s.as_bytes());
}

/// Write formatted arguments to the global debug port
pub fn write_fmt(args: fmt::Arguments) {
    use core::fmt::Write;
    let _ = PORT.lock().write_fmt(args);
}
