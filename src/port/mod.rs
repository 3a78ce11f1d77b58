//! Byte-oriented serial port abstraction.
//!
//! The firmware core reads its command stream one byte at a time and
//! writes newline-terminated JSON responses. `SerialIo` is the seam:
//! [`MemoryPort`] backs tests and the console loop, and `HardwarePort`
//! (feature `serial_port`) wraps a real 115200-8N1 device.

mod memory;
#[cfg(feature = "serial_port")]
mod hardware;

pub use memory::MemoryPort;
#[cfg(feature = "serial_port")]
pub use hardware::HardwarePort;

use thiserror::Error;

/// Errors surfaced by port implementations.
#[derive(Error, Debug)]
pub enum PortError {
    /// Failed to open the underlying device.
    #[error("failed to open port '{0}': {1}")]
    Open(String, String),

    /// Read or write failure on an open port.
    #[error("port I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Single-producer/single-consumer byte port.
///
/// The machine thread is the only consumer; implementations do not need
/// to be thread-safe.
pub trait SerialIo {
    /// Downcast support for hosts that need the concrete port type.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;

    /// True if at least one inbound byte is ready.
    fn available(&mut self) -> bool;

    /// Pop the next inbound byte, if any.
    fn read_byte(&mut self) -> Option<u8>;

    /// Push outbound bytes toward the host.
    fn write(&mut self, bytes: &[u8]) -> Result<(), PortError>;

    /// Push a line and terminate it with `\n`.
    fn write_line(&mut self, line: &str) -> Result<(), PortError> {
        self.write(line.as_bytes())?;
        self.write(b"\n")
    }
}
