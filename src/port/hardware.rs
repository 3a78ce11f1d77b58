//! Real serial device behind the `serial_port` feature.

use std::io::{Read, Write};
use std::time::Duration;

use log::debug;
use serialport::SerialPort;

use super::{PortError, SerialIo};

/// 115200-8N1 device port.
pub struct HardwarePort {
    name: String,
    port: Box<dyn SerialPort>,
}

impl HardwarePort {
    /// Open `name` at `baud` (the wire protocol runs at 115200).
    pub fn open(name: &str, baud: u32) -> Result<Self, PortError> {
        let port = serialport::new(name, baud)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| PortError::Open(name.to_string(), e.to_string()))?;
        debug!("serial port '{}' opened at {} baud", name, baud);
        Ok(Self {
            name: name.to_string(),
            port,
        })
    }

    /// Device name this port was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl SerialIo for HardwarePort {
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn available(&mut self) -> bool {
        self.port.bytes_to_read().map(|n| n > 0).unwrap_or(false)
    }

    fn read_byte(&mut self) -> Option<u8> {
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(1) => Some(buf[0]),
            _ => None,
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), PortError> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }
}
