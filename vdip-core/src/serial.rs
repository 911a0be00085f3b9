//! Serial transport for a VDIP-1 strapped for UART mode.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::SerialPort;

use crate::error::VdipResult;
use crate::transport::Transport;

/// Default VDIP-1 UART speed.
pub const DEFAULT_BAUD: u32 = 9600;

/// `Transport` over an OS serial port.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open `path` at `baud`, 8N1 with RTS/CTS flow control.
    pub fn open(path: &str, baud: u32) -> VdipResult<Self> {
        let port = serialport::new(path, baud)
            .flow_control(serialport::FlowControl::Hardware)
            .timeout(Duration::from_millis(10))
            .open()?;
        Ok(Self { port })
    }

    pub fn from_port(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Transport for SerialTransport {
    fn try_read(&mut self) -> VdipResult<Option<u8>> {
        if self.port.bytes_to_read()? == 0 {
            return Ok(None);
        }
        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(1) => Ok(Some(byte[0])),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn try_write(&mut self, byte: u8) -> VdipResult<bool> {
        match self.port.write(&[byte]) {
            Ok(1) => Ok(true),
            Ok(_) => Ok(false),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
