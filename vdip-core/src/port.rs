//! Parallel FIFO access through a data/status register pair.

use serde::{Deserialize, Serialize};

use crate::error::{VdipError, VdipResult};
use crate::transport::Transport;

/// TXE# status bit: high when the FIFO will accept a byte.
pub const VTXE: u8 = 0o004;
/// RXF# status bit: high when a byte is waiting.
pub const VRXF: u8 = 0o010;

/// Factory data port of the H8 VDIP-1 card.
pub const DEFAULT_DATA_PORT: u16 = 0o261;

/// Name of the port override file looked for at startup.
pub const PORT_FILE: &str = "VPORT";

/// Byte-wide port I/O.
pub trait PortIo: Send {
    fn inb(&mut self, port: u16) -> VdipResult<u8>;
    fn outb(&mut self, port: u16, value: u8) -> VdipResult<()>;
}

/// The two registers the VDIP-1 exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortPair {
    pub data: u16,
    pub status: u16,
}

impl PortPair {
    /// Status register is always the port after the data register.
    pub fn from_data(data: u16) -> Self {
        Self {
            data,
            status: data.wrapping_add(1),
        }
    }
}

impl Default for PortPair {
    fn default() -> Self {
        Self::from_data(DEFAULT_DATA_PORT)
    }
}

/// Parse an octal port number such as `261`.
pub fn parse_octal_port(text: &str) -> VdipResult<u16> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0o")
        .or_else(|| trimmed.strip_prefix('0').filter(|rest| !rest.is_empty()))
        .unwrap_or(trimmed);
    u16::from_str_radix(digits, 8).map_err(|_| VdipError::InvalidPort(trimmed.to_string()))
}

/// Parse the contents of a port override file: one octal data port number
/// on the first line.
pub fn parse_port_file(contents: &str) -> VdipResult<PortPair> {
    let line = contents
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| VdipError::InvalidPort("empty port file".to_string()))?;
    Ok(PortPair::from_data(parse_octal_port(line)?))
}

/// Look for a port override file in `dir`. Returns `None` if there is none.
pub fn find_port_file(dir: &std::path::Path) -> VdipResult<Option<PortPair>> {
    let path = dir.join(PORT_FILE);
    match std::fs::read_to_string(&path) {
        Ok(contents) => parse_port_file(&contents).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// `Transport` over a register pair, honoring the TXE/RXF handshake.
pub struct PortPairTransport<P: PortIo> {
    io: P,
    ports: PortPair,
}

impl<P: PortIo> PortPairTransport<P> {
    pub fn new(io: P, ports: PortPair) -> Self {
        Self { io, ports }
    }

    pub fn ports(&self) -> PortPair {
        self.ports
    }

    pub fn io(&self) -> &P {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut P {
        &mut self.io
    }
}

impl<P: PortIo> Transport for PortPairTransport<P> {
    fn try_read(&mut self) -> VdipResult<Option<u8>> {
        if self.io.inb(self.ports.status)? & VRXF != 0 {
            Ok(Some(self.io.inb(self.ports.data)?))
        } else {
            Ok(None)
        }
    }

    fn try_write(&mut self, byte: u8) -> VdipResult<bool> {
        if self.io.inb(self.ports.status)? & VTXE != 0 {
            self.io.outb(self.ports.data, byte)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Port I/O through Linux `/dev/port`. Needs root (or CAP_SYS_RAWIO).
#[cfg(unix)]
pub struct DevPortIo {
    file: std::fs::File,
}

#[cfg(unix)]
impl DevPortIo {
    pub fn open() -> VdipResult<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/port")?;
        Ok(Self { file })
    }
}

#[cfg(unix)]
impl PortIo for DevPortIo {
    fn inb(&mut self, port: u16) -> VdipResult<u8> {
        use std::os::unix::fs::FileExt;
        let mut byte = [0u8; 1];
        self.file.read_exact_at(&mut byte, u64::from(port))?;
        Ok(byte[0])
    }

    fn outb(&mut self, port: u16, value: u8) -> VdipResult<()> {
        use std::os::unix::fs::FileExt;
        self.file.write_all_at(&[value], u64::from(port))?;
        Ok(())
    }
}
