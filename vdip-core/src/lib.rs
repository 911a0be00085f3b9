//! VDIP-1 Session Engine Core
//!
//! This crate talks to a Vinculum VDIP-1 USB host module over its command
//! monitor and moves files between the host and a USB flash drive:
//! - Byte transports (I/O port pair, serial port) with bounded waits
//! - CR-terminated line protocol with a fixed-size response buffer
//! - Session state machine for the extended command set
//! - Directory listing and whole-file transfer helpers
//!
//! # Architecture
//!
//! The engine uses a layered design:
//! - `Transport` trait: non-blocking byte probes (`try_read`, `try_write`)
//! - `Clock` trait: time source for timeouts and date stamps
//! - `ByteLink` / `LineLink`: bounded byte and line I/O over a transport
//! - `Session`: the command vocabulary (`sync`, `cd`, `opr`, `rdf`, ...)
//! - `transfer`: `get_file` / `put_file` on top of a session

pub mod clock;
pub mod config;
pub mod dir;
pub mod error;
pub mod hex;
pub mod line;
pub mod port;
pub mod serial;
pub mod session;
pub mod sim;
pub mod timestamp;
pub mod transfer;
pub mod transport;

pub use clock::{Clock, ClockKind, ManualClock, MonotonicClock, QuantizedClock, TICK};
pub use config::{TransportConfig, VdipConfig, CONFIG_FILE};
pub use dir::{to_8_3, DirEntry, ListMode};
pub use error::{ErrorKind, VdipError, VdipResult};
pub use line::{LineBuffer, LineLink};
pub use port::{PortIo, PortPair, PortPairTransport, DEFAULT_DATA_PORT, PORT_FILE};
pub use serial::SerialTransport;
pub use session::{
    DirtLayout, Session, SessionConfig, SessionState, SizeByteOrder, CMD_FAILED, PROMPT,
};
pub use timestamp::FatTimestamp;
pub use transfer::{get_file, get_to_path, put_file, put_from_path, GetOptions, BLOCK_SIZE};
pub use transport::{ByteLink, Transport};

#[cfg(unix)]
pub use port::DevPortIo;
