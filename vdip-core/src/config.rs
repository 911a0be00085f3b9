//! `vdip.json` configuration.
//!
//! ```json
//! {
//!   "transport": { "type": "ports", "data": "261" },
//!   "timeout_ms": 15000,
//!   "clock": "tick"
//! }
//! ```
//!
//! Port numbers may be JSON numbers or octal strings. Every field is
//! optional. When the file names no transport, a `VPORT` file in the
//! working directory picks the data port, and failing that the factory
//! port is used.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::clock::{Clock, ClockKind};
use crate::error::{VdipError, VdipResult};
use crate::port::{find_port_file, parse_octal_port, PortPair};
use crate::serial::{SerialTransport, DEFAULT_BAUD};
use crate::session::{
    Session, SessionConfig, SizeByteOrder, DEFAULT_PURGE_QUIET, DEFAULT_SYNC_ATTEMPTS,
    DEFAULT_TIMEOUT,
};
use crate::transport::Transport;

/// File name looked for when no config path is given.
pub const CONFIG_FILE: &str = "vdip.json";

/// How to reach the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// VDIP-1 in UART mode behind a serial device.
    Serial {
        path: String,
        #[serde(default = "default_baud")]
        baud: u32,
    },
    /// VDIP-1 in parallel FIFO mode on an I/O port pair.
    Ports {
        #[serde(deserialize_with = "port_number")]
        data: u16,
        /// Defaults to `data + 1`.
        #[serde(default, deserialize_with = "optional_port_number")]
        status: Option<u16>,
    },
}

fn default_baud() -> u32 {
    DEFAULT_BAUD
}

impl TransportConfig {
    pub fn ports(pair: PortPair) -> Self {
        TransportConfig::Ports {
            data: pair.data,
            status: Some(pair.status),
        }
    }

    /// Open the transport this config names.
    pub fn open(&self) -> VdipResult<Box<dyn Transport>> {
        match self {
            TransportConfig::Serial { path, baud } => {
                debug!(%path, baud, "opening serial transport");
                Ok(Box::new(SerialTransport::open(path, *baud)?))
            }
            TransportConfig::Ports { data, status } => {
                let pair = PortPair {
                    data: *data,
                    status: status.unwrap_or_else(|| data.wrapping_add(1)),
                };
                open_ports(pair)
            }
        }
    }
}

#[cfg(unix)]
fn open_ports(pair: PortPair) -> VdipResult<Box<dyn Transport>> {
    use crate::port::{DevPortIo, PortPairTransport};
    debug!(data = pair.data, status = pair.status, "opening port transport");
    Ok(Box::new(PortPairTransport::new(DevPortIo::open()?, pair)))
}

#[cfg(not(unix))]
fn open_ports(pair: PortPair) -> VdipResult<Box<dyn Transport>> {
    Err(VdipError::InvalidPort(format!(
        "direct port access ({:o}) is not available on this host",
        pair.data
    )))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u16),
    Octal(String),
}

impl PortValue {
    fn resolve(self) -> VdipResult<u16> {
        match self {
            PortValue::Number(n) => Ok(n),
            PortValue::Octal(s) => parse_octal_port(&s),
        }
    }
}

fn port_number<'de, D: Deserializer<'de>>(d: D) -> Result<u16, D::Error> {
    PortValue::deserialize(d)?
        .resolve()
        .map_err(serde::de::Error::custom)
}

fn optional_port_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u16>, D::Error> {
    Option::<PortValue>::deserialize(d)?
        .map(PortValue::resolve)
        .transpose()
        .map_err(serde::de::Error::custom)
}

/// Contents of `vdip.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VdipConfig {
    pub transport: Option<TransportConfig>,
    pub timeout_ms: u64,
    pub purge_ms: u64,
    pub sync_attempts: u32,
    pub sync_recovery_ms: u64,
    /// Zero busy-polls.
    pub poll_interval_us: u64,
    pub clock: ClockKind,
    pub size_order: SizeByteOrder,
}

impl Default for VdipConfig {
    fn default() -> Self {
        Self {
            transport: None,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            purge_ms: DEFAULT_PURGE_QUIET.as_millis() as u64,
            sync_attempts: DEFAULT_SYNC_ATTEMPTS,
            sync_recovery_ms: 0,
            poll_interval_us: 0,
            clock: ClockKind::default(),
            size_order: SizeByteOrder::default(),
        }
    }
}

impl VdipConfig {
    /// Parse a config file.
    pub fn load(path: &Path) -> VdipResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Load `explicit` if given, else `vdip.json` in `dir` if present,
    /// else defaults.
    pub fn discover(explicit: Option<&Path>, dir: &Path) -> VdipResult<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let path: PathBuf = dir.join(CONFIG_FILE);
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// The transport to use: the configured one, else a `VPORT` file in
    /// `dir`, else the factory port pair.
    pub fn resolve_transport(&self, dir: &Path) -> VdipResult<TransportConfig> {
        if let Some(t) = &self.transport {
            return Ok(t.clone());
        }
        match find_port_file(dir)? {
            Some(pair) => {
                debug!(data = pair.data, "using port override file");
                Ok(TransportConfig::ports(pair))
            }
            None => Ok(TransportConfig::ports(PortPair::default())),
        }
    }

    pub fn session_config(&self) -> VdipResult<SessionConfig> {
        if self.timeout_ms == 0 {
            return Err(VdipError::InvalidArgument(
                "timeout_ms must be positive".to_string(),
            ));
        }
        Ok(SessionConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            purge_quiet: Duration::from_millis(self.purge_ms),
            sync_attempts: self.sync_attempts.max(1),
            sync_recovery: Duration::from_millis(self.sync_recovery_ms),
            poll_interval: Duration::from_micros(self.poll_interval_us),
            size_order: self.size_order,
        })
    }

    /// Open the transport and wrap it in a session. Does not talk to the
    /// device yet.
    pub fn connect(&self, dir: &Path) -> VdipResult<Session<Box<dyn Transport>, Box<dyn Clock>>> {
        let transport = self.resolve_transport(dir)?.open()?;
        Ok(Session::with_config(
            transport,
            self.clock.build(),
            self.session_config()?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let config: VdipConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, VdipConfig::default());
        let session = config.session_config().unwrap();
        assert_eq!(session, SessionConfig::default());
    }

    #[test]
    fn test_parse_ports_octal_and_number() {
        let config: VdipConfig =
            serde_json::from_str(r#"{"transport": {"type": "ports", "data": "271"}}"#).unwrap();
        assert_eq!(
            config.transport,
            Some(TransportConfig::Ports {
                data: 0o271,
                status: None
            })
        );

        let config: VdipConfig = serde_json::from_str(
            r#"{"transport": {"type": "ports", "data": 185, "status": "300"}}"#,
        )
        .unwrap();
        assert_eq!(
            config.transport,
            Some(TransportConfig::Ports {
                data: 185,
                status: Some(0o300)
            })
        );
    }

    #[test]
    fn test_bad_octal_port_rejected() {
        let result: Result<VdipConfig, _> =
            serde_json::from_str(r#"{"transport": {"type": "ports", "data": "289"}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_serial() {
        let config: VdipConfig = serde_json::from_str(
            r#"{"transport": {"type": "serial", "path": "/dev/ttyUSB0"}, "clock": "seconds", "size_order": "big"}"#,
        )
        .unwrap();
        assert_eq!(
            config.transport,
            Some(TransportConfig::Serial {
                path: "/dev/ttyUSB0".to_string(),
                baud: DEFAULT_BAUD
            })
        );
        assert_eq!(config.clock, ClockKind::Seconds);
        assert_eq!(config.size_order, SizeByteOrder::Big);
    }

    #[test]
    fn test_session_config_timing() {
        let config: VdipConfig = serde_json::from_str(
            r#"{"timeout_ms": 500, "purge_ms": 50, "sync_attempts": 0, "poll_interval_us": 100}"#,
        )
        .unwrap();
        let session = config.session_config().unwrap();
        assert_eq!(session.timeout, Duration::from_millis(500));
        assert_eq!(session.purge_quiet, Duration::from_millis(50));
        assert_eq!(session.sync_attempts, 1);
        assert_eq!(session.poll_interval, Duration::from_micros(100));

        let zero = VdipConfig {
            timeout_ms: 0,
            ..VdipConfig::default()
        };
        assert!(zero.session_config().is_err());
    }

    #[test]
    fn test_discover_and_port_file_precedence() {
        let dir = tempfile::tempdir().unwrap();

        let config = VdipConfig::discover(None, dir.path()).unwrap();
        assert_eq!(
            config.resolve_transport(dir.path()).unwrap(),
            TransportConfig::ports(PortPair::default())
        );

        std::fs::write(dir.path().join("VPORT"), "271\n").unwrap();
        assert_eq!(
            config.resolve_transport(dir.path()).unwrap(),
            TransportConfig::ports(PortPair::from_data(0o271))
        );

        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"transport": {"type": "serial", "path": "COM3", "baud": 115200}}"#,
        )
        .unwrap();
        let config = VdipConfig::discover(None, dir.path()).unwrap();
        assert_eq!(
            config.resolve_transport(dir.path()).unwrap(),
            TransportConfig::Serial {
                path: "COM3".to_string(),
                baud: 115200
            }
        );
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(
            VdipConfig::discover(Some(&missing), dir.path()),
            Err(VdipError::Io(_))
        ));
    }

    #[test]
    fn test_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(VdipConfig::load(&path), Err(VdipError::Json(_))));
    }
}
