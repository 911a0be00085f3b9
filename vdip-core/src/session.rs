//! The VDIP-1 command session.
//!
//! A `Session` owns the transport, the clock and the response line buffer,
//! and speaks the Vinculum extended command set in ASCII mode: every
//! command is a CR-terminated line, and the monitor answers with the
//! prompt `D:\>` on success or a line of text (usually `Command Failed`)
//! otherwise.
//!
//! # Example
//!
//! ```
//! use vdip_core::sim::SimulatedDevice;
//! use vdip_core::{ManualClock, Session};
//!
//! let mut device = SimulatedDevice::new();
//! device.add_file("HELLO.TXT", b"hi", Default::default());
//!
//! let mut session = Session::new(device, ManualClock::default());
//! session.init().unwrap();
//! session.find_disk().unwrap();
//! assert_eq!(session.dir_size("HELLO.TXT").unwrap(), 2);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::clock::Clock;
use crate::dir::{DirEntry, ListMode};
use crate::error::{ErrorKind, VdipError, VdipResult};
use crate::hex::{fields_after_name, scan_hex_tokens};
use crate::line::{LineLink, CR};
use crate::timestamp::FatTimestamp;
use crate::transport::{ByteLink, Transport};

/// Monitor prompt.
pub const PROMPT: &str = "D:\\>";

/// Error line the monitor sends when a command fails.
pub const CMD_FAILED: &str = "Command Failed";

/// Default budget for every byte wait.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default quiet period that ends an input purge.
pub const DEFAULT_PURGE_QUIET: Duration = Duration::from_secs(1);

/// Default number of sync attempts.
pub const DEFAULT_SYNC_ATTEMPTS: u32 = 3;

/// Where the session stands with the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not synchronized, either never or since a timeout. Call `init`
    /// before relying on any further response.
    Disconnected,
    /// A sync is in progress.
    Syncing,
    /// Synchronized, no file open.
    Ready,
    FileOpenForRead,
    FileOpenForWrite,
    /// Every sync attempt failed. Operations still reach the transport,
    /// but only a successful `init` (or `sync`) brings the session back.
    Unreachable,
}

/// Byte order of the four `$XX` size tokens in a `dir NAME` reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeByteOrder {
    #[default]
    Little,
    Big,
}

/// Whether `dirt` results arrive after a blank line.
///
/// VDAP 03.69 sends one; VDAP2 does not. The session learns which on the
/// first successful `dirt`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DirtLayout {
    #[default]
    Unknown,
    LeadingBlank,
    Direct,
}

/// Session timing and firmware options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Budget for each byte wait.
    pub timeout: Duration,
    /// Quiet period that ends the purge before each sync attempt.
    pub purge_quiet: Duration,
    pub sync_attempts: u32,
    /// Pause between failed sync attempts.
    pub sync_recovery: Duration,
    /// Pause between transport polls. Zero spins.
    pub poll_interval: Duration,
    pub size_order: SizeByteOrder,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            purge_quiet: DEFAULT_PURGE_QUIET,
            sync_attempts: DEFAULT_SYNC_ATTEMPTS,
            sync_recovery: Duration::ZERO,
            poll_interval: Duration::ZERO,
            size_order: SizeByteOrder::Little,
        }
    }
}

/// An exclusive conversation with one VDIP-1.
pub struct Session<T: Transport, C: Clock> {
    link: LineLink<T, C>,
    config: SessionConfig,
    state: SessionState,
    dirt_layout: DirtLayout,
    last_stamp: Option<FatTimestamp>,
}

impl<T: Transport, C: Clock> Session<T, C> {
    pub fn new(transport: T, clock: C) -> Self {
        Self::with_config(transport, clock, SessionConfig::default())
    }

    pub fn with_config(transport: T, clock: C, config: SessionConfig) -> Self {
        let mut link = ByteLink::new(transport, clock);
        link.set_poll_interval(config.poll_interval);
        Self {
            link: LineLink::new(link),
            config,
            state: SessionState::Disconnected,
            dirt_layout: DirtLayout::Unknown,
            last_stamp: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn dirt_layout(&self) -> DirtLayout {
        self.dirt_layout
    }

    /// Stamp sent with the most recent `opw` or `mkd`.
    pub fn last_stamp(&self) -> Option<FatTimestamp> {
        self.last_stamp
    }

    /// The most recent response line.
    pub fn last_line(&self) -> String {
        self.link.line().text().into_owned()
    }

    pub fn transport(&self) -> &T {
        self.link.byte_link().transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.link.bytes().transport_mut()
    }

    pub fn clock(&self) -> &C {
        self.link.byte_link().clock()
    }

    pub fn into_transport(self) -> T {
        self.link.into_byte_link().into_parts().0
    }

    /// Synchronize with the monitor: purge stale input, send `E`, expect
    /// `E` back. Retries up to `sync_attempts` times.
    pub fn sync(&mut self) -> VdipResult<()> {
        self.state = SessionState::Syncing;
        let attempts = self.config.sync_attempts.max(1);
        for attempt in 1..=attempts {
            match self.sync_once() {
                Ok(()) => {
                    debug!(attempt, "synchronized");
                    self.state = SessionState::Ready;
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::Host => {
                    self.state = SessionState::Disconnected;
                    return Err(e);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "sync attempt failed");
                    if attempt < attempts && !self.config.sync_recovery.is_zero() {
                        std::thread::sleep(self.config.sync_recovery);
                    }
                }
            }
        }
        self.state = SessionState::Unreachable;
        Err(VdipError::SyncFailed(attempts))
    }

    fn sync_once(&mut self) -> VdipResult<()> {
        let purged = self.link.bytes().purge(self.config.purge_quiet)?;
        if purged > 0 {
            trace!(purged, "discarded stale input");
        }
        self.send("E\r")?;
        let line = self.read_response()?;
        if line == "E" {
            Ok(())
        } else {
            Err(VdipError::UnexpectedResponse {
                command: "E".into(),
                response: line,
            })
        }
    }

    /// Sync, then select ASCII mode and close anything left open.
    pub fn init(&mut self) -> VdipResult<()> {
        self.sync()?;
        self.exchange(|s| {
            s.command("ipa")?;
            s.command("clf")
        })?;
        info!("device initialized");
        Ok(())
    }

    /// Check that a flash drive is present.
    pub fn find_disk(&mut self) -> VdipResult<()> {
        self.exchange(|s| {
            s.send("\r")?;
            let line = s.read_response()?;
            if line == PROMPT {
                Ok(())
            } else {
                debug!(response = %line, "no disk");
                Err(VdipError::NoDisk)
            }
        })
    }

    /// Enter subdirectory `name` of the current directory.
    pub fn change_dir(&mut self, name: &str) -> VdipResult<()> {
        check_name(name)?;
        self.exchange(|s| {
            s.send(&format!("cd {}\r", name))?;
            let line = s.read_response()?;
            if line == PROMPT {
                Ok(())
            } else {
                Err(VdipError::DirNotFound {
                    name: name.to_string(),
                    response: line,
                })
            }
        })
    }

    /// Go up one level. Returns false if already at the root.
    pub fn change_dir_up(&mut self) -> VdipResult<bool> {
        self.exchange(|s| {
            s.send("cd ..\r")?;
            let line = s.read_response()?;
            match line.as_str() {
                PROMPT => Ok(true),
                CMD_FAILED => Ok(false),
                _ => Err(VdipError::UnexpectedResponse {
                    command: "cd ..".into(),
                    response: line,
                }),
            }
        })
    }

    /// Climb to the root directory. Returns the number of levels climbed.
    pub fn change_dir_root(&mut self) -> VdipResult<usize> {
        let mut levels = 0;
        while self.change_dir_up()? {
            levels += 1;
        }
        Ok(levels)
    }

    /// Follow a `/`-separated path. A leading `/` starts from the root.
    pub fn change_dir_path(&mut self, path: &str) -> VdipResult<()> {
        if path.contains('\\') {
            return Err(VdipError::InvalidArgument(format!(
                "use '/' to separate directories: {}",
                path
            )));
        }
        if path.starts_with('/') {
            self.change_dir_root()?;
        }
        for part in path.split('/').filter(|p| !p.is_empty()) {
            match part {
                "." => {}
                ".." => {
                    self.change_dir_up()?;
                }
                _ => self.change_dir(part)?,
            }
        }
        Ok(())
    }

    /// Create directory `name`, stamped with the clock's wall time.
    pub fn make_dir(&mut self, name: &str) -> VdipResult<()> {
        let stamp = FatTimestamp::from_system_time(self.clock().wall_time());
        self.make_dir_with_stamp(name, stamp)
    }

    pub fn make_dir_with_stamp(&mut self, name: &str, stamp: FatTimestamp) -> VdipResult<()> {
        check_name(name)?;
        self.last_stamp = Some(stamp);
        self.exchange(|s| s.command(&format!("mkd {}{}", name, stamp.to_param())))
    }

    /// Size of file `name` in bytes.
    pub fn dir_size(&mut self, name: &str) -> VdipResult<u32> {
        check_name(name)?;
        let order = self.config.size_order;
        self.exchange(|s| {
            s.send(&format!("dir {}\r", name))?;
            let mut line = s.read_response()?;
            if line.is_empty() {
                line = s.read_response()?;
            }
            if line == CMD_FAILED {
                return Err(VdipError::FileNotFound(name.to_string()));
            }
            // The prompt follows any non-failure line, directories included.
            s.expect_prompt("dir")?;
            let tokens = scan_hex_tokens(fields_after_name(&line), 4);
            let Ok(bytes) = <[u8; 4]>::try_from(tokens.as_slice()) else {
                return Err(VdipError::ShortField {
                    expected: 4,
                    found: tokens.len(),
                });
            };
            Ok(match order {
                SizeByteOrder::Little => u32::from_le_bytes(bytes),
                SizeByteOrder::Big => u32::from_be_bytes(bytes),
            })
        })
    }

    /// Last-modified stamp of file `name`.
    pub fn dir_date_time(&mut self, name: &str) -> VdipResult<FatTimestamp> {
        check_name(name)?;
        self.exchange(|s| {
            s.send(&format!("dirt {}\r", name))?;
            let mut line = s.read_response()?;
            let mut layout = DirtLayout::Direct;
            if line.is_empty() && s.dirt_layout != DirtLayout::Direct {
                layout = DirtLayout::LeadingBlank;
                line = s.read_response()?;
            }
            if line == CMD_FAILED {
                return Err(VdipError::FileNotFound(name.to_string()));
            }
            s.expect_prompt("dirt")?;
            let tokens = scan_hex_tokens(fields_after_name(&line), 10);
            if tokens.len() < 10 {
                return Err(VdipError::ShortField {
                    expected: 10,
                    found: tokens.len(),
                });
            }
            if s.dirt_layout != layout {
                debug!(?layout, "dirt layout detected");
                s.dirt_layout = layout;
            }
            Ok(FatTimestamp::from_le_bytes([
                tokens[6], tokens[7], tokens[8], tokens[9],
            ]))
        })
    }

    /// Open `name` for reading at offset 0.
    pub fn open_read(&mut self, name: &str) -> VdipResult<()> {
        check_name(name)?;
        self.exchange(|s| {
            s.close_any()?;
            s.command(&format!("opr {}", name))?;
            s.state = SessionState::FileOpenForRead;
            Ok(())
        })
    }

    /// Open `name` for writing, creating it if needed. Writes to an
    /// existing file append unless followed by a seek.
    pub fn open_write(&mut self, name: &str, stamp: FatTimestamp) -> VdipResult<()> {
        check_name(name)?;
        self.last_stamp = Some(stamp);
        self.exchange(|s| {
            s.close_any()?;
            s.command(&format!("opw {}{}", name, stamp.to_param()))?;
            s.state = SessionState::FileOpenForWrite;
            Ok(())
        })
    }

    /// Move the open file's position to `offset`.
    pub fn seek(&mut self, offset: u32) -> VdipResult<()> {
        self.exchange(|s| s.command(&format!("sek {}", offset)))
    }

    /// Read exactly `n` bytes from the open file.
    pub fn read(&mut self, n: usize) -> VdipResult<Vec<u8>> {
        let mut buf = vec![0; n];
        self.read_into(&mut buf)?;
        Ok(buf)
    }

    /// Fill `buf` from the open file.
    pub fn read_into(&mut self, buf: &mut [u8]) -> VdipResult<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.exchange(|s| {
            s.send(&format!("rdf {}\r", buf.len()))?;
            let budget = s.config.timeout;
            for slot in buf.iter_mut() {
                *slot = s.link.bytes().read_byte(budget)?;
            }
            trace!(bytes = buf.len(), "read payload");
            s.expect_prompt("rdf")
        })
    }

    /// Write all of `data` to the open file.
    pub fn write(&mut self, data: &[u8]) -> VdipResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.exchange(|s| {
            s.send(&format!("wrf {}\r", data.len()))?;
            let budget = s.config.timeout;
            for (written, &b) in data.iter().enumerate() {
                if let Err(e) = s.link.bytes().write_byte(b, budget) {
                    return match e {
                        VdipError::Timeout(_) => Err(VdipError::WriteFailed {
                            written,
                            requested: data.len(),
                        }),
                        other => Err(other),
                    };
                }
            }
            trace!(bytes = data.len(), "wrote payload");
            s.expect_prompt("wrf")
        })
    }

    /// Close `name`, or whatever is open when `name` is `None`.
    pub fn close(&mut self, name: Option<&str>) -> VdipResult<()> {
        let cmd = match name {
            Some(name) => {
                check_name(name)?;
                format!("clf {}", name)
            }
            None => "clf".to_string(),
        };
        self.exchange(|s| {
            s.command(&cmd)?;
            s.state = SessionState::Ready;
            Ok(())
        })
    }

    /// List the current directory. `Full` adds sizes and dates for files.
    pub fn list_dir(&mut self, mode: ListMode) -> VdipResult<Vec<DirEntry>> {
        let mut entries = self.exchange(|s| {
            s.send("dir\r")?;
            let mut entries = Vec::new();
            let mut line = s.read_response()?;
            if line.is_empty() {
                line = s.read_response()?;
            }
            while line != PROMPT {
                if line == CMD_FAILED {
                    return Err(VdipError::CommandFailed {
                        command: "dir".into(),
                        response: line,
                    });
                }
                if !line.is_empty() {
                    entries.push(DirEntry::parse_listing(&line));
                }
                line = s.read_response()?;
            }
            Ok(entries)
        })?;
        debug!(entries = entries.len(), "directory listed");

        if mode == ListMode::Full {
            for entry in entries.iter_mut().filter(|e| !e.is_dir) {
                let name = entry.file_name();
                entry.size = keep_listing(&name, self.dir_size(&name))?.unwrap_or(0);
                entry.modified = keep_listing(&name, self.dir_date_time(&name))?;
            }
        }
        Ok(entries)
    }

    /// Run `f`, marking the session disconnected if it fails in a way
    /// that leaves the byte stream out of step.
    fn exchange<R>(&mut self, f: impl FnOnce(&mut Self) -> VdipResult<R>) -> VdipResult<R> {
        let result = f(self);
        if let Err(e) = &result {
            if e.needs_resync() {
                warn!(error = %e, "lost sync with device");
                self.state = SessionState::Disconnected;
            }
        }
        result
    }

    fn send(&mut self, text: &str) -> VdipResult<()> {
        let budget = self.config.timeout;
        self.link.send_line(text, budget)
    }

    fn read_response(&mut self) -> VdipResult<String> {
        let budget = self.config.timeout;
        Ok(self.link.read_line(CR, budget)?.text().into_owned())
    }

    fn expect_prompt(&mut self, command: &str) -> VdipResult<()> {
        let line = self.read_response()?;
        if line == PROMPT {
            Ok(())
        } else if line == CMD_FAILED {
            Err(VdipError::CommandFailed {
                command: command.to_string(),
                response: line,
            })
        } else {
            Err(VdipError::UnexpectedResponse {
                command: command.to_string(),
                response: line,
            })
        }
    }

    /// Send `cmd` plus CR and expect the prompt.
    fn command(&mut self, cmd: &str) -> VdipResult<()> {
        self.send(&format!("{}\r", cmd))?;
        self.expect_prompt(cmd)
    }

    /// Bare `clf` before an open. Only transport failures count.
    fn close_any(&mut self) -> VdipResult<()> {
        match self.command("clf") {
            Err(e) if !e.needs_resync() => {
                warn!(error = %e, "clf before open was refused");
                Ok(())
            }
            other => other,
        }?;
        self.state = SessionState::Ready;
        Ok(())
    }
}

/// A per-entry lookup failure costs that entry its details, not the
/// listing. Only errors that desynchronize the link are passed on.
fn keep_listing<R>(name: &str, result: VdipResult<R>) -> VdipResult<Option<R>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.needs_resync() => Err(e),
        Err(e) => {
            warn!(file = %name, error = %e, "no details for entry");
            Ok(None)
        }
    }
}

/// Names go out inside a command line, so they cannot be empty or carry
/// separators.
fn check_name(name: &str) -> VdipResult<()> {
    if name.is_empty() || name.bytes().any(|b| b == CR || b == b' ' || b == b'\n') {
        return Err(VdipError::InvalidArgument(format!(
            "bad file name {:?}",
            name
        )));
    }
    Ok(())
}
