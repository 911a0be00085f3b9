//! Whole-file copies between the host and the flash drive.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind as IoErrorKind, Read, Write};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::dir::to_8_3;
use crate::error::{VdipError, VdipResult};
use crate::session::Session;
use crate::timestamp::FatTimestamp;
use crate::transport::Transport;

/// Transfer block size, two CP/M records.
pub const BLOCK_SIZE: usize = 256;

/// Options for [`get_file`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// NUL-pad the final block to a full 256 bytes, so the host copy ends
    /// on a record boundary the way CP/M files do.
    pub pad_final_block: bool,
}

/// Copy `remote` from the drive's current directory into `out`.
///
/// Returns the number of bytes read from the drive (padding excluded).
pub fn get_file<T, C, W>(
    session: &mut Session<T, C>,
    remote: &str,
    out: &mut W,
    options: GetOptions,
) -> VdipResult<u64>
where
    T: Transport,
    C: Clock,
    W: Write,
{
    let name = to_8_3(remote);
    let size = session.dir_size(&name)?;
    session.open_read(&name)?;
    debug!(file = %name, size, "get");

    let copied = copy_out(session, size, out, options);
    let closed = session.close(Some(&name));
    let copied = finish(copied, closed)?;
    info!(file = %name, bytes = copied, "copied from drive");
    Ok(copied)
}

fn copy_out<T: Transport, C: Clock, W: Write>(
    session: &mut Session<T, C>,
    size: u32,
    out: &mut W,
    options: GetOptions,
) -> VdipResult<u64> {
    let mut block = [0u8; BLOCK_SIZE];
    let mut remaining = size as usize;
    while remaining > 0 {
        let n = remaining.min(BLOCK_SIZE);
        session.read_into(&mut block[..n])?;
        remaining -= n;
        if remaining == 0 && options.pad_final_block && n < BLOCK_SIZE {
            block[n..].fill(0);
            out.write_all(&block)?;
        } else {
            out.write_all(&block[..n])?;
        }
    }
    out.flush()?;
    Ok(u64::from(size))
}

/// Copy everything `input` yields to `remote` in the drive's current
/// directory, stamped with `stamp`. The file is closed even when the copy
/// fails part way.
///
/// Returns the number of bytes written.
pub fn put_file<T, C, R>(
    session: &mut Session<T, C>,
    input: &mut R,
    remote: &str,
    stamp: FatTimestamp,
) -> VdipResult<u64>
where
    T: Transport,
    C: Clock,
    R: Read,
{
    let name = to_8_3(remote);
    session.open_write(&name, stamp)?;
    debug!(file = %name, %stamp, "put");

    let copied = session.seek(0).and_then(|()| copy_in(session, input));
    let closed = session.close(Some(&name));
    let copied = finish(copied, closed)?;
    info!(file = %name, bytes = copied, "copied to drive");
    Ok(copied)
}

fn copy_in<T: Transport, C: Clock, R: Read>(
    session: &mut Session<T, C>,
    input: &mut R,
) -> VdipResult<u64> {
    let mut block = [0u8; BLOCK_SIZE];
    let mut total = 0u64;
    loop {
        let n = fill_block(input, &mut block)?;
        if n == 0 {
            return Ok(total);
        }
        session.write(&block[..n])?;
        total += n as u64;
    }
}

/// Read until `block` is full or the input ends.
fn fill_block<R: Read>(input: &mut R, block: &mut [u8]) -> VdipResult<usize> {
    let mut filled = 0;
    while filled < block.len() {
        match input.read(&mut block[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == IoErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// The copy error wins over the close error.
fn finish(copied: VdipResult<u64>, closed: VdipResult<()>) -> VdipResult<u64> {
    match (copied, closed) {
        (Ok(n), Ok(())) => Ok(n),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            warn!(error = %close_err, "close after failed copy");
            Err(e)
        }
    }
}

/// [`get_file`] into a host file. `local` defaults to the remote name in
/// the working directory. A failed copy leaves no host file behind.
pub fn get_to_path<T: Transport, C: Clock>(
    session: &mut Session<T, C>,
    remote: &str,
    local: Option<&Path>,
    options: GetOptions,
) -> VdipResult<u64> {
    let name = to_8_3(remote);
    let path = local.unwrap_or_else(|| Path::new(&name));
    let mut out = BufWriter::new(File::create(path)?);
    let result = get_file(session, &name, &mut out, options);
    if result.is_err() {
        drop(out);
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "could not remove partial copy");
        }
    }
    result
}

/// [`put_file`] from a host file, stamped with the session clock's wall
/// time. The remote name defaults to the local file name in 8.3 form.
pub fn put_from_path<T: Transport, C: Clock>(
    session: &mut Session<T, C>,
    local: &Path,
    remote: Option<&str>,
) -> VdipResult<(String, u64)> {
    let name = match remote {
        Some(r) => to_8_3(r),
        None => {
            let file_name = local.file_name().ok_or_else(|| {
                VdipError::InvalidArgument(format!("not a file: {}", local.display()))
            })?;
            to_8_3(&file_name.to_string_lossy())
        }
    };
    let mut input = BufReader::new(File::open(local)?);
    let stamp = FatTimestamp::from_system_time(session.clock().wall_time());
    let copied = put_file(session, &mut input, &name, stamp)?;
    Ok((name, copied))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::{SessionConfig, SessionState};
    use crate::sim::SimulatedDevice;
    use std::time::Duration;

    fn session(dev: SimulatedDevice) -> Session<SimulatedDevice, ManualClock> {
        let config = SessionConfig {
            timeout: Duration::from_millis(200),
            purge_quiet: Duration::from_millis(20),
            ..SessionConfig::default()
        };
        let mut s = Session::with_config(dev, ManualClock::default(), config);
        s.init().unwrap();
        s
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn test_get_file_block_sizes() {
        for len in [0, 1, 255, 256, 257, 600] {
            let data = pattern(len);
            let mut dev = SimulatedDevice::new();
            dev.add_file("DATA.BIN", &data, FatTimestamp::default());
            let mut s = session(dev);

            let mut out = Vec::new();
            let n = get_file(&mut s, "data.bin", &mut out, GetOptions::default()).unwrap();
            assert_eq!(n, len as u64);
            assert_eq!(out, data);
            assert_eq!(s.state(), SessionState::Ready);
            assert_eq!(s.transport().open_file(), None);
        }
    }

    #[test]
    fn test_get_file_pads_final_block() {
        let mut dev = SimulatedDevice::new();
        dev.add_file("A.TXT", b"hello", FatTimestamp::default());
        let mut s = session(dev);

        let mut out = Vec::new();
        let options = GetOptions {
            pad_final_block: true,
        };
        assert_eq!(get_file(&mut s, "A.TXT", &mut out, options).unwrap(), 5);
        assert_eq!(out.len(), BLOCK_SIZE);
        assert_eq!(&out[..5], b"hello");
        assert!(out[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_get_missing_file() {
        let mut s = session(SimulatedDevice::new());
        let mut out = Vec::new();
        assert!(matches!(
            get_file(&mut s, "NOPE.TXT", &mut out, GetOptions::default()),
            Err(VdipError::FileNotFound(_))
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_put_file_then_get_back() {
        let data = pattern(700);
        let stamp = FatTimestamp::new(2024, 3, 7, 14, 5, 0).unwrap();
        let mut s = session(SimulatedDevice::new());

        let n = put_file(&mut s, &mut &data[..], "b:Report.txt", stamp).unwrap();
        assert_eq!(n, 700);
        assert_eq!(s.transport().file("REPORT.TXT"), Some(&data[..]));
        assert_eq!(s.transport().modified("REPORT.TXT"), Some(stamp));
        assert_eq!(s.dir_date_time("REPORT.TXT").unwrap(), stamp);

        let mut out = Vec::new();
        get_file(&mut s, "REPORT.TXT", &mut out, GetOptions::default()).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_put_closes_after_failure() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("disk error"))
            }
        }

        let mut s = session(SimulatedDevice::new());
        assert!(matches!(
            put_file(&mut s, &mut Broken, "X.TXT", FatTimestamp::default()),
            Err(VdipError::Io(_))
        ));
        assert_eq!(s.transport().open_file(), None);
        assert!(s
            .transport()
            .commands()
            .iter()
            .any(|c| c == "clf X.TXT"));
    }

    #[test]
    fn test_paths_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("notes.txt");
        std::fs::write(&src, b"line one\r\nline two\r\n").unwrap();

        let mut s = session(SimulatedDevice::new());
        let (name, n) = put_from_path(&mut s, &src, None).unwrap();
        assert_eq!(name, "NOTES.TXT");
        assert_eq!(n, 20);

        let dst = dir.path().join("copy.txt");
        get_to_path(&mut s, "NOTES.TXT", Some(&dst), GetOptions::default()).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"line one\r\nline two\r\n");

        let missing = dir.path().join("missing.txt");
        assert!(get_to_path(&mut s, "MISSING.TXT", Some(&missing), GetOptions::default()).is_err());
        assert!(!missing.exists());
    }
}
