//! VDIP CLI - Move files between the host and a USB flash drive on a VDIP-1.
//!
//! Usage:
//!   vdip [options] <command>
//!
//! Examples:
//!   vdip dir                     # Full listing of the current USB directory
//!   vdip dir -b                  # Names only, four to a line
//!   vdip get HELLO.TXT           # Copy USB:HELLO.TXT to ./HELLO.TXT
//!   vdip put a.asm b.asm         # Copy host files to the USB drive
//!   vdip cd /GAMES/ZORK          # Change USB directory
//!   vdip md SOURCES              # Create a USB directory
//!   vdip --port 271 dir          # Use data port 271 (octal)

mod report;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::util::SubscriberInitExt;

use vdip_core::port::parse_octal_port;
use vdip_core::serial::DEFAULT_BAUD;
use vdip_core::{
    get_to_path, put_from_path, to_8_3, Clock, GetOptions, ListMode, PortPair, Session,
    Transport, TransportConfig, VdipConfig, VdipResult,
};

/// VDIP-1 USB flash drive tools
#[derive(Parser, Debug)]
#[command(name = "vdip")]
#[command(about = "Move files between the host and a VDIP-1 USB flash drive")]
struct Args {
    /// Data port in octal (status is the next port)
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Serial device of a VDIP-1 in UART mode
    #[arg(short, long, global = true, conflicts_with = "port")]
    device: Option<String>,

    /// Serial speed
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Config file (default: ./vdip.json if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Per-byte timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Log each command and response
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log everything, including polling detail
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy a file from the USB drive to the host
    Get {
        /// File on the USB drive
        remote: String,
        /// Host file or directory (default: the USB name, here)
        local: Option<PathBuf>,
        /// Pad the last block with NULs to a full 256 bytes
        #[arg(long)]
        pad: bool,
    },
    /// Copy host files to the USB drive
    Put {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List the current USB directory
    Dir {
        /// Names only, four to a line
        #[arg(short, long)]
        brief: bool,
    },
    /// Change the USB directory ('/' separated, leading '/' for the root)
    Cd { path: String },
    /// Create a USB directory
    Md { name: String },
}

fn init_logging(args: &Args) {
    let level = if args.trace {
        Level::TRACE
    } else if args.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .compact()
        .finish()
        .init();
}

/// Layer command-line overrides on top of the config file.
fn build_config(args: &Args, cwd: &Path) -> VdipResult<VdipConfig> {
    let mut config = VdipConfig::discover(args.config.as_deref(), cwd)?;

    if let Some(port) = &args.port {
        let pair = PortPair::from_data(parse_octal_port(port)?);
        config.transport = Some(TransportConfig::ports(pair));
    }
    if let Some(device) = &args.device {
        config.transport = Some(TransportConfig::Serial {
            path: device.clone(),
            baud: args.baud.unwrap_or(DEFAULT_BAUD),
        });
    } else if let (Some(speed), Some(TransportConfig::Serial { baud, .. })) =
        (args.baud, config.transport.as_mut())
    {
        *baud = speed;
    }
    if let Some(secs) = args.timeout {
        config.timeout_ms = secs.saturating_mul(1000);
    }
    Ok(config)
}

/// Bring the device up, then run one command.
fn execute<T: Transport, C: Clock>(
    session: &mut Session<T, C>,
    command: Command,
    cwd: &Path,
) -> VdipResult<()> {
    if let Err(e) = session.init() {
        println!("Error initializing VDIP-1 device!");
        return Err(e);
    }
    if let Err(e) = session.find_disk() {
        println!("No flash drive found!");
        return Err(e);
    }

    match command {
        Command::Get { remote, local, pad } => {
            let name = to_8_3(&remote);
            let dest = match local {
                Some(path) if path.is_dir() => path.join(&name),
                Some(path) => path,
                None => cwd.join(&name),
            };
            let options = GetOptions {
                pad_final_block: pad,
            };
            let copied = get_to_path(session, &name, Some(&dest), options)?;
            println!(
                "{} --> {}",
                report::transfer_line(&name, copied),
                dest.display()
            );
        }
        Command::Put { files } => {
            for path in files {
                let (name, copied) = put_from_path(session, &path, None)?;
                println!(
                    "{:<16} --> {}",
                    path.display(),
                    report::transfer_line(&name, copied)
                );
            }
        }
        Command::Dir { brief } => {
            let mode = if brief { ListMode::Brief } else { ListMode::Full };
            let entries = session.list_dir(mode)?;
            let text = if brief {
                report::brief_listing(&entries)
            } else {
                report::full_listing(&entries)
            };
            print!("{}", text);
        }
        Command::Cd { path } => session.change_dir_path(&path)?,
        Command::Md { name } => session.make_dir(&to_8_3(&name))?,
    }
    Ok(())
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let cwd = std::env::current_dir()?;
    let config = build_config(&args, &cwd)?;
    let mut session = config.connect(&cwd)?;

    let command = args.command;
    // Session I/O busy-waits, so it runs off the async workers.
    let task = tokio::task::spawn_blocking(move || execute(&mut session, command, &cwd));

    tokio::select! {
        result = task => {
            result??;
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n^C");
            // The blocking task cannot be cancelled; leave without waiting on it.
            std::process::exit(130);
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vdip_core::sim::SimulatedDevice;
    use vdip_core::{FatTimestamp, ManualClock, SessionConfig, VdipError};

    fn session(dev: SimulatedDevice) -> Session<SimulatedDevice, ManualClock> {
        let config = SessionConfig {
            timeout: Duration::from_millis(200),
            purge_quiet: Duration::from_millis(20),
            ..SessionConfig::default()
        };
        Session::with_config(dev, ManualClock::default(), config)
    }

    fn args(list: &[&str]) -> Args {
        Args::parse_from(std::iter::once("vdip").chain(list.iter().copied()))
    }

    #[test]
    fn test_parse_subcommands() {
        let a = args(&["--port", "271", "dir", "-b"]);
        assert_eq!(a.port.as_deref(), Some("271"));
        assert!(matches!(a.command, Command::Dir { brief: true }));

        let a = args(&["get", "HELLO.TXT", "out.txt", "--pad"]);
        assert!(matches!(a.command, Command::Get { pad: true, .. }));

        assert!(Args::try_parse_from(["vdip", "put"]).is_err());
        assert!(Args::try_parse_from(["vdip", "-p", "261", "-d", "/dev/ttyUSB0", "dir"]).is_err());
    }

    #[test]
    fn test_build_config_overrides() {
        let dir = tempfile::tempdir().unwrap();

        let config = build_config(&args(&["--port", "271", "--timeout", "2", "dir"]), dir.path())
            .unwrap();
        assert_eq!(
            config.transport,
            Some(TransportConfig::ports(PortPair::from_data(0o271)))
        );
        assert_eq!(config.timeout_ms, 2000);

        let config = build_config(
            &args(&["--device", "/dev/ttyUSB0", "--baud", "115200", "dir"]),
            dir.path(),
        )
        .unwrap();
        assert_eq!(
            config.transport,
            Some(TransportConfig::Serial {
                path: "/dev/ttyUSB0".to_string(),
                baud: 115200
            })
        );

        assert!(build_config(&args(&["--port", "9", "dir"]), dir.path()).is_err());
    }

    #[test]
    fn test_execute_no_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(SimulatedDevice::without_disk());
        assert!(matches!(
            execute(&mut s, Command::Dir { brief: false }, dir.path()),
            Err(VdipError::NoDisk)
        ));
    }

    #[test]
    fn test_execute_get_put() {
        let dir = tempfile::tempdir().unwrap();
        let mut dev = SimulatedDevice::new();
        dev.add_file("HELLO.TXT", b"hello, world", FatTimestamp::default());
        let mut s = session(dev);

        let get = Command::Get {
            remote: "hello.txt".to_string(),
            local: None,
            pad: false,
        };
        execute(&mut s, get, dir.path()).unwrap();
        let local = dir.path().join("HELLO.TXT");
        assert_eq!(std::fs::read(&local).unwrap(), b"hello, world");

        let src = dir.path().join("notes.asm");
        std::fs::write(&src, b"ORG 100H\r\n").unwrap();
        execute(&mut s, Command::Put { files: vec![src] }, dir.path()).unwrap();
        assert_eq!(s.transport().file("NOTES.ASM"), Some(&b"ORG 100H\r\n"[..]));
    }

    #[test]
    fn test_execute_md_cd_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(SimulatedDevice::new());

        execute(&mut s, Command::Md { name: "src".to_string() }, dir.path()).unwrap();
        assert!(s.transport().is_dir("SRC"));

        let cd = Command::Cd {
            path: "/SRC".to_string(),
        };
        execute(&mut s, cd, dir.path()).unwrap();
        assert_eq!(s.transport().cwd(), "/SRC");

        execute(&mut s, Command::Dir { brief: true }, dir.path()).unwrap();
    }
}
