//! End-to-end sessions against the simulated monitor.

use std::time::Duration;

use vdip_core::port::{VRXF, VTXE};
use vdip_core::sim::{DeadTransport, Firmware, SimulatedDevice};
use vdip_core::{
    get_file, put_file, DirtLayout, FatTimestamp, GetOptions, ListMode, ManualClock, PortIo,
    PortPair, PortPairTransport, Session, SessionConfig, SessionState, Transport, VdipError,
    VdipResult,
};

fn fast_config() -> SessionConfig {
    SessionConfig {
        timeout: Duration::from_millis(200),
        purge_quiet: Duration::from_millis(20),
        ..SessionConfig::default()
    }
}

fn connect<T: Transport>(transport: T) -> Session<T, ManualClock> {
    let mut session = Session::with_config(transport, ManualClock::default(), fast_config());
    session.init().expect("init");
    session.find_disk().expect("find disk");
    session
}

/// Register pair wired to a simulated device, as the card's FIFO would be.
struct FifoBridge {
    device: SimulatedDevice,
    ports: PortPair,
    latched: Option<u8>,
}

impl PortIo for FifoBridge {
    fn inb(&mut self, port: u16) -> VdipResult<u8> {
        if port == self.ports.status {
            if self.latched.is_none() {
                self.latched = self.device.try_read()?;
            }
            let rxf = if self.latched.is_some() { VRXF } else { 0 };
            Ok(VTXE | rxf)
        } else if port == self.ports.data {
            Ok(self.latched.take().unwrap_or(0))
        } else {
            Err(VdipError::InvalidPort(format!("{:o}", port)))
        }
    }

    fn outb(&mut self, port: u16, value: u8) -> VdipResult<()> {
        assert_eq!(port, self.ports.data);
        self.device.try_write(value)?;
        Ok(())
    }
}

#[test]
fn test_full_session_workflow() {
    let mut session = connect(SimulatedDevice::new());
    let stamp = FatTimestamp::new(2023, 11, 2, 9, 41, 10).unwrap();

    session.make_dir_with_stamp("SRC", stamp).unwrap();
    session.change_dir("SRC").unwrap();

    let source = b"; hello world\r\n\tORG\t100H\r\n".repeat(20);
    let written = put_file(&mut session, &mut &source[..], "hello.asm", stamp).unwrap();
    assert_eq!(written, source.len() as u64);

    let listing = session.list_dir(ListMode::Full).unwrap();
    let names: Vec<String> = listing.iter().map(|e| e.file_name()).collect();
    assert_eq!(names, vec![".", "..", "HELLO.ASM"]);
    let hello = &listing[2];
    assert_eq!(hello.size as usize, source.len());
    assert_eq!(hello.modified, Some(stamp));

    let mut copy = Vec::new();
    get_file(&mut session, "HELLO.ASM", &mut copy, GetOptions::default()).unwrap();
    assert_eq!(copy, source);

    assert_eq!(session.change_dir_root().unwrap(), 1);
    assert!(!session.change_dir_up().unwrap());
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.transport().file("SRC/HELLO.ASM"), Some(&source[..]));
}

#[test]
fn test_old_firmware_dirt_layout() {
    let stamp = FatTimestamp::new(2008, 6, 30, 23, 59, 58).unwrap();
    let mut device = SimulatedDevice::new().with_firmware(Firmware::Vdap);
    device.add_file("OLD.TXT", b"x", stamp);
    let mut session = connect(device);

    assert_eq!(session.dirt_layout(), DirtLayout::Unknown);
    assert_eq!(session.dir_date_time("OLD.TXT").unwrap(), stamp);
    assert_eq!(session.dirt_layout(), DirtLayout::LeadingBlank);
    // Second lookup uses the learned layout.
    assert_eq!(session.dir_date_time("OLD.TXT").unwrap(), stamp);
}

#[test]
fn test_no_disk_reported() {
    let mut session = Session::with_config(
        SimulatedDevice::without_disk(),
        ManualClock::default(),
        fast_config(),
    );
    session.init().unwrap();
    assert!(matches!(session.find_disk(), Err(VdipError::NoDisk)));
}

#[test]
fn test_dead_device_is_unreachable() {
    let mut session = Session::with_config(DeadTransport, ManualClock::default(), fast_config());
    assert!(matches!(session.init(), Err(VdipError::SyncFailed(3))));
    assert_eq!(session.state(), SessionState::Unreachable);
}

#[test]
fn test_resync_after_timeout() {
    let mut device = SimulatedDevice::new();
    device.add_file("DATA.BIN", &[7u8; 100], FatTimestamp::default());
    let mut session = connect(device);

    session.open_read("DATA.BIN").unwrap();
    session.transport_mut().set_silent(true);
    assert!(matches!(session.read(100), Err(VdipError::Timeout(_))));
    assert_eq!(session.state(), SessionState::Disconnected);

    session.transport_mut().set_silent(false);
    session.init().unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.dir_size("DATA.BIN").unwrap(), 100);
}

#[test]
fn test_session_over_port_pair() {
    let ports = PortPair::from_data(0o331);
    let mut device = SimulatedDevice::new();
    device.add_file("VPORT.TXT", b"331", FatTimestamp::default());
    let bridge = FifoBridge {
        device,
        ports,
        latched: None,
    };
    let mut session = connect(PortPairTransport::new(bridge, ports));

    let mut out = Vec::new();
    get_file(&mut session, "VPORT.TXT", &mut out, GetOptions::default()).unwrap();
    assert_eq!(out, b"331");
    assert_eq!(
        session.transport().io().device.commands().first().map(String::as_str),
        Some("E")
    );
}
