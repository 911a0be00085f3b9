//! Simulated transports for testing.
//!
//! - `ScriptedTransport`: canned replies to exact request bytes.
//! - `DeadTransport`: never ready in either direction.
//! - `SimulatedDevice`: a small model of the Vinculum command monitor with
//!   an in-memory flash drive, enough to run whole sessions against.

use std::collections::{BTreeMap, VecDeque};

use crate::error::VdipResult;
use crate::hex::push_hex_byte;
use crate::session::{CMD_FAILED, PROMPT};
use crate::timestamp::FatTimestamp;
use crate::transport::Transport;

/// Transport that replays scripted responses.
///
/// Each exchange pairs a request with a response; when the bytes written
/// since the last matched exchange end with the next request, its response
/// is queued for reading. Once the script runs out the device goes quiet.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    input: VecDeque<u8>,
    written: Vec<u8>,
    pending: Vec<u8>,
    exchanges: VecDeque<(Vec<u8>, Vec<u8>)>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with bytes already waiting to be read.
    pub fn with_input(input: &[u8]) -> Self {
        Self {
            input: input.iter().copied().collect(),
            ..Self::default()
        }
    }

    /// Add an exchange to the script.
    pub fn on(mut self, request: &[u8], response: &[u8]) -> Self {
        self.exchanges
            .push_back((request.to_vec(), response.to_vec()));
        self
    }

    /// Queue bytes for reading.
    pub fn queue_input(&mut self, input: &[u8]) {
        self.input.extend(input.iter().copied());
    }

    /// Everything written so far.
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Written bytes as a string (lossy UTF-8 conversion).
    pub fn written_string(&self) -> String {
        String::from_utf8_lossy(&self.written).into_owned()
    }

    /// Exchanges not yet triggered.
    pub fn remaining(&self) -> usize {
        self.exchanges.len()
    }
}

impl Transport for ScriptedTransport {
    fn try_read(&mut self) -> VdipResult<Option<u8>> {
        Ok(self.input.pop_front())
    }

    fn try_write(&mut self, byte: u8) -> VdipResult<bool> {
        self.written.push(byte);
        self.pending.push(byte);
        let matched = self
            .exchanges
            .front()
            .is_some_and(|(request, _)| self.pending.ends_with(request));
        if matched {
            if let Some((_, response)) = self.exchanges.pop_front() {
                self.input.extend(response);
            }
            self.pending.clear();
        }
        Ok(true)
    }
}

/// Transport that never has data and never accepts any.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeadTransport;

impl Transport for DeadTransport {
    fn try_read(&mut self) -> VdipResult<Option<u8>> {
        Ok(None)
    }

    fn try_write(&mut self, _byte: u8) -> VdipResult<bool> {
        Ok(false)
    }
}

/// Firmware generation being simulated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Firmware {
    /// VDAP 03.69: `dirt` results are preceded by a blank line.
    Vdap,
    /// VDAP2 2.0.2-SP3: no blank line before `dirt` results.
    #[default]
    Vdap2,
}

#[derive(Debug, Clone)]
struct SimFile {
    data: Vec<u8>,
    created: FatTimestamp,
    modified: FatTimestamp,
}

#[derive(Debug, Clone, Default)]
struct SimDir {
    entries: BTreeMap<String, SimNode>,
}

#[derive(Debug, Clone)]
enum SimNode {
    File(SimFile),
    Dir(SimDir),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenMode {
    Read,
    Write,
}

#[derive(Debug, Clone)]
struct OpenFile {
    dir: Vec<String>,
    name: String,
    pos: usize,
    mode: OpenMode,
}

/// Stamp used when a command carries none.
const DEFAULT_STAMP: FatTimestamp = FatTimestamp {
    date: (1 << 5) | 1,
    time: 0,
};

/// In-memory model of the VDIP-1 command monitor (extended command set,
/// ASCII mode).
///
/// Monitor commands (`E`, `e`, `ipa`, bare `clf`) answer even with no
/// drive attached; anything touching the drive answers `No Disk` then.
#[derive(Debug)]
pub struct SimulatedDevice {
    disk: Option<SimDir>,
    firmware: Firmware,
    cwd: Vec<String>,
    command: Vec<u8>,
    output: VecDeque<u8>,
    open: Option<OpenFile>,
    payload: Option<(usize, Vec<u8>)>,
    silent: bool,
    output_budget: Option<usize>,
    commands: Vec<String>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    /// Device with an empty flash drive attached.
    pub fn new() -> Self {
        Self {
            disk: Some(SimDir::default()),
            firmware: Firmware::default(),
            cwd: Vec::new(),
            command: Vec::new(),
            output: VecDeque::new(),
            open: None,
            payload: None,
            silent: false,
            output_budget: None,
            commands: Vec::new(),
        }
    }

    /// Device with no flash drive in the socket.
    pub fn without_disk() -> Self {
        Self {
            disk: None,
            ..Self::new()
        }
    }

    pub fn with_firmware(mut self, firmware: Firmware) -> Self {
        self.firmware = firmware;
        self
    }

    /// Add a file. `path` may name subdirectories (`DOCS/A.TXT`), which
    /// are created as needed.
    pub fn add_file(&mut self, path: &str, data: &[u8], modified: FatTimestamp) {
        let (dirs, name) = split_path(path);
        if let Some(dir) = self.disk.as_mut().and_then(|root| make_dirs(root, &dirs)) {
            dir.entries.insert(
                name,
                SimNode::File(SimFile {
                    data: data.to_vec(),
                    created: modified,
                    modified,
                }),
            );
        }
    }

    /// Add a directory (and any missing parents).
    pub fn add_dir(&mut self, path: &str) {
        let parts: Vec<String> = path
            .split('/')
            .filter(|p| !p.is_empty())
            .map(str::to_uppercase)
            .collect();
        if let Some(root) = self.disk.as_mut() {
            make_dirs(root, &parts);
        }
    }

    /// Contents of a file, if it exists.
    pub fn file(&self, path: &str) -> Option<&[u8]> {
        let (dirs, name) = split_path(path);
        match lookup_dir(self.disk.as_ref()?, &dirs)?.entries.get(&name)? {
            SimNode::File(f) => Some(&f.data),
            SimNode::Dir(_) => None,
        }
    }

    /// Modification stamp of a file or directory, if it exists.
    pub fn modified(&self, path: &str) -> Option<FatTimestamp> {
        let (dirs, name) = split_path(path);
        match lookup_dir(self.disk.as_ref()?, &dirs)?.entries.get(&name)? {
            SimNode::File(f) => Some(f.modified),
            SimNode::Dir(_) => Some(DEFAULT_STAMP),
        }
    }

    pub fn is_dir(&self, path: &str) -> bool {
        let parts: Vec<String> = path
            .split('/')
            .filter(|p| !p.is_empty())
            .map(str::to_uppercase)
            .collect();
        self.disk
            .as_ref()
            .and_then(|root| lookup_dir(root, &parts))
            .is_some()
    }

    /// Current directory as a `/`-separated path.
    pub fn cwd(&self) -> String {
        format!("/{}", self.cwd.join("/"))
    }

    /// Name of the open file, if any.
    pub fn open_file(&self) -> Option<&str> {
        self.open.as_ref().map(|o| o.name.as_str())
    }

    /// Every command line received, without the CR.
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Stop answering altogether.
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Deliver at most `bytes` more output bytes, then go quiet.
    pub fn cut_output_after(&mut self, bytes: usize) {
        self.output_budget = Some(bytes);
    }

    fn reply(&mut self, text: &str) {
        self.output.extend(text.as_bytes());
        self.output.push_back(b'\r');
    }

    fn prompt(&mut self) {
        self.reply(PROMPT);
    }

    fn fail(&mut self) {
        self.reply(CMD_FAILED);
    }

    fn receive(&mut self, byte: u8) {
        if let Some((remaining, mut data)) = self.payload.take() {
            data.push(byte);
            if remaining > 1 {
                self.payload = Some((remaining - 1, data));
            } else {
                self.finish_write(data);
            }
            return;
        }
        if byte == b'\r' {
            let line = String::from_utf8_lossy(&self.command).into_owned();
            self.command.clear();
            self.execute(&line);
        } else {
            self.command.push(byte);
        }
    }

    fn execute(&mut self, line: &str) {
        self.commands.push(line.to_string());
        let (word, arg) = match line.split_once(' ') {
            Some((w, a)) => (w, a.trim()),
            None => (line, ""),
        };

        match word {
            "E" | "e" => self.reply(word),
            "ipa" | "IPA" => self.prompt(),
            "clf" | "CLF" if arg.is_empty() => {
                self.open = None;
                self.prompt();
            }
            _ if self.disk.is_none() => self.reply("No Disk"),
            "" => self.prompt(),
            "clf" | "CLF" => {
                self.open = None;
                self.prompt();
            }
            "dir" | "DIR" => self.cmd_dir(arg),
            "dirt" | "DIRT" => self.cmd_dirt(arg),
            "cd" | "CD" => self.cmd_cd(arg),
            "mkd" | "MKD" => self.cmd_mkd(arg),
            "opr" | "OPR" => self.cmd_open(arg, OpenMode::Read),
            "opw" | "OPW" => self.cmd_open(arg, OpenMode::Write),
            "sek" | "SEK" => self.cmd_seek(arg),
            "rdf" | "RDF" => self.cmd_read(arg),
            "wrf" | "WRF" => self.cmd_write(arg),
            _ => self.reply("Bad Command"),
        }
    }

    fn current_dir(&self) -> Option<&SimDir> {
        lookup_dir(self.disk.as_ref()?, &self.cwd)
    }

    fn current_dir_mut(&mut self) -> Option<&mut SimDir> {
        lookup_dir_mut(self.disk.as_mut()?, &self.cwd)
    }

    fn cmd_dir(&mut self, arg: &str) {
        self.reply("");
        if arg.is_empty() {
            let mut lines = Vec::new();
            if !self.cwd.is_empty() {
                lines.push(". DIR".to_string());
                lines.push(".. DIR".to_string());
            }
            if let Some(dir) = self.current_dir() {
                for (name, node) in &dir.entries {
                    match node {
                        SimNode::Dir(_) => lines.push(format!("{} DIR", name)),
                        SimNode::File(_) => lines.push(name.clone()),
                    }
                }
            }
            for line in lines {
                self.reply(&line);
            }
            self.prompt();
            return;
        }

        let name = arg.to_uppercase();
        let line = match self.current_dir().and_then(|d| d.entries.get(&name)) {
            Some(SimNode::File(f)) => {
                let mut line = name.clone();
                for b in (f.data.len() as u32).to_le_bytes() {
                    line.push_str(" $");
                    push_hex_byte(&mut line, b);
                }
                Some(line)
            }
            Some(SimNode::Dir(_)) => Some(format!("{} DIR", name)),
            None => None,
        };
        match line {
            Some(line) => {
                self.reply(&line);
                self.prompt();
            }
            None => self.fail(),
        }
    }

    fn cmd_dirt(&mut self, arg: &str) {
        if self.firmware == Firmware::Vdap {
            self.reply("");
        }
        let name = arg.to_uppercase();
        let stamps = match self.current_dir().and_then(|d| d.entries.get(&name)) {
            Some(SimNode::File(f)) => Some((f.created, f.modified)),
            Some(SimNode::Dir(_)) => Some((DEFAULT_STAMP, DEFAULT_STAMP)),
            None => None,
        };
        let Some((created, modified)) = stamps else {
            self.fail();
            return;
        };
        let mut bytes = Vec::with_capacity(10);
        bytes.extend(modified.date.to_le_bytes());
        bytes.extend(created.time.to_le_bytes());
        bytes.extend(created.date.to_le_bytes());
        bytes.extend(modified.time.to_le_bytes());
        bytes.extend(modified.date.to_le_bytes());
        let mut line = name;
        for b in bytes {
            line.push_str(" $");
            push_hex_byte(&mut line, b);
        }
        self.reply(&line);
        self.prompt();
    }

    fn cmd_cd(&mut self, arg: &str) {
        if arg == ".." {
            if self.cwd.pop().is_some() {
                self.prompt();
            } else {
                self.fail();
            }
            return;
        }
        let name = arg.to_uppercase();
        let is_dir = matches!(
            self.current_dir().and_then(|d| d.entries.get(&name)),
            Some(SimNode::Dir(_))
        );
        if is_dir {
            self.cwd.push(name);
            self.prompt();
        } else {
            self.fail();
        }
    }

    fn cmd_mkd(&mut self, arg: &str) {
        let (name, _) = split_stamp(arg);
        let created = match self.current_dir_mut() {
            Some(dir) if !name.is_empty() && !dir.entries.contains_key(&name) => {
                dir.entries.insert(name, SimNode::Dir(SimDir::default()));
                true
            }
            _ => false,
        };
        if created {
            self.prompt();
        } else {
            self.fail();
        }
    }

    fn cmd_open(&mut self, arg: &str, mode: OpenMode) {
        if self.open.is_some() {
            self.reply("File Open");
            return;
        }
        let (name, stamp) = split_stamp(arg);
        let stamp = stamp.unwrap_or(DEFAULT_STAMP);
        let cwd = self.cwd.clone();
        let pos = match (self.current_dir_mut(), mode) {
            (Some(dir), OpenMode::Read) => match dir.entries.get(&name) {
                Some(SimNode::File(_)) => Some(0),
                _ => None,
            },
            (Some(dir), OpenMode::Write) => match dir.entries.get_mut(&name) {
                Some(SimNode::File(f)) => {
                    f.modified = stamp;
                    Some(f.data.len())
                }
                Some(SimNode::Dir(_)) => None,
                None if name.is_empty() => None,
                None => {
                    dir.entries.insert(
                        name.clone(),
                        SimNode::File(SimFile {
                            data: Vec::new(),
                            created: stamp,
                            modified: stamp,
                        }),
                    );
                    Some(0)
                }
            },
            (None, _) => None,
        };
        match pos {
            Some(pos) => {
                self.open = Some(OpenFile {
                    dir: cwd,
                    name,
                    pos,
                    mode,
                });
                self.prompt();
            }
            None => self.fail(),
        }
    }

    fn open_data(&self) -> Option<&Vec<u8>> {
        let open = self.open.as_ref()?;
        match lookup_dir(self.disk.as_ref()?, &open.dir)?.entries.get(&open.name)? {
            SimNode::File(f) => Some(&f.data),
            SimNode::Dir(_) => None,
        }
    }

    fn cmd_seek(&mut self, arg: &str) {
        let len = self.open_data().map(Vec::len);
        let target = match (arg.parse::<usize>(), len) {
            (Ok(offset), Some(len)) if offset <= len => Some(offset),
            _ => None,
        };
        match (target, self.open.as_mut()) {
            (Some(offset), Some(open)) => open.pos = offset,
            _ => return self.fail(),
        }
        self.prompt();
    }

    fn cmd_read(&mut self, arg: &str) {
        let pos = self.open.as_ref().map(|o| o.pos);
        let chunk = match (arg.parse::<usize>(), pos, self.open_data()) {
            (Ok(n), Some(pos), Some(data)) if pos + n <= data.len() => {
                Some(data[pos..pos + n].to_vec())
            }
            _ => None,
        };
        match chunk {
            Some(chunk) => {
                if let Some(open) = self.open.as_mut() {
                    open.pos += chunk.len();
                }
                self.output.extend(chunk);
                self.prompt();
            }
            None => self.fail(),
        }
    }

    fn cmd_write(&mut self, arg: &str) {
        let writable = self
            .open
            .as_ref()
            .is_some_and(|o| o.mode == OpenMode::Write);
        match arg.parse::<usize>() {
            Ok(0) if writable => self.prompt(),
            Ok(n) if writable => self.payload = Some((n, Vec::with_capacity(n))),
            _ => self.fail(),
        }
    }

    fn finish_write(&mut self, payload: Vec<u8>) {
        let Some(open) = self.open.clone() else {
            self.fail();
            return;
        };
        let file = self
            .disk
            .as_mut()
            .and_then(|root| lookup_dir_mut(root, &open.dir))
            .and_then(|dir| dir.entries.get_mut(&open.name));
        if let Some(SimNode::File(f)) = file {
            let end = open.pos + payload.len();
            if f.data.len() < end {
                f.data.resize(end, 0);
            }
            f.data[open.pos..end].copy_from_slice(&payload);
            if let Some(o) = self.open.as_mut() {
                o.pos = end;
            }
            self.prompt();
        } else {
            self.fail();
        }
    }
}

impl Transport for SimulatedDevice {
    fn try_read(&mut self) -> VdipResult<Option<u8>> {
        if self.silent {
            return Ok(None);
        }
        match self.output_budget {
            Some(0) => return Ok(None),
            Some(ref mut n) if !self.output.is_empty() => *n -= 1,
            _ => {}
        }
        Ok(self.output.pop_front())
    }

    fn try_write(&mut self, byte: u8) -> VdipResult<bool> {
        if !self.silent {
            self.receive(byte);
        }
        Ok(true)
    }
}

fn split_path(path: &str) -> (Vec<String>, String) {
    let mut parts: Vec<String> = path
        .split('/')
        .filter(|p| !p.is_empty())
        .map(str::to_uppercase)
        .collect();
    let name = parts.pop().unwrap_or_default();
    (parts, name)
}

/// Split `NAME $DDDDTTTT` into the name and the stamp.
fn split_stamp(arg: &str) -> (String, Option<FatTimestamp>) {
    let mut parts = arg.split_whitespace();
    let name = parts.next().unwrap_or("").to_uppercase();
    let stamp = parts
        .next()
        .and_then(|s| s.strip_prefix('$'))
        .filter(|hex| hex.len() == 8)
        .and_then(|hex| u32::from_str_radix(hex, 16).ok())
        .map(|v| FatTimestamp::from_raw((v >> 16) as u16, v as u16));
    (name, stamp)
}

fn lookup_dir<'a>(root: &'a SimDir, path: &[String]) -> Option<&'a SimDir> {
    let mut dir = root;
    for part in path {
        match dir.entries.get(part)? {
            SimNode::Dir(d) => dir = d,
            SimNode::File(_) => return None,
        }
    }
    Some(dir)
}

fn lookup_dir_mut<'a>(root: &'a mut SimDir, path: &[String]) -> Option<&'a mut SimDir> {
    let mut dir = root;
    for part in path {
        match dir.entries.get_mut(part)? {
            SimNode::Dir(d) => dir = d,
            SimNode::File(_) => return None,
        }
    }
    Some(dir)
}

fn make_dirs<'a>(root: &'a mut SimDir, path: &[String]) -> Option<&'a mut SimDir> {
    let mut dir = root;
    for part in path {
        let node = dir
            .entries
            .entry(part.clone())
            .or_insert_with(|| SimNode::Dir(SimDir::default()));
        match node {
            SimNode::Dir(d) => dir = d,
            SimNode::File(_) => return None,
        }
    }
    Some(dir)
}
