//! Directory entries as reported by the `dir` command.

use crate::timestamp::FatTimestamp;

/// How much detail a directory listing gathers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListMode {
    /// Names only: a single `dir` exchange.
    Brief,
    /// Names, then `dir`/`dirt` per file for size and date.
    #[default]
    Full,
}

/// One line of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirEntry {
    /// Base name, at most 8 characters.
    pub name: String,
    /// Extension without the dot, at most 3 characters.
    pub ext: String,
    pub is_dir: bool,
    /// Size in bytes (0 for directories and brief listings).
    pub size: u32,
    /// Last modification, when known.
    pub modified: Option<FatTimestamp>,
}

impl DirEntry {
    /// Parse one line of bare `dir` output: `NAME.EXT`, `NAME`, or
    /// `NAME DIR` for a subdirectory.
    pub fn parse_listing(line: &str) -> Self {
        if let Some(pos) = line.find(" DIR") {
            return Self {
                name: truncate(&line[..pos], 8),
                is_dir: true,
                ..Self::default()
            };
        }
        match line.split_once('.') {
            Some((name, ext)) => Self {
                name: truncate(name, 8),
                ext: truncate(ext, 3),
                ..Self::default()
            },
            None => Self {
                name: truncate(line, 8),
                ..Self::default()
            },
        }
    }

    /// `NAME.EXT`, or just `NAME` when there is no extension.
    pub fn file_name(&self) -> String {
        if self.ext.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.ext)
        }
    }

    /// `.` and `..` pseudo-entries of a subdirectory.
    pub fn is_dot(&self) -> bool {
        self.is_dir && (self.name == "." || self.name == "..")
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Characters a FAT short name may hold besides letters and digits.
const FAT_EXTRA: &str = "$#@!%'`(){}~^-_&";

/// Host file name to the 8.3 form the drive stores.
///
/// A drive prefix (`A:`, `SY0:`) is dropped, letters are uppercased,
/// characters FAT cannot hold are removed, and the base name and
/// extension are cut to 8 and 3. A name with nothing left becomes `_`.
///
/// # Examples
/// ```
/// use vdip_core::to_8_3;
/// assert_eq!(to_8_3("hello.txt"), "HELLO.TXT");
/// assert_eq!(to_8_3("VeryLongName.extension"), "VERYLONG.EXT");
/// assert_eq!(to_8_3("A:noext"), "NOEXT");
/// ```
pub fn to_8_3(filename: &str) -> String {
    let bare = filename.rsplit(':').next().unwrap_or(filename);
    let (base, ext) = bare.rsplit_once('.').unwrap_or((bare, ""));

    let mut out = short_part(base, 8);
    if out.is_empty() {
        out.push('_');
    }
    let ext = short_part(ext, 3);
    if !ext.is_empty() {
        out.push('.');
        out.push_str(&ext);
    }
    out
}

fn short_part(part: &str, max: usize) -> String {
    part.chars()
        .map(|c| c.to_ascii_uppercase())
        .filter(|&c| c.is_ascii_alphanumeric() || FAT_EXTRA.contains(c))
        .take(max)
        .collect()
}
