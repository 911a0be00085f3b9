//! Text output for the `vdip` commands.

use vdip_core::DirEntry;

/// Width of the right-aligned size column.
const SIZE_WIDTH: usize = 14;

/// `n` with a comma every three digits.
pub fn comma_format(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// `NAME    .EXT    ` or `NAME     <DIR>  `.
fn name_column(entry: &DirEntry) -> String {
    if entry.is_dir {
        format!("{:<8} <DIR>  ", entry.name)
    } else {
        format!("{:<8}.{:<3}    ", entry.name, entry.ext)
    }
}

/// One line of a full listing.
pub fn listing_line(entry: &DirEntry) -> String {
    let mut line = name_column(entry);
    if entry.is_dir {
        return line.trim_end().to_string();
    }
    line.push_str(&format!(
        "{:>width$}  ",
        comma_format(u64::from(entry.size)),
        width = SIZE_WIDTH
    ));
    if let Some(ts) = entry.modified {
        line.push_str(&ts.date_string());
        if ts.time != 0 {
            line.push_str("  ");
            line.push_str(&ts.time_string());
        }
    }
    line.trim_end().to_string()
}

fn file_count(entries: &[DirEntry]) -> usize {
    entries.iter().filter(|e| !e.is_dir).count()
}

/// Full listing: one entry per line, then the file count.
pub fn full_listing(entries: &[DirEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&listing_line(entry));
        out.push('\n');
    }
    out.push_str(&format!("\n{} Files\n", file_count(entries)));
    out
}

/// Brief listing: names four to a line, then the file count.
pub fn brief_listing(entries: &[DirEntry]) -> String {
    let mut out = String::new();
    for (i, entry) in entries.iter().enumerate() {
        out.push_str(&name_column(entry));
        if (i + 1) % 4 == 0 {
            out.push('\n');
        }
    }
    if entries.len() % 4 != 0 {
        out.push('\n');
    }
    out.push_str(&format!("\n{} Files\n", file_count(entries)));
    out
}

/// `USB:NAME          1,234 bytes`
pub fn transfer_line(name: &str, bytes: u64) -> String {
    format!("USB:{:<12}  {} bytes", name, comma_format(bytes))
}
