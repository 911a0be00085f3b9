//! `$XX` hex token fields in firmware responses.
//!
//! In ASCII mode the firmware reports numbers as space separated tokens
//! such as `$1A $00 $00 $00`, least significant byte first.

/// Decode one upper-case (or lower-case) hex digit.
fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

/// Scan `s` for up to `max` tokens of the form `$XX` and return their
/// values in order. A `$` not followed by two hex digits is skipped.
pub fn scan_hex_tokens(s: &str, max: usize) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut values = Vec::with_capacity(max);
    let mut i = 0;
    while values.len() < max {
        let Some(offset) = bytes[i..].iter().position(|&b| b == b'$') else {
            break;
        };
        let at = i + offset;
        let hi = bytes.get(at + 1).copied().and_then(hex_digit);
        let lo = bytes.get(at + 2).copied().and_then(hex_digit);
        match (hi, lo) {
            (Some(hi), Some(lo)) => {
                values.push(hi << 4 | lo);
                i = at + 3;
            }
            _ => i = at + 1,
        }
    }
    values
}

/// Append `byte` as two upper-case hex digits.
pub fn push_hex_byte(out: &mut String, byte: u8) {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    out.push(DIGITS[(byte >> 4) as usize] as char);
    out.push(DIGITS[(byte & 0x0F) as usize] as char);
}

/// The part of a `dir`/`dirt` result line after the file name.
pub fn fields_after_name(line: &str) -> &str {
    match line.find(' ') {
        Some(pos) => &line[pos..],
        None => "",
    }
}
