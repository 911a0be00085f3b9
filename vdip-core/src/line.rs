//! Line protocol: ASCII commands out, CR-terminated response lines in.

use std::borrow::Cow;
use std::time::Duration;

use tracing::debug;

use crate::clock::Clock;
use crate::error::{VdipError, VdipResult};
use crate::transport::{ByteLink, Transport};

/// Size of the response line buffer, terminator included.
pub const LINE_CAPACITY: usize = 128;

/// Command and response line terminator.
pub const CR: u8 = b'\r';

/// Fixed-size holder for the most recent response line.
#[derive(Clone)]
pub struct LineBuffer {
    bytes: [u8; LINE_CAPACITY],
    len: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self {
            bytes: [0; LINE_CAPACITY],
            len: 0,
        }
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Longest line that fits (one slot is reserved for the terminator).
    pub const fn max_line() -> usize {
        LINE_CAPACITY - 1
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    fn push(&mut self, byte: u8) -> VdipResult<()> {
        if self.len >= Self::max_line() {
            return Err(VdipError::LineOverflow(Self::max_line()));
        }
        self.bytes[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    pub fn is(&self, expected: &str) -> bool {
        self.as_bytes() == expected.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl std::fmt::Debug for LineBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LineBuffer").field(&self.text()).finish()
    }
}

/// Line-oriented access to the device.
pub struct LineLink<T: Transport, C: Clock> {
    link: ByteLink<T, C>,
    line: LineBuffer,
}

impl<T: Transport, C: Clock> LineLink<T, C> {
    pub fn new(link: ByteLink<T, C>) -> Self {
        Self {
            link,
            line: LineBuffer::new(),
        }
    }

    pub fn bytes(&mut self) -> &mut ByteLink<T, C> {
        &mut self.link
    }

    pub fn byte_link(&self) -> &ByteLink<T, C> {
        &self.link
    }

    pub fn into_byte_link(self) -> ByteLink<T, C> {
        self.link
    }

    /// The line most recently read. After a failed read it holds whatever
    /// arrived before the failure.
    pub fn line(&self) -> &LineBuffer {
        &self.line
    }

    /// Send `text` byte by byte. The caller supplies any trailing CR. On
    /// timeout, bytes already sent stay sent.
    pub fn send_line(&mut self, text: &str, budget: Duration) -> VdipResult<()> {
        debug!(command = %text.trim_end_matches('\r'), "send");
        for &b in text.as_bytes() {
            self.link.write_byte(b, budget)?;
        }
        Ok(())
    }

    /// Read bytes up to `terminator`, which is consumed but not stored.
    pub fn read_line(&mut self, terminator: u8, budget: Duration) -> VdipResult<&LineBuffer> {
        self.line.clear();
        loop {
            let b = self.link.read_byte(budget)?;
            if b == terminator {
                debug!(response = %self.line.text(), "recv");
                return Ok(&self.line);
            }
            self.line.push(b)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sim::ScriptedTransport;

    fn link_with_input(input: &[u8]) -> LineLink<ScriptedTransport, ManualClock> {
        LineLink::new(ByteLink::new(
            ScriptedTransport::with_input(input),
            ManualClock::default(),
        ))
    }

    const BUDGET: Duration = Duration::from_millis(50);

    #[test]
    fn test_read_line_strips_terminator() {
        let mut link = link_with_input(b"D:\\>\rE\r");
        assert!(link.read_line(CR, BUDGET).unwrap().is("D:\\>"));
        assert!(link.read_line(CR, BUDGET).unwrap().is("E"));
    }

    #[test]
    fn test_read_line_any_length_that_fits() {
        for len in [0usize, 1, 64, LineBuffer::max_line()] {
            let body: Vec<u8> = (0..len).map(|i| b'A' + (i % 26) as u8).collect();
            let mut input = body.clone();
            input.push(CR);
            let mut link = link_with_input(&input);
            assert_eq!(link.read_line(CR, BUDGET).unwrap().as_bytes(), &body[..]);
        }
    }

    #[test]
    fn test_read_line_custom_terminator() {
        let mut link = link_with_input(b"abc;rest");
        assert!(link.read_line(b';', BUDGET).unwrap().is("abc"));
    }

    #[test]
    fn test_read_line_timeout_keeps_partial() {
        let mut link = link_with_input(b"Comm");
        assert!(matches!(
            link.read_line(CR, BUDGET),
            Err(VdipError::Timeout(_))
        ));
        assert!(link.line().is("Comm"));
    }

    #[test]
    fn test_read_line_overflow_is_error() {
        let mut input = vec![b'x'; LINE_CAPACITY];
        input.push(CR);
        let mut link = link_with_input(&input);
        assert!(matches!(
            link.read_line(CR, BUDGET),
            Err(VdipError::LineOverflow(127))
        ));
        assert_eq!(link.line().len(), LineBuffer::max_line());
    }

    #[test]
    fn test_send_line() {
        let mut link = link_with_input(b"");
        link.send_line("ipa\r", BUDGET).unwrap();
        assert_eq!(link.byte_link().transport().written(), b"ipa\r");
    }
}
