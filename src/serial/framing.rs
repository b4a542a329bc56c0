//! # Line Framing
//!
//! Splits the raw serial byte stream into text lines.

use bytes::{Buf, BytesMut};
use tracing::warn;

/// Accumulates serial bytes and hands out complete lines
///
/// Lines end with `\n`; a trailing `\r` is stripped. Invalid UTF-8 sequences
/// are dropped rather than failing the line.
#[derive(Debug)]
pub struct LineFramer {
    buf: BytesMut,
    max_line_bytes: usize,
}

impl LineFramer {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_line_bytes.min(4096)),
            max_line_bytes,
        }
    }

    /// Append freshly read bytes
    ///
    /// If the pending, unterminated data grows past the line limit it is
    /// thrown away; the device is babbling or running at the wrong baud rate.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);

        if self.buf.len() > self.max_line_bytes && !self.buf.contains(&b'\n') {
            warn!(
                "Discarding {} bytes of unterminated serial data (limit {})",
                self.buf.len(),
                self.max_line_bytes
            );
            self.buf.clear();
        }
    }

    /// Pop the next complete line, if any
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut raw = self.buf.split_to(pos + 1);
        raw.truncate(pos);
        if raw.last() == Some(&b'\r') {
            raw.truncate(raw.len() - 1);
        }

        Some(decode_ignoring_errors(&raw))
    }

    /// Drop any partial line, e.g. after a disconnect
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Number of buffered bytes not yet returned as a line
    pub fn pending(&self) -> usize {
        self.buf.remaining()
    }
}

/// Decode UTF-8, silently skipping malformed byte sequences
pub fn decode_ignoring_errors(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        let mut framer = LineFramer::new(64);
        framer.push(b"21.5;40.2;800;3.3\n");
        assert_eq!(framer.next_line().as_deref(), Some("21.5;40.2;800;3.3"));
        assert_eq!(framer.next_line(), None);
    }

    #[test]
    fn test_crlf_is_stripped() {
        let mut framer = LineFramer::new(64);
        framer.push(b"1;2;3;4\r\n");
        assert_eq!(framer.next_line().as_deref(), Some("1;2;3;4"));
    }

    #[test]
    fn test_line_split_across_reads() {
        let mut framer = LineFramer::new(64);
        framer.push(b"21.5;4");
        assert_eq!(framer.next_line(), None);
        assert_eq!(framer.pending(), 6);
        framer.push(b"0.2\n22");
        assert_eq!(framer.next_line().as_deref(), Some("21.5;40.2"));
        assert_eq!(framer.pending(), 2);
    }

    #[test]
    fn test_multiple_lines_in_one_read() {
        let mut framer = LineFramer::new(64);
        framer.push(b"a\nb\n\nc\n");
        assert_eq!(framer.next_line().as_deref(), Some("a"));
        assert_eq!(framer.next_line().as_deref(), Some("b"));
        assert_eq!(framer.next_line().as_deref(), Some(""));
        assert_eq!(framer.next_line().as_deref(), Some("c"));
        assert_eq!(framer.next_line(), None);
    }

    #[test]
    fn test_invalid_utf8_is_dropped() {
        let mut framer = LineFramer::new(64);
        framer.push(b"2\xff1.5;\xc3\x28ok\n");
        assert_eq!(framer.next_line().as_deref(), Some("21.5;(ok"));
    }

    #[test]
    fn test_overlong_garbage_is_discarded() {
        let mut framer = LineFramer::new(16);
        framer.push(&[b'x'; 32]);
        assert_eq!(framer.pending(), 0);
        framer.push(b"ok\n");
        assert_eq!(framer.next_line().as_deref(), Some("ok"));
    }

    #[test]
    fn test_clear_drops_partial_line() {
        let mut framer = LineFramer::new(64);
        framer.push(b"partial");
        framer.clear();
        framer.push(b"fresh\n");
        assert_eq!(framer.next_line().as_deref(), Some("fresh"));
    }
}
