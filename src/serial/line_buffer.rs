//! Accumulates partial serial reads until a line terminator arrives

use tracing::warn;

/// Longest line kept while waiting for a terminator
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Buffers input across reads and hands out complete lines one at a time.
///
/// `\n` terminates a line; a `\r` right before it is stripped as well.
#[derive(Debug)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(1024),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);

        if self.buffer.len() > MAX_LINE_LEN && !self.buffer.contains(&b'\n') {
            warn!(
                "Discarding {} buffered bytes without line terminator",
                self.buffer.len()
            );
            self.buffer.clear();
        }
    }

    /// Pops the oldest complete line, terminator stripped
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_reads_are_joined() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"{\"contr");
        assert_eq!(buffer.next_line(), None);
        buffer.push(b"oller_watts\": 10}\n");
        assert_eq!(
            buffer.next_line().as_deref(),
            Some("{\"controller_watts\": 10}")
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn one_chunk_many_lines() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"first\r\nsecond\nthi");
        assert_eq!(buffer.next_line().as_deref(), Some("first"));
        assert_eq!(buffer.next_line().as_deref(), Some("second"));
        assert_eq!(buffer.next_line(), None);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn runaway_line_is_discarded() {
        let mut buffer = LineBuffer::new();
        buffer.push(&vec![b'x'; MAX_LINE_LEN + 1]);
        assert!(buffer.is_empty());
    }
}
