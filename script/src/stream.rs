//! Source stream handed to the compiler.

use log::trace;

/// Where the source text comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// In-memory buffer (a shell line).
    Memory,
}

/// Cursor over a source buffer.
///
/// Created per statement and released as soon as compilation finishes.
#[derive(Debug)]
pub struct StreamSource<'a> {
    buffer: &'a str,
    cursor: usize,
    kind: SourceKind,
}

impl<'a> StreamSource<'a> {
    /// Stream over an in-memory buffer.
    pub fn memory(buffer: &'a str) -> Self {
        StreamSource {
            buffer,
            cursor: 0,
            kind: SourceKind::Memory,
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Current read position in bytes.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Whether every byte has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.buffer.len()
    }

    /// Read the next character.
    pub fn next_char(&mut self) -> Option<char> {
        let ch = self.buffer[self.cursor..].chars().next()?;
        self.cursor += ch.len_utf8();
        Some(ch)
    }

    /// Consume and return everything not yet read.
    pub fn read_to_end(&mut self) -> &'a str {
        let rest = &self.buffer[self.cursor..];
        self.cursor = self.buffer.len();
        rest
    }

    /// Release the stream.
    pub fn release(self) {
        trace!("[STREAM] released {:?} source at {}/{}", self.kind, self.cursor, self.buffer.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_advances() {
        let mut source = StreamSource::memory("ab");
        assert_eq!(source.kind(), SourceKind::Memory);
        assert_eq!(source.next_char(), Some('a'));
        assert_eq!(source.cursor(), 1);
        assert_eq!(source.read_to_end(), "b");
        assert!(source.is_exhausted());
        assert_eq!(source.next_char(), None);
        source.release();
    }
}
