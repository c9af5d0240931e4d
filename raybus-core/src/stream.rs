use crate::{CodecError, CodecResult};

/// Position operations for [`BufferStream::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Absolute position, clamped to the stream length
    Set,
    /// Relative to the current position, clamped to the stream length
    Cur,
    /// The end of the stream
    End,
    /// Discard all content: length and position both become 0
    Reset,
}

/// An in-memory byte stream with a position cursor.
///
/// Streams are growable by default; [`BufferStream::with_capacity`]
/// creates a fixed-size stream whose writes fail with
/// [`CodecError::MsgSize`] instead of reallocating.
///
/// Writes happen at the cursor and extend the logical length when they
/// run past it. Reads return the bytes between the cursor and the
/// logical length.
#[derive(Debug, Default)]
pub struct BufferStream {
    buffer: Vec<u8>,
    len: usize,
    pos: usize,
    capacity: Option<usize>,
}

impl BufferStream {
    /// Create a growable stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fixed-capacity stream of `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity],
            len: 0,
            pos: 0,
            capacity: Some(capacity),
        }
    }

    /// Write `data` at the cursor, extending the stream as needed.
    ///
    /// Returns the number of bytes written.
    pub fn write(&mut self, data: &[u8]) -> CodecResult<usize> {
        let end = self.pos + data.len();
        if end > self.buffer.len() {
            match self.capacity {
                Some(_) => return Err(CodecError::MsgSize),
                None => self.buffer.resize(end, 0),
            }
        }
        self.buffer[self.pos..end].copy_from_slice(data);
        self.pos = end;
        if self.pos > self.len {
            self.len = self.pos;
        }
        Ok(data.len())
    }

    /// The bytes between the cursor and the end of the stream.
    pub fn remaining(&self) -> &[u8] {
        &self.buffer[self.pos..self.len]
    }

    /// Advance the cursor by `count` bytes (clamped to the length).
    pub fn consume(&mut self, count: usize) {
        self.pos = (self.pos + count).min(self.len);
    }

    /// Move the cursor. Returns the new position.
    pub fn seek(&mut self, pos: usize, whence: Whence) -> usize {
        match whence {
            Whence::Set => self.pos = pos.min(self.len),
            Whence::Cur => self.pos = (self.pos + pos).min(self.len),
            Whence::End => self.pos = self.len,
            Whence::Reset => {
                self.pos = 0;
                self.len = 0;
            }
        }
        self.pos
    }

    /// The current cursor position.
    pub fn tell(&self) -> usize {
        self.pos
    }

    /// The logical stream length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the stream holds no content.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the cursor is at or past the end of content.
    pub fn is_eof(&self) -> bool {
        self.pos >= self.len
    }

    /// Discard all content and rewind the cursor.
    pub fn truncate(&mut self) {
        self.pos = 0;
        self.len = 0;
    }
}
