//! Sequential reader/writer over a growable byte buffer.
//!
//! All multi-byte integers are little endian; strings are NUL-terminated
//! UTF-8. The read cursor is independent of the write end, so a decoder can
//! consume a prefix while an encoder appends. Reading past the end fails
//! with [`DebugError::ShortRead`], which callers treat as "wait for more
//! bytes", not as corruption.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{DebugError, Result};

/// Growable byte buffer with an independent read cursor.
#[derive(Debug, Default, Clone)]
pub struct WireBuffer {
    buf: BytesMut,
    read_pos: usize,
}

impl WireBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer over a copy of `data` with the cursor at the start.
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            buf: BytesMut::from(data),
            read_pos: 0,
        }
    }

    /// Total bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Current read cursor position.
    #[inline]
    pub fn read_offset(&self) -> usize {
        self.read_pos
    }

    /// Bytes remaining between the read cursor and the write end.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.read_pos
    }

    /// The whole buffer, ignoring the read cursor.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Freeze into immutable bytes (whole buffer, cursor discarded).
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    fn take(&mut self, count: usize) -> Result<&[u8]> {
        if self.remaining() < count {
            return Err(DebugError::ShortRead);
        }
        let start = self.read_pos;
        self.read_pos += count;
        Ok(&self.buf[start..self.read_pos])
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i64_le(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Consume bytes up to and including the next NUL, returning the
    /// preceding bytes as UTF-8. Fails with `ShortRead` when no NUL has
    /// arrived yet.
    pub fn read_cstring(&mut self) -> Result<String> {
        let rest = &self.buf[self.read_pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(DebugError::ShortRead)?;
        let text = std::str::from_utf8(&rest[..nul])
            .map_err(|e| DebugError::Decode(format!("invalid UTF-8 in string: {e}")))?
            .to_string();
        self.read_pos += nul + 1;
        Ok(text)
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_u32_le(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn write_i32_le(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn write_i64_le(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    /// Write the string bytes followed by a NUL terminator.
    pub fn write_cstring(&mut self, value: &str) {
        self.buf.put_slice(value.as_bytes());
        self.buf.put_u8(0);
    }

    /// Insert a u32 LE at the very front of the buffer. Request and
    /// response headers are prepended after the body length is known.
    pub fn insert_u32_le_at_front(&mut self, value: u32) {
        let mut rebuilt = BytesMut::with_capacity(self.buf.len() + 4);
        rebuilt.put_u32_le(value);
        rebuilt.extend_from_slice(&self.buf);
        self.buf = rebuilt;
        self.read_pos += 4;
    }
}
