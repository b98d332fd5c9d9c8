use bytes::Bytes;

use crate::error::{Result, WireError};
use crate::varint::{WIDTH_U16, WIDTH_U32, WIDTH_U8};

/// Positional read cursor over one received message.
///
/// Cloning yields an independent cursor over the same underlying storage;
/// no bytes are copied. Reads past the end produce
/// [`WireError::OutOfBounds`] rather than panicking.
#[derive(Debug, Clone)]
pub struct ReadBuffer {
    bytes: Bytes,
    offset: usize,
}

impl ReadBuffer {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            offset: 0,
        }
    }

    fn take(&mut self, wanted: usize) -> Result<Bytes> {
        let end = self
            .offset
            .checked_add(wanted)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(WireError::OutOfBounds {
                offset: self.offset,
                wanted,
                len: self.bytes.len(),
            })?;
        let out = self.bytes.slice(self.offset..end);
        self.offset = end;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let bytes = self.take(1)?;
        Ok(bytes[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a width-marked length written by
    /// [`WriteBuffer::write_length`](crate::write::WriteBuffer::write_length).
    pub fn read_length(&mut self) -> Result<usize> {
        let at = self.offset;
        let marker = self.read_u8()?;
        let value = match marker {
            WIDTH_U8 => self.read_u8()? as u32,
            WIDTH_U16 => self.read_u16()? as u32,
            WIDTH_U32 => self.read_u32()?,
            other => {
                return Err(WireError::InvalidWidthMarker {
                    marker: other,
                    offset: at,
                })
            }
        };
        Ok(value as usize)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        let text = std::str::from_utf8(&bytes)?;
        Ok(text.to_owned())
    }

    /// Read a length-prefixed byte range as a zero-copy slice.
    pub fn read_bytes(&mut self) -> Result<Bytes> {
        let len = self.read_length()?;
        self.take(len)
    }

    /// Read `len` raw bytes with no length prefix.
    pub fn read_raw(&mut self, len: usize) -> Result<Bytes> {
        self.take(len)
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Independent buffer over the unread remainder. Shares storage with
    /// this one; the two cursors do not affect each other afterwards.
    pub fn slice_at_read_position(&self) -> ReadBuffer {
        ReadBuffer {
            bytes: self.bytes.slice(self.offset..),
            offset: 0,
        }
    }
}

impl From<Bytes> for ReadBuffer {
    fn from(bytes: Bytes) -> Self {
        Self::new(bytes)
    }
}
