use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, WireError};
use crate::varint::{WIDTH_U16, WIDTH_U32, WIDTH_U8};

/// Initial capacity for freshly allocated write buffers.
pub const DEFAULT_INITIAL_CAPACITY: usize = 256;

type CommitSink = Box<dyn FnOnce(Bytes) + Send>;

/// Append-only binary buffer that becomes an immutable message on
/// [`commit`](WriteBuffer::commit).
///
/// Infallible write methods return `&mut Self` and the length-prefixed forms
/// return `Result<&mut Self>`, so writes chain either way. `commit` consumes
/// the buffer, which makes writing after hand-off impossible by construction.
/// A buffer created with [`with_sink`](WriteBuffer::with_sink) delivers its
/// frozen contents to that sink exactly once at commit time.
pub struct WriteBuffer {
    buf: BytesMut,
    sink: Option<CommitSink>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            sink: None,
        }
    }

    /// A buffer whose committed contents are handed to `sink`.
    pub fn with_sink(sink: impl FnOnce(Bytes) + Send + 'static) -> Self {
        Self {
            buf: BytesMut::with_capacity(DEFAULT_INITIAL_CAPACITY),
            sink: Some(Box::new(sink)),
        }
    }

    /// A buffer whose commit goes nowhere. Handed out by channels that are
    /// already closed so late writers stay harmless.
    pub fn detached() -> Self {
        Self {
            buf: BytesMut::new(),
            sink: None,
        }
    }

    /// Make room for at least `additional` more bytes. Existing content is
    /// untouched; the writes below also grow the buffer on demand, so this
    /// is purely a reallocation hint.
    pub fn ensure_capacity(&mut self, additional: usize) -> &mut Self {
        self.buf.reserve(additional);
        self
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.buf.put_u16_le(value);
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32_le(value);
        self
    }

    /// Append a length as a width marker byte plus the smallest fitting
    /// unsigned width. Values above `u32::MAX` have no wire encoding and
    /// are rejected rather than truncated.
    pub fn write_length(&mut self, value: usize) -> Result<&mut Self> {
        let value =
            u32::try_from(value).map_err(|_| WireError::LengthOutOfRange(value as u64))?;
        if value <= u8::MAX as u32 {
            self.buf.put_u8(WIDTH_U8);
            self.buf.put_u8(value as u8);
        } else if value <= u16::MAX as u32 {
            self.buf.put_u8(WIDTH_U16);
            self.buf.put_u16_le(value as u16);
        } else {
            self.buf.put_u8(WIDTH_U32);
            self.buf.put_u32_le(value);
        }
        Ok(self)
    }

    /// Append a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, value: &str) -> Result<&mut Self> {
        self.write_length(value.len())?;
        self.buf.put_slice(value.as_bytes());
        Ok(self)
    }

    /// Append a length-prefixed byte range.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<&mut Self> {
        self.write_length(value.len())?;
        self.buf.put_slice(value);
        Ok(self)
    }

    /// Append raw bytes with no length prefix. Used for splicing
    /// pre-encoded headers in front of a payload.
    pub fn write_raw(&mut self, value: &[u8]) -> &mut Self {
        self.buf.put_slice(value);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Freeze the contents, hand them to the commit sink if one is
    /// attached, and return them.
    pub fn commit(self) -> Bytes {
        let WriteBuffer { buf, sink } = self;
        let bytes = buf.freeze();
        if let Some(sink) = sink {
            sink(bytes.clone());
        }
        bytes
    }
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WriteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBuffer")
            .field("len", &self.buf.len())
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}
