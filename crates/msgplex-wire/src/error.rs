/// Errors that can occur while reading or writing wire buffers.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// A read ran past the end of the buffer.
    #[error("read past end of buffer (offset {offset}, wanted {wanted}, len {len})")]
    OutOfBounds {
        offset: usize,
        wanted: usize,
        len: usize,
    },

    /// A length marker byte was not one of the known width markers.
    #[error("invalid length width marker {marker:#04x} at offset {offset}")]
    InvalidWidthMarker { marker: u8, offset: usize },

    /// A length does not fit the 32-bit wire limit.
    #[error("length {0} exceeds the u32 wire limit")]
    LengthOutOfRange(u64),

    /// A length-prefixed string was not valid UTF-8.
    #[error("string payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

pub type Result<T> = std::result::Result<T, WireError>;
