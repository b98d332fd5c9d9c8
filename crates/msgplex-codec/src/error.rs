use msgplex_wire::WireError;

/// Errors that can occur while encoding or decoding values and messages.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A buffer-level read or write failed.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// A value tag arrived with no registered decoder.
    #[error("no decoder registered for tag {0}")]
    UnknownTag(u32),

    /// A codec was registered under a tag that is already taken.
    #[error("value codec tag {0} is already registered")]
    DuplicateTag(u32),

    /// The message kind byte was not a known RPC message type.
    #[error("unknown rpc message type {0:#04x}")]
    UnknownMessageType(u8),

    /// The message decoded, but its body had the wrong shape.
    #[error("malformed rpc message: {0}")]
    Malformed(String),

    /// A value could not be serialized.
    #[error("value could not be encoded: {0}")]
    Encode(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;
