use msgplex_wire::WireError;

use crate::channel::CloseReason;

/// Errors from channel and multiplexer operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// A buffer-level read or write failed.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Opening a channel id that is already open or being opened.
    #[error("channel {0:?} is already open or pending")]
    DuplicateOpen(String),

    /// The operation needs a live channel, but it has closed.
    #[error("channel closed: {0}")]
    Closed(CloseReason),

    /// A multiplexer frame carried an unknown type byte.
    #[error("unknown multiplexer frame type {0:#04x}")]
    UnknownFrameType(u8),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
