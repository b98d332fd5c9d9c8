use msgplex_channel::CloseReason;
use msgplex_codec::CodecError;

use crate::protocol::RpcMode;

/// Errors surfaced to RPC callers.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// A message failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The underlying channel closed before the call completed.
    #[error("channel closed: {0}")]
    ChannelClosed(CloseReason),

    /// The operation is not available in the protocol's mode.
    #[error("{operation} not allowed in {mode:?} mode")]
    ModeMismatch {
        mode: RpcMode,
        operation: &'static str,
    },

    /// The remote handler failed. `stack` carries the remote stack trace
    /// when one was serialized.
    #[error("{name}: {message}")]
    Remote {
        name: String,
        message: String,
        stack: Option<String>,
    },

    /// The remote handler answered with a typed application error.
    #[error("{message} (code {code})")]
    Response {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },
}

pub type Result<T> = std::result::Result<T, RpcError>;
