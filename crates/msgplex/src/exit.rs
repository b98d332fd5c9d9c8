use std::fmt;
use std::io;

use msgplex_channel::ChannelError;
use msgplex_rpc::RpcError;
use msgplex_transport::TransportError;

// Exit code constants shared across subcommands.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source) => io_error(context, source),
        other @ TransportError::PathTooLong { .. } => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {other}"))
        }
    }
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    match err {
        ChannelError::DuplicateOpen(_) => CliError::new(USAGE, format!("{context}: {err}")),
        ChannelError::Closed(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        ChannelError::Wire(_) | ChannelError::UnknownFrameType(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
    }
}

pub fn rpc_error(context: &str, err: RpcError) -> CliError {
    match err {
        RpcError::Codec(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        RpcError::ChannelClosed(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        RpcError::ModeMismatch { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        // Remote and application errors already carry their own story.
        RpcError::Remote { .. } | RpcError::Response { .. } => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}
