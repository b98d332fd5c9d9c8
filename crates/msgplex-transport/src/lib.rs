//! Socket transport for msgplex.
//!
//! Bootstraps Unix domain socket listeners and connections. The streams
//! produced here are plain tokio streams; `msgplex-channel::from_stream`
//! turns them into message channels.

pub mod error;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};

#[cfg(unix)]
pub use uds::{connect, peer_credentials, PeerCredentials, UdsListener};
