//! Multiplexed RPC messaging over local sockets.
//!
//! msgplex moves tagged values between local processes: a binary wire
//! format, logical channels multiplexed over one connection, and
//! request/reply RPC with notifications and cooperative cancellation.
//!
//! # Crate Structure
//!
//! - [`wire`] — Binary read/write buffers and length-prefixed primitives
//! - [`codec`] — Tagged value codec and RPC message encoding
//! - [`channel`] — Channels, multiplexing and byte-stream binding
//! - [`transport`] — Unix domain socket listener and connector
//! - [`rpc`] — Request/reply protocol, proxies and connection routing

/// Re-export wire types.
pub mod wire {
    pub use msgplex_wire::*;
}

/// Re-export codec types.
pub mod codec {
    pub use msgplex_codec::*;
}

/// Re-export channel types.
pub mod channel {
    pub use msgplex_channel::*;
}

/// Re-export transport types.
pub mod transport {
    pub use msgplex_transport::*;
}

/// Re-export rpc types.
pub mod rpc {
    pub use msgplex_rpc::*;
}
