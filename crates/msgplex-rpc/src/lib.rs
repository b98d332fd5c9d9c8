//! Request/reply and notification RPC over msgplex channels.
//!
//! [`RpcProtocol`] drives one channel: it correlates requests with replies
//! by id, dispatches incoming requests to an [`RpcHandler`], and forwards
//! cancellation in both directions. [`RpcProxy`] puts a call-shaped face on
//! a protocol, including deferred attachment so a proxy can exist before
//! its connection does, and [`ConnectionRouter`] maps multiplexed channel
//! ids to services.

pub mod error;
pub mod protocol;
pub mod proxy;
pub mod router;

pub use error::{Result, RpcError};
pub use protocol::{ProtocolConfig, RpcHandler, RpcMode, RpcProtocol, CANCELLATION_TOKEN_KEY};
pub use proxy::{is_notify_method, ProxyFactory, RpcProxy};
pub use router::{ConnectionHandler, ConnectionRouter, RpcConnectionHandler};

// Handler implementations need these on every signature.
pub use futures_core::future::BoxFuture;
pub use msgplex_codec::{MessageCodec, RpcFailure, Value};
pub use tokio_util::sync::CancellationToken;
