use std::collections::HashMap;
use std::sync::Arc;

use msgplex_channel::{Channel, ChannelMultiplexer};
use tracing::{debug, warn};

use crate::protocol::RpcHandler;
use crate::proxy::{ProxyFactory, RpcProxy};

/// A named endpoint reachable over a multiplexer.
pub trait ConnectionHandler: Send + Sync {
    /// Channel id this handler serves.
    fn path(&self) -> &str;

    /// Take ownership of an accepted channel.
    fn on_connection(&self, channel: Channel);
}

/// [`ConnectionHandler`] that serves an RPC target behind a path.
///
/// The factory closure runs once per connection. It receives a proxy to
/// the connecting peer and returns the target handling that peer, so
/// services that call back get their return path for free.
pub struct RpcConnectionHandler<F> {
    path: String,
    target_factory: F,
}

impl<F> RpcConnectionHandler<F>
where
    F: Fn(RpcProxy) -> Arc<dyn RpcHandler> + Send + Sync,
{
    pub fn new(path: impl Into<String>, target_factory: F) -> Self {
        Self {
            path: path.into(),
            target_factory,
        }
    }
}

impl<F> ConnectionHandler for RpcConnectionHandler<F>
where
    F: Fn(RpcProxy) -> Arc<dyn RpcHandler> + Send + Sync,
{
    fn path(&self) -> &str {
        &self.path
    }

    fn on_connection(&self, channel: Channel) {
        let factory = ProxyFactory::new();
        let target = (self.target_factory)(factory.proxy());
        factory.set_target(target);
        // The connection keeps itself alive after the factory goes away.
        factory.listen(channel);
    }
}

impl<F> std::fmt::Debug for RpcConnectionHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcConnectionHandler")
            .field("path", &self.path)
            .finish()
    }
}

/// Routes accepted multiplexer channels to handlers by channel id.
pub struct ConnectionRouter {
    handlers: HashMap<String, Arc<dyn ConnectionHandler>>,
}

impl ConnectionRouter {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` under its path. A later registration for the
    /// same path replaces the earlier one.
    pub fn register(&mut self, handler: Arc<dyn ConnectionHandler>) {
        self.handlers.insert(handler.path().to_owned(), handler);
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.handlers.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Hand `channel` to the handler registered under its id. A channel
    /// for an unregistered path is closed and `false` returned.
    pub fn route(&self, channel: Channel) -> bool {
        match self.handlers.get(channel.id()) {
            Some(handler) => {
                debug!(path = channel.id(), "routing channel");
                handler.on_connection(channel);
                true
            }
            None => {
                warn!(path = channel.id(), "no handler registered for path");
                channel.close();
                false
            }
        }
    }

    /// Accept and route channels until the multiplexer shuts down.
    pub async fn serve(&self, mux: &mut ChannelMultiplexer) {
        while let Some(channel) = mux.accept().await {
            self.route(channel);
        }
        debug!("multiplexer closed, router done");
    }
}

impl Default for ConnectionRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRouter")
            .field("paths", &self.paths())
            .finish()
    }
}
