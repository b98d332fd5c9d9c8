use std::sync::{Arc, Mutex};

use futures_core::future::BoxFuture;
use msgplex_channel::Channel;
use msgplex_codec::{RpcFailure, Value};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, RpcError};
use crate::protocol::{lock, RpcHandler, RpcProtocol};

/// Whether `method` is dispatched as a notification by naming convention.
///
/// Event-shaped methods (`notifyX`, `onX`) expect no reply.
pub fn is_notify_method(method: &str) -> bool {
    method.starts_with("notify") || method.starts_with("on")
}

struct ProxyInner {
    protocol: Mutex<Option<Arc<RpcProtocol>>>,
    attached: Notify,
}

/// Caller-side handle to a remote service.
///
/// A proxy can outlive any single connection: it is created detached, and
/// [`ProxyFactory::listen`] attaches a live protocol later. Calls made
/// before attachment wait; when a connection drops the proxy detaches and
/// the next call waits for the reconnect.
#[derive(Clone)]
pub struct RpcProxy {
    inner: Arc<ProxyInner>,
}

impl RpcProxy {
    fn detached() -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                protocol: Mutex::new(None),
                attached: Notify::new(),
            }),
        }
    }

    async fn current_protocol(&self) -> Arc<RpcProtocol> {
        loop {
            // Register interest before checking so an attach between the
            // check and the await is not lost.
            let notified = self.inner.attached.notified();
            if let Some(protocol) = lock(&self.inner.protocol).clone() {
                return protocol;
            }
            notified.await;
        }
    }

    /// Call `method` and wait for the reply.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let protocol = self.current_protocol().await;
        with_context(method, protocol.send_request(method, args).await)
    }

    /// Like [`call`](Self::call), with cancellation.
    pub async fn call_with_token(
        &self,
        method: &str,
        args: Vec<Value>,
        token: &CancellationToken,
    ) -> Result<Value> {
        let protocol = self.current_protocol().await;
        with_context(
            method,
            protocol.send_request_with_token(method, args, token).await,
        )
    }

    /// Send a notification; returns once it is queued.
    pub async fn notify(&self, method: &str, args: Vec<Value>) -> Result<()> {
        let protocol = self.current_protocol().await;
        protocol.send_notification(method, args)
    }

    /// Dispatch by naming convention: notification methods fire and forget
    /// (resolving to `Undefined`), everything else is a tracked request.
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        if is_notify_method(method) {
            self.notify(method, args).await?;
            Ok(Value::Undefined)
        } else {
            self.call(method, args).await
        }
    }

    /// Whether a live connection is currently attached.
    pub fn is_attached(&self) -> bool {
        lock(&self.inner.protocol).is_some()
    }
}

impl std::fmt::Debug for RpcProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcProxy")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Prefix the failed method onto remote errors so the caller sees which
/// call broke. Application errors pass through untouched; their code and
/// data are part of a programmatic contract.
fn with_context(method: &str, result: Result<Value>) -> Result<Value> {
    match result {
        Err(RpcError::Remote {
            name,
            message,
            stack,
        }) => Err(RpcError::Remote {
            name,
            message: format!("request {method:?} failed: {message}"),
            stack: stack.map(|stack| format!("Caused by: {stack}")),
        }),
        other => other,
    }
}

/// Dispatches incoming traffic to whatever target is currently installed.
struct TargetDispatch {
    target: Arc<Mutex<Option<Arc<dyn RpcHandler>>>>,
}

impl RpcHandler for TargetDispatch {
    fn handle_request(
        &self,
        method: String,
        args: Vec<Value>,
        token: CancellationToken,
    ) -> BoxFuture<'static, std::result::Result<Value, RpcFailure>> {
        match lock(&self.target).clone() {
            Some(target) => target.handle_request(method, args, token),
            None => Box::pin(std::future::ready(Err(RpcFailure::new(format!(
                "no handler for method {method:?}"
            ))))),
        }
    }

    fn handle_notification(&self, method: String, args: Vec<Value>) {
        match lock(&self.target).clone() {
            Some(target) => target.handle_notification(method, args),
            None => debug!(method, "dropping notification with no target"),
        }
    }
}

/// One endpoint of a proxied connection: hands out proxies to the remote
/// side and serves a local target to it.
pub struct ProxyFactory {
    proxy: RpcProxy,
    target: Arc<Mutex<Option<Arc<dyn RpcHandler>>>>,
}

impl ProxyFactory {
    pub fn new() -> Self {
        Self {
            proxy: RpcProxy::detached(),
            target: Arc::new(Mutex::new(None)),
        }
    }

    /// The proxy for the remote side. Usable before any connection exists.
    pub fn proxy(&self) -> RpcProxy {
        self.proxy.clone()
    }

    /// Install the local service incoming traffic dispatches to.
    pub fn set_target(&self, target: Arc<dyn RpcHandler>) {
        *lock(&self.target) = Some(target);
    }

    /// Attach `channel` and wake callers waiting on the proxy.
    ///
    /// The connection stays alive for as long as the channel does, even if
    /// the factory and every proxy clone are dropped; when it closes, the
    /// proxy detaches so a later `listen` can re-arm it.
    pub fn listen(&self, channel: Channel) {
        let handler: Arc<dyn RpcHandler> = Arc::new(TargetDispatch {
            target: Arc::clone(&self.target),
        });
        let protocol = Arc::new(RpcProtocol::new(channel, Some(handler)));
        let closed = protocol.closed();
        *lock(&self.proxy.inner.protocol) = Some(Arc::clone(&protocol));
        self.proxy.inner.attached.notify_waiters();

        let inner = Arc::clone(&self.proxy.inner);
        tokio::spawn(async move {
            closed.cancelled().await;
            let mut current = lock(&inner.protocol);
            // A reconnect may already have swapped in a newer protocol.
            if current
                .as_ref()
                .is_some_and(|live| Arc::ptr_eq(live, &protocol))
            {
                *current = None;
            }
        });
    }
}

impl Default for ProxyFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProxyFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyFactory")
            .field("attached", &self.proxy.is_attached())
            .field("has_target", &lock(&self.target).is_some())
            .finish()
    }
}
