use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_core::future::BoxFuture;
use futures_util::FutureExt;
use msgplex_channel::{Channel, ChannelReader, ChannelWriter, CloseReason};
use msgplex_codec::{MessageCodec, RpcFailure, RpcMessage, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, RpcError};

/// Marker appended to the argument list of a cancellable request. The
/// receiving side strips it and arms a cancellation token for the handler.
pub const CANCELLATION_TOKEN_KEY: &str = "add.cancellation.token";

/// Which directions of traffic a protocol instance participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RpcMode {
    /// Calls out and serves incoming requests.
    #[default]
    Bidirectional,
    /// Calls out only; incoming requests, notifications and cancels are
    /// ignored.
    ClientOnly,
    /// Serves only; outgoing requests and notifications are refused.
    ServerOnly,
}

/// A service reachable over an [`RpcProtocol`].
///
/// `handle_request` runs on its own task; a panic inside it is caught and
/// answered with an error reply instead of taking the protocol down. The
/// token fires if the caller cancels; handlers observe it cooperatively.
pub trait RpcHandler: Send + Sync {
    fn handle_request(
        &self,
        method: String,
        args: Vec<Value>,
        token: CancellationToken,
    ) -> BoxFuture<'static, std::result::Result<Value, RpcFailure>>;

    fn handle_notification(&self, method: String, args: Vec<Value>);
}

/// Protocol construction options.
#[derive(Debug, Clone, Default)]
pub struct ProtocolConfig {
    pub mode: RpcMode,
    pub codec: MessageCodec,
}

struct ProtocolState {
    next_id: u32,
    pending: HashMap<u32, oneshot::Sender<Result<Value>>>,
    /// Watchers forwarding local token cancellation for in-flight requests.
    cancel_watchers: HashMap<u32, JoinHandle<()>>,
    /// Tokens armed for cancellable incoming requests being handled.
    handler_tokens: HashMap<u32, CancellationToken>,
    closed: Option<CloseReason>,
}

struct ProtocolShared {
    channel: ChannelWriter,
    codec: MessageCodec,
    mode: RpcMode,
    handler: Option<Arc<dyn RpcHandler>>,
    state: Mutex<ProtocolState>,
    closed: CancellationToken,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProtocolShared {
    fn dispatch(self: &Arc<Self>, message: RpcMessage) {
        match message {
            RpcMessage::Request { id, method, args } => {
                if self.mode == RpcMode::ClientOnly {
                    debug!(id, method, "ignoring request in client-only mode");
                    return;
                }
                self.handle_incoming_request(id, method, args);
            }
            RpcMessage::Notification { id, method, args } => {
                if self.mode == RpcMode::ClientOnly {
                    debug!(id, method, "ignoring notification in client-only mode");
                    return;
                }
                match &self.handler {
                    Some(handler) => handler.handle_notification(method, args),
                    None => debug!(method, "dropping notification with no handler"),
                }
            }
            RpcMessage::Reply { id, result } => {
                if self.mode == RpcMode::ServerOnly {
                    debug!(id, "ignoring reply in server-only mode");
                    return;
                }
                self.resolve_pending(id, Ok(result));
            }
            RpcMessage::ReplyErr { id, error } => {
                if self.mode == RpcMode::ServerOnly {
                    debug!(id, "ignoring error reply in server-only mode");
                    return;
                }
                self.resolve_pending(id, Err(failure_to_error(error)));
            }
            RpcMessage::Cancel { id } => {
                if self.mode == RpcMode::ClientOnly {
                    debug!(id, "ignoring cancel in client-only mode");
                    return;
                }
                let token = lock(&self.state).handler_tokens.get(&id).cloned();
                match token {
                    Some(token) => token.cancel(),
                    None => debug!(id, "cancel for unknown request"),
                }
            }
        }
    }

    fn handle_incoming_request(self: &Arc<Self>, id: u32, method: String, mut args: Vec<Value>) {
        // A trailing marker means the caller can cancel this request.
        let cancellable = args.last().and_then(Value::as_str) == Some(CANCELLATION_TOKEN_KEY);
        if cancellable {
            args.pop();
        }
        let token = CancellationToken::new();
        if cancellable {
            lock(&self.state).handler_tokens.insert(id, token.clone());
        }

        let Some(handler) = self.handler.clone() else {
            debug!(id, method, "request with no handler installed");
            self.reply_err(id, &RpcFailure::new(format!("no handler for method {method:?}")));
            if cancellable {
                lock(&self.state).handler_tokens.remove(&id);
            }
            return;
        };

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            // Building the future inside the block puts a synchronous panic
            // in `handle_request` under the same catch as one in the future.
            let invoke = {
                let handler = Arc::clone(&handler);
                async move { handler.handle_request(method, args, token).await }
            };
            let result = match AssertUnwindSafe(invoke).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(RpcFailure::named("PanicError", panic_message(&panic))),
            };
            shared.send_reply(id, result);
            if cancellable {
                lock(&shared.state).handler_tokens.remove(&id);
            }
        });
    }

    fn resolve_pending(&self, id: u32, result: Result<Value>) {
        let (entry, watcher) = {
            let mut state = lock(&self.state);
            (
                state.pending.remove(&id),
                state.cancel_watchers.remove(&id),
            )
        };
        if let Some(watcher) = watcher {
            watcher.abort();
        }
        match entry {
            Some(tx) => {
                let _ = tx.send(result);
            }
            // Late replies after cancellation are normal traffic.
            None => debug!(id, "reply for unknown or already resolved request"),
        }
    }

    fn send_reply(&self, id: u32, result: std::result::Result<Value, RpcFailure>) {
        match result {
            Ok(value) => {
                let mut buf = self.channel.write_buffer();
                if let Err(error) = self.codec.write_reply(&mut buf, id, &value) {
                    // The partial buffer is discarded uncommitted; the
                    // caller still deserves an answer.
                    drop(buf);
                    warn!(%error, id, "reply failed to encode");
                    self.reply_err(
                        id,
                        &RpcFailure::new(format!("reply failed to encode: {error}")),
                    );
                    return;
                }
                buf.commit();
            }
            Err(failure) => self.reply_err(id, &failure),
        }
    }

    fn reply_err(&self, id: u32, failure: &RpcFailure) {
        let mut buf = self.channel.write_buffer();
        match self.codec.write_reply_err(&mut buf, id, &failure.to_value()) {
            Ok(()) => {
                buf.commit();
            }
            Err(error) => warn!(%error, id, "error reply failed to encode"),
        }
    }

    fn send_cancel(&self, id: u32) {
        let mut buf = self.channel.write_buffer();
        match self.codec.write_cancel(&mut buf, id) {
            Ok(()) => {
                buf.commit();
            }
            Err(error) => warn!(%error, id, "cancel failed to encode"),
        }
    }

    /// Reject everything in flight, exactly once.
    fn handle_closed(&self, reason: CloseReason) {
        let (pending, watchers, tokens) = {
            let mut state = lock(&self.state);
            if state.closed.is_some() {
                return;
            }
            state.closed = Some(reason.clone());
            (
                std::mem::take(&mut state.pending),
                std::mem::take(&mut state.cancel_watchers),
                std::mem::take(&mut state.handler_tokens),
            )
        };
        if !pending.is_empty() {
            debug!(count = pending.len(), %reason, "rejecting pending requests");
        }
        for tx in pending.into_values() {
            let _ = tx.send(Err(RpcError::ChannelClosed(reason.clone())));
        }
        for watcher in watchers.into_values() {
            watcher.abort();
        }
        for token in tokens.into_values() {
            token.cancel();
        }
        self.closed.cancel();
    }

    fn close_reason(&self) -> CloseReason {
        lock(&self.state)
            .closed
            .clone()
            .unwrap_or_else(|| CloseReason::new("rpc protocol closed"))
    }
}

/// Request/reply, notification and cancellation traffic over one channel.
///
/// The protocol owns the channel. A background task decodes incoming
/// messages; requests run handlers on spawned tasks, replies resolve the
/// matching pending call by id. When the channel closes, every pending
/// request fails with the close reason and later sends fail fast.
pub struct RpcProtocol {
    shared: Arc<ProtocolShared>,
    receive: JoinHandle<()>,
}

impl RpcProtocol {
    pub fn new(channel: Channel, handler: Option<Arc<dyn RpcHandler>>) -> Self {
        Self::with_config(channel, handler, ProtocolConfig::default())
    }

    pub fn with_config(
        channel: Channel,
        handler: Option<Arc<dyn RpcHandler>>,
        config: ProtocolConfig,
    ) -> Self {
        let (writer, reader) = channel.split();
        let shared = Arc::new(ProtocolShared {
            channel: writer,
            codec: config.codec,
            mode: config.mode,
            handler,
            state: Mutex::new(ProtocolState {
                next_id: 1,
                pending: HashMap::new(),
                cancel_watchers: HashMap::new(),
                handler_tokens: HashMap::new(),
                closed: None,
            }),
            closed: CancellationToken::new(),
        });
        let receive = tokio::spawn(Self::run(Arc::clone(&shared), reader));
        Self { shared, receive }
    }

    async fn run(shared: Arc<ProtocolShared>, mut reader: ChannelReader) {
        while let Some(mut frame) = reader.recv().await {
            match shared.codec.read_message(&mut frame) {
                Ok(message) => shared.dispatch(message),
                // The error corrupts only this message; keep receiving.
                Err(error) => warn!(%error, "dropping undecodable rpc message"),
            }
        }
        let reason = reader
            .close_reason()
            .unwrap_or_else(|| CloseReason::new("rpc channel closed"));
        shared.handle_closed(reason);
    }

    pub fn mode(&self) -> RpcMode {
        self.shared.mode
    }

    /// Call `method` and wait for its reply.
    pub async fn send_request(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.request_inner(method, args, None).await
    }

    /// Like [`send_request`](Self::send_request), with cancellation.
    ///
    /// Cancelling `token` sends a cancel message for this request; the call
    /// still completes with whatever the remote handler decides to answer.
    /// A token already cancelled at send time cancels immediately.
    pub async fn send_request_with_token(
        &self,
        method: &str,
        mut args: Vec<Value>,
        token: &CancellationToken,
    ) -> Result<Value> {
        args.push(Value::from(CANCELLATION_TOKEN_KEY));
        self.request_inner(method, args, Some(token)).await
    }

    /// Fire-and-forget message. Consumes an id like requests do, but no
    /// reply will ever reference it.
    pub fn send_notification(&self, method: &str, args: Vec<Value>) -> Result<()> {
        self.ensure_can_send("send_notification")?;
        let id = self.allocate_id()?;
        let mut buf = self.shared.channel.write_buffer();
        self.shared
            .codec
            .write_notification(&mut buf, id, method, args)?;
        buf.commit();
        Ok(())
    }

    /// A notification whose delivery can be cancelled. Sent as a tracked
    /// request so cancellation has an id to reference; the reply only
    /// confirms completion and its value is discarded.
    pub async fn send_cancellable_notification(
        &self,
        method: &str,
        args: Vec<Value>,
        token: &CancellationToken,
    ) -> Result<()> {
        self.send_request_with_token(method, args, token)
            .await
            .map(|_| ())
    }

    async fn request_inner(
        &self,
        method: &str,
        args: Vec<Value>,
        token: Option<&CancellationToken>,
    ) -> Result<Value> {
        self.ensure_can_send("send_request")?;
        let shared = &self.shared;

        let (id, rx) = {
            let mut state = lock(&shared.state);
            if let Some(reason) = &state.closed {
                return Err(RpcError::ChannelClosed(reason.clone()));
            }
            let id = state.next_id;
            state.next_id = state.next_id.wrapping_add(1);
            let (tx, rx) = oneshot::channel();
            state.pending.insert(id, tx);
            (id, rx)
        };

        let mut buf = shared.channel.write_buffer();
        if let Err(error) = shared.codec.write_request(&mut buf, id, method, args) {
            // Discard the partial buffer uncommitted and unregister.
            lock(&shared.state).pending.remove(&id);
            return Err(error.into());
        }
        buf.commit();

        if let Some(token) = token {
            if token.is_cancelled() {
                shared.send_cancel(id);
            } else {
                self.arm_cancel_watcher(id, token.clone());
            }
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(RpcError::ChannelClosed(shared.close_reason())),
        }
    }

    fn arm_cancel_watcher(&self, id: u32, token: CancellationToken) {
        let watcher = tokio::spawn({
            let shared = Arc::clone(&self.shared);
            async move {
                tokio::select! {
                    _ = token.cancelled() => shared.send_cancel(id),
                    _ = shared.closed.cancelled() => {}
                }
            }
        });
        let mut state = lock(&self.shared.state);
        if state.pending.contains_key(&id) {
            state.cancel_watchers.insert(id, watcher);
        } else {
            // The reply or a close beat us here.
            watcher.abort();
        }
    }

    fn allocate_id(&self) -> Result<u32> {
        let mut state = lock(&self.shared.state);
        if let Some(reason) = &state.closed {
            return Err(RpcError::ChannelClosed(reason.clone()));
        }
        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1);
        Ok(id)
    }

    fn ensure_can_send(&self, operation: &'static str) -> Result<()> {
        if self.shared.mode == RpcMode::ServerOnly {
            return Err(RpcError::ModeMismatch {
                mode: self.shared.mode,
                operation,
            });
        }
        Ok(())
    }

    /// Close the underlying channel. Pending requests are rejected once the
    /// receive loop observes the close.
    pub fn close(&self) {
        self.shared.channel.close();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.state).closed.is_some()
    }

    /// A token that fires when the protocol has shut down. Cancelling the
    /// returned child token does not close the protocol.
    pub fn closed(&self) -> CancellationToken {
        self.shared.closed.child_token()
    }
}

impl std::fmt::Debug for RpcProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("RpcProtocol")
            .field("mode", &self.shared.mode)
            .field("pending", &state.pending.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl Drop for RpcProtocol {
    fn drop(&mut self) {
        self.receive.abort();
        let reason = CloseReason::new("rpc protocol dropped");
        self.shared.channel.close_with_reason(reason.clone());
        self.shared.handle_closed(reason);
    }
}

/// Map a decoded ReplyErr payload onto the caller-facing error.
fn failure_to_error(error: Value) -> RpcError {
    match RpcFailure::from_value(&error) {
        Some(failure) if failure.is_application() => RpcError::Response {
            code: failure.code.unwrap_or_default(),
            message: failure.message,
            data: failure.data,
        },
        Some(failure) => RpcError::Remote {
            name: failure.name,
            message: failure.message,
            stack: failure.stack,
        },
        // Not an error envelope; keep the payload readable.
        None => RpcError::Remote {
            name: "Error".to_owned(),
            message: error.to_json().to_string(),
            stack: None,
        },
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "handler panicked".to_owned()
    }
}
