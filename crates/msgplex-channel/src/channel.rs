use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use msgplex_wire::{ReadBuffer, WriteBuffer};
use tokio::sync::mpsc;

/// Why a channel stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    message: String,
}

impl CloseReason {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn local() -> Self {
        Self::new("closed locally")
    }

    pub fn remote() -> Self {
        Self::new("closed by remote peer")
    }

    pub fn dropped() -> Self {
        Self::new("channel endpoint dropped")
    }

    pub fn multiplexer_closed() -> Self {
        Self::new("multiplexer closed")
    }

    pub fn transport(detail: impl std::fmt::Display) -> Self {
        Self::new(format!("transport error: {detail}"))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

pub(crate) enum ChannelEvent {
    Message(ReadBuffer),
    Closed(CloseReason),
}

struct ChannelState {
    closed: Option<CloseReason>,
    on_close: Option<Box<dyn FnOnce(&CloseReason) + Send>>,
}

struct ChannelCore {
    id: String,
    provider: Box<dyn Fn() -> WriteBuffer + Send + Sync>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: Mutex<ChannelState>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ChannelCore {
    fn write_buffer(&self) -> WriteBuffer {
        if lock(&self.state).closed.is_some() {
            WriteBuffer::detached()
        } else {
            (self.provider)()
        }
    }

    /// First close wins. Emits the reader's terminal event; `run_hook`
    /// distinguishes locally initiated closes (which must notify the owner,
    /// e.g. a multiplexer) from closes reported by the feeding side.
    fn close(&self, reason: CloseReason, run_hook: bool) {
        let hook = {
            let mut state = lock(&self.state);
            if state.closed.is_some() {
                return;
            }
            state.closed = Some(reason.clone());
            state.on_close.take()
        };
        let _ = self.events.send(ChannelEvent::Closed(reason.clone()));
        if run_hook {
            if let Some(hook) = hook {
                hook(&reason);
            }
        }
    }

    /// Record a close observed from the reading side without emitting
    /// another event. The close hook is discarded; it only runs for closes
    /// this side initiated.
    fn mark_closed(&self, reason: CloseReason) {
        let mut state = lock(&self.state);
        if state.closed.is_none() {
            state.closed = Some(reason);
        }
        state.on_close = None;
    }

    fn close_reason(&self) -> Option<CloseReason> {
        lock(&self.state).closed.clone()
    }
}

impl Drop for ChannelCore {
    fn drop(&mut self) {
        // Every handle is gone. If nobody closed the endpoint, the close
        // hook still has to run so the owner can tell the other side.
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.closed.is_none() {
            state.closed = Some(CloseReason::dropped());
            if let Some(hook) = state.on_close.take() {
                hook(&CloseReason::dropped());
            }
        }
    }
}

/// Cloneable write half of a channel.
#[derive(Clone)]
pub struct ChannelWriter {
    core: Arc<ChannelCore>,
}

impl ChannelWriter {
    pub fn id(&self) -> &str {
        &self.core.id
    }

    /// A write buffer whose commit delivers exactly one message. Always
    /// succeeds; once the channel is closed the returned buffer is detached
    /// and its commit goes nowhere.
    pub fn write_buffer(&self) -> WriteBuffer {
        self.core.write_buffer()
    }

    /// Close the channel. Idempotent; only the first close takes effect.
    pub fn close(&self) {
        self.core.close(CloseReason::local(), true);
    }

    pub fn close_with_reason(&self, reason: CloseReason) {
        self.core.close(reason, true);
    }

    pub fn is_closed(&self) -> bool {
        self.core.close_reason().is_some()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.core.close_reason()
    }
}

impl std::fmt::Debug for ChannelWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelWriter")
            .field("id", &self.core.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Owning read half of a channel.
pub struct ChannelReader {
    core: Arc<ChannelCore>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    done: bool,
}

impl ChannelReader {
    pub fn id(&self) -> &str {
        &self.core.id
    }

    /// The next inbound message, or `None` once the channel has closed.
    /// Messages queued before a close are still delivered first.
    pub async fn recv(&mut self) -> Option<ReadBuffer> {
        if self.done {
            return None;
        }
        match self.events.recv().await {
            Some(ChannelEvent::Message(message)) => Some(message),
            Some(ChannelEvent::Closed(reason)) => {
                self.done = true;
                self.core.mark_closed(reason);
                None
            }
            None => {
                self.done = true;
                self.core.mark_closed(CloseReason::dropped());
                None
            }
        }
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.core.close_reason()
    }
}

impl std::fmt::Debug for ChannelReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelReader")
            .field("id", &self.core.id)
            .field("done", &self.done)
            .finish()
    }
}

/// A bidirectional message channel.
///
/// Most call sites either use the channel whole or [`split`](Channel::split)
/// it into a cloneable [`ChannelWriter`] and the owning [`ChannelReader`].
pub struct Channel {
    writer: ChannelWriter,
    reader: ChannelReader,
}

impl Channel {
    pub fn id(&self) -> &str {
        self.writer.id()
    }

    /// A clone of the write half.
    pub fn writer(&self) -> ChannelWriter {
        self.writer.clone()
    }

    pub fn write_buffer(&self) -> WriteBuffer {
        self.writer.write_buffer()
    }

    pub async fn recv(&mut self) -> Option<ReadBuffer> {
        self.reader.recv().await
    }

    pub fn close(&self) {
        self.writer.close();
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_closed()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.writer.close_reason()
    }

    pub fn split(self) -> (ChannelWriter, ChannelReader) {
        (self.writer, self.reader)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Inbound half of a channel endpoint, retained by whoever feeds it: a
/// transport task, a multiplexer, or the peer of an in-memory pair.
#[derive(Clone)]
pub struct ChannelFeeder {
    core: Arc<ChannelCore>,
}

impl ChannelFeeder {
    pub fn id(&self) -> &str {
        &self.core.id
    }

    /// Deliver one inbound message. Dropped silently once closed.
    pub fn deliver(&self, message: ReadBuffer) {
        if self.core.close_reason().is_none() {
            let _ = self.core.events.send(ChannelEvent::Message(message));
        }
    }

    /// Close the endpoint from the feeding side. The local close hook does
    /// not run; the feeder's owner already knows.
    pub fn close(&self, reason: CloseReason) {
        self.core.close(reason, false);
    }

    pub fn is_closed(&self) -> bool {
        self.core.close_reason().is_some()
    }

    /// A write half for the same endpoint.
    pub fn writer(&self) -> ChannelWriter {
        ChannelWriter {
            core: Arc::clone(&self.core),
        }
    }
}

impl std::fmt::Debug for ChannelFeeder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelFeeder")
            .field("id", &self.core.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Build a channel endpoint from its parts.
///
/// `provider` hands out the write buffers (and decides where commits go);
/// `on_close` runs exactly once if the endpoint is closed locally. The
/// returned [`ChannelFeeder`] is how the owner delivers inbound messages
/// and reports closes from the other direction.
pub fn endpoint(
    id: impl Into<String>,
    provider: impl Fn() -> WriteBuffer + Send + Sync + 'static,
    on_close: impl FnOnce(&CloseReason) + Send + 'static,
) -> (Channel, ChannelFeeder) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let core = Arc::new(ChannelCore {
        id: id.into(),
        provider: Box::new(provider),
        events: events_tx,
        state: Mutex::new(ChannelState {
            closed: None,
            on_close: Some(Box::new(on_close)),
        }),
    });
    let channel = Channel {
        writer: ChannelWriter {
            core: Arc::clone(&core),
        },
        reader: ChannelReader {
            core: Arc::clone(&core),
            events: events_rx,
            done: false,
        },
    };
    (channel, ChannelFeeder { core })
}

/// Two connected in-process channels. Commits on one side arrive on the
/// other; closing one side closes both.
pub fn pair(id: impl Into<String>) -> (Channel, Channel) {
    let id = id.into();
    let (left_tx, left_rx) = mpsc::unbounded_channel();
    let (right_tx, right_rx) = mpsc::unbounded_channel();

    let left = pair_side(&id, left_tx.clone(), left_rx, right_tx.clone());
    let right = pair_side(&id, right_tx, right_rx, left_tx);
    (left, right)
}

fn pair_side(
    id: &str,
    own_tx: mpsc::UnboundedSender<ChannelEvent>,
    own_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    peer_tx: mpsc::UnboundedSender<ChannelEvent>,
) -> Channel {
    let provider_tx = peer_tx.clone();
    let provider = move || {
        let tx = provider_tx.clone();
        WriteBuffer::with_sink(move |bytes| {
            let _ = tx.send(ChannelEvent::Message(ReadBuffer::new(bytes)));
        })
    };
    let on_close = move |_reason: &CloseReason| {
        let _ = peer_tx.send(ChannelEvent::Closed(CloseReason::remote()));
    };

    let core = Arc::new(ChannelCore {
        id: id.to_owned(),
        provider: Box::new(provider),
        events: own_tx,
        state: Mutex::new(ChannelState {
            closed: None,
            on_close: Some(Box::new(on_close)),
        }),
    });
    Channel {
        writer: ChannelWriter {
            core: Arc::clone(&core),
        },
        reader: ChannelReader {
            core,
            events: own_rx,
            done: false,
        },
    }
}
