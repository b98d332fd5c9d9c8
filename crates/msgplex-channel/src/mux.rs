//! Multiplexing of many logical channels over one physical channel.
//!
//! Every frame on the physical channel starts with a type byte and the
//! logical channel id:
//!
//! ```text
//! [type: u8] [id: length-prefixed UTF-8] [payload ...]
//! ```
//!
//! [`OPEN`], [`ACK_OPEN`] and [`CLOSE`] carry no payload; [`DATA`] carries
//! one message for the identified channel. Opening is a handshake: the side
//! that wants the channel sends `OPEN` and waits for `ACK_OPEN`. When both
//! sides open the same id at once, each treats the peer's `OPEN` as the
//! acknowledgement and no `ACK_OPEN` is sent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use msgplex_wire::{ReadBuffer, WriteBuffer};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::channel::{
    endpoint, lock, Channel, ChannelFeeder, ChannelReader, ChannelWriter, CloseReason,
};
use crate::error::{ChannelError, Result};

/// Requests a new logical channel.
pub const OPEN: u8 = 1;
/// Closes a logical channel in either direction.
pub const CLOSE: u8 = 2;
/// Acknowledges an [`OPEN`]; the channel exists on both sides afterwards.
pub const ACK_OPEN: u8 = 3;
/// Carries one message for an open logical channel.
pub const DATA: u8 = 4;

/// Which side initiated a channel, as seen from this multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrigin {
    Local,
    Remote,
}

/// Event delivered to [`ChannelMultiplexer::subscribe_opens`] listeners
/// whenever a logical channel becomes open.
#[derive(Debug, Clone)]
pub struct ChannelOpened {
    pub id: String,
    pub origin: ChannelOrigin,
}

struct MuxTables {
    /// Locally requested channels still waiting for an acknowledgement.
    pending_open: HashMap<String, oneshot::Sender<Channel>>,
    /// Channels open in both directions, keyed by id.
    open: HashMap<String, ChannelFeeder>,
    opened_listeners: Vec<mpsc::UnboundedSender<ChannelOpened>>,
    incoming_tx: Option<mpsc::UnboundedSender<Channel>>,
    shutdown: bool,
}

struct MuxShared {
    physical: ChannelWriter,
    tables: Mutex<MuxTables>,
}

impl MuxShared {
    fn handle_frame(self: &Arc<Self>, frame: &mut ReadBuffer) -> Result<()> {
        let frame_type = frame.read_u8()?;
        let id = frame.read_str()?;
        match frame_type {
            OPEN => self.handle_open(&id),
            ACK_OPEN => self.handle_ack_open(&id),
            CLOSE => {
                self.handle_close(&id);
                Ok(())
            }
            DATA => {
                self.handle_data(&id, frame.slice_at_read_position());
                Ok(())
            }
            other => Err(ChannelError::UnknownFrameType(other)),
        }
    }

    fn handle_open(self: &Arc<Self>, id: &str) -> Result<()> {
        let mut tables = lock(&self.tables);
        if tables.shutdown {
            return Ok(());
        }
        if tables.open.contains_key(id) {
            warn!(id, "open frame for a channel that is already open");
            return Ok(());
        }
        let (channel, feeder) = self.create_logical(id)?;
        tables.open.insert(id.to_owned(), feeder);

        if let Some(waiter) = tables.pending_open.remove(id) {
            // Crossed opens. The peer's request doubles as our
            // acknowledgement and vice versa.
            Self::emit_opened(&mut tables, id, ChannelOrigin::Local);
            drop(tables);
            let writer = channel.writer();
            if waiter.send(channel).is_err() {
                writer.close();
            }
        } else {
            Self::emit_opened(&mut tables, id, ChannelOrigin::Remote);
            let acceptor = tables.incoming_tx.clone();
            drop(tables);
            self.send_control(ACK_OPEN, id);
            let writer = channel.writer();
            let delivered = acceptor.is_some_and(|tx| tx.send(channel).is_ok());
            if !delivered {
                debug!(id, "no acceptor for incoming channel");
                writer.close();
            }
        }
        Ok(())
    }

    fn handle_ack_open(self: &Arc<Self>, id: &str) -> Result<()> {
        let mut tables = lock(&self.tables);
        let Some(waiter) = tables.pending_open.remove(id) else {
            warn!(id, "acknowledgement for a channel with no pending open");
            return Ok(());
        };
        let (channel, feeder) = self.create_logical(id)?;
        tables.open.insert(id.to_owned(), feeder);
        Self::emit_opened(&mut tables, id, ChannelOrigin::Local);
        drop(tables);

        let writer = channel.writer();
        if waiter.send(channel).is_err() {
            writer.close();
        }
        Ok(())
    }

    fn handle_close(&self, id: &str) {
        let feeder = lock(&self.tables).open.remove(id);
        match feeder {
            Some(feeder) => {
                feeder.close(CloseReason::remote());
                debug!(id, "remote closed channel");
            }
            // Normal in close races; both sides may close at once.
            None => debug!(id, "close frame for unknown channel"),
        }
    }

    fn handle_data(&self, id: &str, payload: ReadBuffer) {
        let feeder = lock(&self.tables).open.get(id).cloned();
        match feeder {
            Some(feeder) => feeder.deliver(payload),
            None => debug!(id, "data frame for unknown channel"),
        }
    }

    /// Build the local endpoint of a logical channel. Writes go out as
    /// [`DATA`] frames on the physical channel; a local close removes the
    /// channel from the tables and tells the peer.
    fn create_logical(self: &Arc<Self>, id: &str) -> Result<(Channel, ChannelFeeder)> {
        let mut header = WriteBuffer::new();
        header.write_u8(DATA);
        header.write_str(id)?;
        let header = header.commit();

        let physical = self.physical.clone();
        let provider = move || {
            let mut buf = physical.write_buffer();
            buf.write_raw(&header);
            buf
        };

        let weak = Arc::downgrade(self);
        let channel_id = id.to_owned();
        let on_close = move |_reason: &CloseReason| {
            if let Some(shared) = weak.upgrade() {
                shared.local_channel_closed(&channel_id);
            }
        };
        Ok(endpoint(id, provider, on_close))
    }

    fn local_channel_closed(&self, id: &str) {
        let removed = lock(&self.tables).open.remove(id).is_some();
        if removed {
            self.send_control(CLOSE, id);
            debug!(id, "closed channel");
        }
    }

    fn send_control(&self, frame_type: u8, id: &str) {
        let mut frame = self.physical.write_buffer();
        frame.write_u8(frame_type);
        if let Err(error) = frame.write_str(id) {
            warn!(%error, id, "failed to encode control frame");
            return;
        }
        frame.commit();
    }

    fn emit_opened(tables: &mut MuxTables, id: &str, origin: ChannelOrigin) {
        let event = ChannelOpened {
            id: id.to_owned(),
            origin,
        };
        tables
            .opened_listeners
            .retain(|listener| listener.send(event.clone()).is_ok());
    }

    /// Tear down every channel exactly once. Runs when the physical channel
    /// ends and again, harmlessly, when the multiplexer is dropped.
    fn shutdown(&self, reason: CloseReason) {
        let (feeders, pendings) = {
            let mut tables = lock(&self.tables);
            if tables.shutdown {
                return;
            }
            tables.shutdown = true;
            tables.incoming_tx = None;
            tables.opened_listeners.clear();
            (
                std::mem::take(&mut tables.open),
                std::mem::take(&mut tables.pending_open),
            )
        };
        if !feeders.is_empty() || !pendings.is_empty() {
            debug!(
                open = feeders.len(),
                pending = pendings.len(),
                %reason,
                "multiplexer shutting down with live channels"
            );
        }
        for feeder in feeders.into_values() {
            feeder.close(reason.clone());
        }
        // Dropping the waiters fails the corresponding `open` calls.
        drop(pendings);
        self.physical.close_with_reason(reason);
    }

    fn close_reason(&self) -> CloseReason {
        self.physical
            .close_reason()
            .unwrap_or_else(CloseReason::multiplexer_closed)
    }
}

/// Runs any number of logical [`Channel`]s over one physical channel.
///
/// Locally requested channels come from [`open`](ChannelMultiplexer::open),
/// remotely requested ones from [`accept`](ChannelMultiplexer::accept).
/// Closing the physical channel, or dropping the multiplexer, closes every
/// logical channel and fails every pending open.
pub struct ChannelMultiplexer {
    shared: Arc<MuxShared>,
    incoming: mpsc::UnboundedReceiver<Channel>,
    demux: JoinHandle<()>,
}

impl ChannelMultiplexer {
    pub fn new(physical: Channel) -> Self {
        let (writer, reader) = physical.split();
        let (incoming_tx, incoming) = mpsc::unbounded_channel();
        let shared = Arc::new(MuxShared {
            physical: writer,
            tables: Mutex::new(MuxTables {
                pending_open: HashMap::new(),
                open: HashMap::new(),
                opened_listeners: Vec::new(),
                incoming_tx: Some(incoming_tx),
                shutdown: false,
            }),
        });
        let demux = tokio::spawn(Self::run(Arc::clone(&shared), reader));
        Self {
            shared,
            incoming,
            demux,
        }
    }

    async fn run(shared: Arc<MuxShared>, mut reader: ChannelReader) {
        while let Some(mut frame) = reader.recv().await {
            if let Err(error) = shared.handle_frame(&mut frame) {
                warn!(%error, "dropping undecodable multiplexer frame");
            }
        }
        let reason = reader
            .close_reason()
            .unwrap_or_else(CloseReason::multiplexer_closed);
        shared.shutdown(reason);
    }

    /// Open a logical channel and wait until the remote side has it too.
    ///
    /// Fails with [`ChannelError::DuplicateOpen`] while `id` is already open
    /// or being opened, and with [`ChannelError::Closed`] if the multiplexer
    /// shuts down before the acknowledgement arrives.
    pub async fn open(&self, id: impl Into<String>) -> Result<Channel> {
        let id = id.into();
        let rx = {
            let mut tables = lock(&self.shared.tables);
            if tables.shutdown {
                return Err(ChannelError::Closed(self.shared.close_reason()));
            }
            if tables.open.contains_key(&id) || tables.pending_open.contains_key(&id) {
                return Err(ChannelError::DuplicateOpen(id));
            }
            let (tx, rx) = oneshot::channel();
            tables.pending_open.insert(id.clone(), tx);
            rx
        };

        let mut frame = self.shared.physical.write_buffer();
        frame.write_u8(OPEN);
        if let Err(error) = frame.write_str(&id) {
            lock(&self.shared.tables).pending_open.remove(&id);
            return Err(error.into());
        }
        frame.commit();

        match rx.await {
            Ok(channel) => Ok(channel),
            Err(_) => Err(ChannelError::Closed(self.shared.close_reason())),
        }
    }

    /// The next channel the remote side opened, or `None` once the
    /// multiplexer has shut down.
    pub async fn accept(&mut self) -> Option<Channel> {
        self.incoming.recv().await
    }

    /// Subscribe to channel-opened events, local and remote alike. After
    /// shutdown the stream ends immediately.
    pub fn subscribe_opens(&self) -> mpsc::UnboundedReceiver<ChannelOpened> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut tables = lock(&self.shared.tables);
        if !tables.shutdown {
            tables.opened_listeners.push(tx);
        }
        rx
    }

    /// A write half for an open channel, if `id` is currently open.
    pub fn get_open_channel(&self, id: &str) -> Option<ChannelWriter> {
        lock(&self.shared.tables)
            .open
            .get(id)
            .map(ChannelFeeder::writer)
    }

    /// Ids of all currently open channels, sorted.
    pub fn open_channels(&self) -> Vec<String> {
        let tables = lock(&self.shared.tables);
        let mut ids: Vec<String> = tables.open.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.tables).shutdown || self.shared.physical.is_closed()
    }

    /// Close the physical channel. The demultiplexer task observes the close
    /// and tears down every logical channel.
    pub fn close(&self) {
        self.shared.physical.close();
    }
}

impl std::fmt::Debug for ChannelMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = lock(&self.shared.tables);
        f.debug_struct("ChannelMultiplexer")
            .field("open", &tables.open.len())
            .field("pending_open", &tables.pending_open.len())
            .field("shutdown", &tables.shutdown)
            .finish()
    }
}

impl Drop for ChannelMultiplexer {
    fn drop(&mut self) {
        self.demux.abort();
        self.shared.shutdown(CloseReason::multiplexer_closed());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::channel::pair;

    fn mux_pair() -> (ChannelMultiplexer, ChannelMultiplexer) {
        let (left, right) = pair("physical");
        (ChannelMultiplexer::new(left), ChannelMultiplexer::new(right))
    }

    fn send_text(channel: &Channel, text: &str) {
        let mut buf = channel.write_buffer();
        buf.write_str(text).unwrap();
        buf.commit();
    }

    async fn recv_text(channel: &mut Channel) -> Option<String> {
        let mut buf = channel.recv().await?;
        Some(buf.read_str().unwrap())
    }

    #[tokio::test]
    async fn open_accept_and_exchange() {
        let (mux_a, mut mux_b) = mux_pair();

        let opened = mux_a.open("chat").await.unwrap();
        let mut accepted = mux_b.accept().await.unwrap();
        assert_eq!(opened.id(), "chat");
        assert_eq!(accepted.id(), "chat");

        send_text(&opened, "ping");
        assert_eq!(recv_text(&mut accepted).await.as_deref(), Some("ping"));

        send_text(&accepted, "pong");
        let mut opened = opened;
        assert_eq!(recv_text(&mut opened).await.as_deref(), Some("pong"));
    }

    #[tokio::test]
    async fn channels_are_isolated_and_opens_are_observable() {
        let (mux_a, mut mux_b) = mux_pair();
        let mut opens_a = mux_a.subscribe_opens();
        let mut opens_b = mux_b.subscribe_opens();

        let first = mux_a.open("first").await.unwrap();
        let second = mux_a.open("second").await.unwrap();

        let mut b_first = mux_b.accept().await.unwrap();
        let mut b_second = mux_b.accept().await.unwrap();
        assert_eq!(b_first.id(), "first");
        assert_eq!(b_second.id(), "second");

        // Interleaved sends stay on their own channel, in order.
        send_text(&first, "f1");
        send_text(&second, "s1");
        send_text(&first, "f2");
        assert_eq!(recv_text(&mut b_first).await.as_deref(), Some("f1"));
        assert_eq!(recv_text(&mut b_first).await.as_deref(), Some("f2"));
        assert_eq!(recv_text(&mut b_second).await.as_deref(), Some("s1"));

        // Two opens, observed on both sides: four events in total.
        let a1 = opens_a.recv().await.unwrap();
        let a2 = opens_a.recv().await.unwrap();
        assert_eq!((a1.id.as_str(), a1.origin), ("first", ChannelOrigin::Local));
        assert_eq!(
            (a2.id.as_str(), a2.origin),
            ("second", ChannelOrigin::Local)
        );

        let b1 = opens_b.recv().await.unwrap();
        let b2 = opens_b.recv().await.unwrap();
        assert_eq!(
            (b1.id.as_str(), b1.origin),
            ("first", ChannelOrigin::Remote)
        );
        assert_eq!(
            (b2.id.as_str(), b2.origin),
            ("second", ChannelOrigin::Remote)
        );
    }

    #[tokio::test]
    async fn crossed_opens_resolve_on_both_sides() {
        let (mux_a, mux_b) = mux_pair();

        let (a, b) = timeout(Duration::from_secs(5), async {
            tokio::join!(mux_a.open("shared"), mux_b.open("shared"))
        })
        .await
        .unwrap();
        let a = a.unwrap();
        let mut b = b.unwrap();

        send_text(&a, "hello");
        assert_eq!(recv_text(&mut b).await.as_deref(), Some("hello"));

        assert_eq!(mux_a.open_channels(), vec!["shared".to_owned()]);
        assert_eq!(mux_b.open_channels(), vec!["shared".to_owned()]);
    }

    #[tokio::test]
    async fn duplicate_open_is_an_error() {
        let (mux_a, mut mux_b) = mux_pair();

        let _open = mux_a.open("dup").await.unwrap();
        let _accepted = mux_b.accept().await.unwrap();

        let err = mux_a.open("dup").await.unwrap_err();
        assert!(matches!(err, ChannelError::DuplicateOpen(id) if id == "dup"));

        // The reverse direction conflicts too; the channel already exists.
        let err = mux_b.open("dup").await.unwrap_err();
        assert!(matches!(err, ChannelError::DuplicateOpen(_)));
    }

    #[tokio::test]
    async fn closing_a_logical_channel_reaches_the_peer() {
        let (mux_a, mut mux_b) = mux_pair();

        let opened = mux_a.open("short-lived").await.unwrap();
        let mut accepted = mux_b.accept().await.unwrap();

        send_text(&opened, "bye");
        opened.close();

        assert_eq!(recv_text(&mut accepted).await.as_deref(), Some("bye"));
        assert!(accepted.recv().await.is_none());
        assert_eq!(accepted.close_reason(), Some(CloseReason::remote()));

        assert!(mux_a.get_open_channel("short-lived").is_none());
        assert!(mux_b.get_open_channel("short-lived").is_none());
    }

    #[tokio::test]
    async fn multiplexer_close_cascades_to_every_channel() {
        let (mux_a, mut mux_b) = mux_pair();

        let mut one = mux_a.open("one").await.unwrap();
        let mut two = mux_a.open("two").await.unwrap();
        let mut b_one = mux_b.accept().await.unwrap();
        let mut b_two = mux_b.accept().await.unwrap();

        mux_a.close();

        let deadline = Duration::from_secs(5);
        assert!(timeout(deadline, one.recv()).await.unwrap().is_none());
        assert!(timeout(deadline, two.recv()).await.unwrap().is_none());
        assert!(timeout(deadline, b_one.recv()).await.unwrap().is_none());
        assert!(timeout(deadline, b_two.recv()).await.unwrap().is_none());

        // Closing again is harmless, and new opens are refused.
        mux_a.close();
        let err = mux_a.open("three").await.unwrap_err();
        assert!(matches!(err, ChannelError::Closed(_)));
        assert!(mux_a.open_channels().is_empty());
    }

    #[tokio::test]
    async fn pending_open_fails_when_the_peer_goes_away() {
        let (left, raw) = pair("physical");
        let mux = ChannelMultiplexer::new(left);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            raw.close();
        });

        // The raw peer never acknowledges, so the open can only fail.
        let err = timeout(Duration::from_secs(5), mux.open("never"))
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, ChannelError::Closed(_)));
    }

    #[tokio::test]
    async fn malformed_frames_do_not_poison_the_mux() {
        let (left, raw) = pair("physical");
        let mut mux = ChannelMultiplexer::new(left);

        // An unknown frame type, then data for a channel that was never
        // opened. Both must be dropped without disturbing what follows.
        let mut bad = raw.write_buffer();
        bad.write_u8(9);
        bad.write_str("mystery").unwrap();
        bad.commit();

        let mut ghost = raw.write_buffer();
        ghost.write_u8(DATA);
        ghost.write_str("ghost").unwrap();
        ghost.write_u32(1);
        ghost.commit();

        let mut open = raw.write_buffer();
        open.write_u8(OPEN);
        open.write_str("ok").unwrap();
        open.commit();

        let accepted = mux.accept().await.unwrap();
        assert_eq!(accepted.id(), "ok");

        let mut raw = raw;
        let mut ack = raw.recv().await.unwrap();
        assert_eq!(ack.read_u8().unwrap(), ACK_OPEN);
        assert_eq!(ack.read_str().unwrap(), "ok");
    }

    #[tokio::test]
    async fn data_frames_carry_the_channel_header() {
        let (left, raw) = pair("physical");
        let mux = ChannelMultiplexer::new(left);
        let mut raw = raw;

        let (channel, ()) = tokio::join!(mux.open("wire-check"), async {
            let mut open_frame = raw.recv().await.unwrap();
            assert_eq!(open_frame.read_u8().unwrap(), OPEN);
            assert_eq!(open_frame.read_str().unwrap(), "wire-check");
            assert!(open_frame.is_exhausted());

            let mut ack = raw.write_buffer();
            ack.write_u8(ACK_OPEN);
            ack.write_str("wire-check").unwrap();
            ack.commit();
        });
        let channel = channel.unwrap();

        send_text(&channel, "payload");
        let mut data = raw.recv().await.unwrap();
        assert_eq!(data.read_u8().unwrap(), DATA);
        assert_eq!(data.read_str().unwrap(), "wire-check");
        assert_eq!(data.read_str().unwrap(), "payload");
        assert!(data.is_exhausted());
    }
}
