//! Channels over byte streams.
//!
//! [`from_stream`] turns any `AsyncRead + AsyncWrite` value, typically a
//! socket, into a [`Channel`]. Messages travel as length-delimited frames;
//! a pair of background tasks moves frames between the stream and the
//! channel endpoint.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use msgplex_wire::{ReadBuffer, WriteBuffer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::channel::{endpoint, Channel, ChannelFeeder, CloseReason};

/// Default cap on a single frame, inbound and outbound.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Largest frame accepted or produced, in bytes. Oversized inbound
    /// frames are a transport error and close the channel.
    pub max_frame_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME,
        }
    }
}

/// A channel speaking length-delimited frames over `stream`.
pub fn from_stream<S>(id: impl Into<String>, stream: S) -> Channel
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    from_stream_with_config(id, stream, StreamConfig::default())
}

pub fn from_stream_with_config<S>(id: impl Into<String>, stream: S, config: StreamConfig) -> Channel
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let id = id.into();
    let (read_half, write_half) = tokio::io::split(stream);

    let mut builder = LengthDelimitedCodec::builder();
    builder.max_frame_length(config.max_frame_size);
    let frames_in = FramedRead::new(read_half, builder.new_codec());
    let frames_out = FramedWrite::new(write_half, builder.new_codec());

    let (out_tx, out_rx) = mpsc::unbounded_channel::<Bytes>();
    let stop = CancellationToken::new();

    let provider_tx = out_tx;
    let provider = move || {
        let tx = provider_tx.clone();
        WriteBuffer::with_sink(move |bytes| {
            let _ = tx.send(bytes);
        })
    };
    let close_stop = stop.clone();
    let on_close = move |_reason: &CloseReason| {
        close_stop.cancel();
    };
    let (channel, feeder) = endpoint(id.clone(), provider, on_close);

    tokio::spawn(write_loop(id.clone(), frames_out, out_rx, stop.clone()));
    tokio::spawn(async move {
        let reason = read_loop(frames_in, &feeder, &stop).await;
        feeder.close(reason);
        // Stops the write loop on transport errors and remote EOF too.
        stop.cancel();
        debug!(id, "stream channel ended");
    });

    channel
}

async fn write_loop<W>(
    id: String,
    mut frames_out: FramedWrite<W, LengthDelimitedCodec>,
    mut out_rx: mpsc::UnboundedReceiver<Bytes>,
    stop: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = stop.cancelled() => break,
            frame = out_rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        if let Err(error) = frames_out.send(frame).await {
            debug!(%error, id, "stream write failed");
            return;
        }
    }
    // Flush frames committed before the close, then shut the stream down.
    while let Ok(frame) = out_rx.try_recv() {
        if frames_out.send(frame).await.is_err() {
            return;
        }
    }
    let _ = frames_out.close().await;
}

async fn read_loop<R>(
    mut frames_in: FramedRead<R, LengthDelimitedCodec>,
    feeder: &ChannelFeeder,
    stop: &CancellationToken,
) -> CloseReason
where
    R: AsyncRead + Unpin,
{
    loop {
        tokio::select! {
            _ = stop.cancelled() => return CloseReason::local(),
            frame = frames_in.next() => match frame {
                Some(Ok(frame)) => feeder.deliver(ReadBuffer::new(frame.freeze())),
                Some(Err(error)) => return CloseReason::transport(error),
                None => return CloseReason::remote(),
            },
        }
    }
}
