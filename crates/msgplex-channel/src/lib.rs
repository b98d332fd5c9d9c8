//! Message channels and channel multiplexing for msgplex.
//!
//! A [`Channel`] moves whole messages between two endpoints: every commit on
//! the write side arrives as one [`msgplex_wire::ReadBuffer`] on the peer's
//! read side, in order. Endpoints come from [`pair`] (in-process loopback),
//! [`from_stream`] (any tokio byte stream, length-delimited) or a
//! [`ChannelMultiplexer`], which runs any number of logical channels over a
//! single physical channel.

pub mod channel;
pub mod error;
pub mod mux;
pub mod stream;

pub use channel::{
    endpoint, pair, Channel, ChannelFeeder, ChannelReader, ChannelWriter, CloseReason,
};
pub use error::{ChannelError, Result};
pub use mux::{ChannelMultiplexer, ChannelOpened, ChannelOrigin, ACK_OPEN, CLOSE, DATA, OPEN};
pub use stream::{from_stream, from_stream_with_config, StreamConfig, DEFAULT_MAX_FRAME};
