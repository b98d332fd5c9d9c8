//! Binary wire buffers for msgplex messages.
//!
//! A message is built in a [`WriteBuffer`] (chainable little-endian
//! primitives, width-marked lengths, UTF-8 strings) and sealed with a single
//! [`WriteBuffer::commit`]. Received messages are walked with a positional
//! [`ReadBuffer`] that slices the underlying storage without copying.
//!
//! Nothing here knows about channels or RPC; higher layers compose these
//! primitives into their own wire shapes.

pub mod error;
pub mod read;
pub mod varint;
pub mod write;

pub use error::{Result, WireError};
pub use read::ReadBuffer;
pub use varint::length_size;
pub use write::{WriteBuffer, DEFAULT_INITIAL_CAPACITY};
