//! Tagged value codec and RPC message encoding.
//!
//! Values travel as a numeric tag followed by a codec-specific payload.
//! Five codecs are built in (JSON fallback, byte arrays, value arrays,
//! undefined, string-keyed objects); applications register further codecs
//! under higher tags, which then take precedence over the built-ins.
//!
//! On top of the value layer sits the RPC message vocabulary: Request,
//! Notification, Reply, ReplyErr and Cancel, each a one-byte kind
//! discriminator plus a fixed body shape.

pub mod error;
pub mod failure;
pub mod registry;
pub mod rpc;
pub mod value;

pub use error::{CodecError, Result};
pub use failure::RpcFailure;
pub use registry::{tag, CodecRegistry, ValueCodec};
pub use rpc::{MessageCodec, RpcMessage, RpcMessageKind};
pub use value::Value;
