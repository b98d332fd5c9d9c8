use std::sync::Arc;

use msgplex_wire::{ReadBuffer, WriteBuffer};

use crate::error::{CodecError, Result};
use crate::registry::CodecRegistry;
use crate::value::Value;

/// Message kind discriminator, the first byte of every RPC message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RpcMessageKind {
    Request = 1,
    Notification = 2,
    Reply = 3,
    ReplyErr = 4,
    Cancel = 5,
}

impl RpcMessageKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Request),
            2 => Some(Self::Notification),
            3 => Some(Self::Reply),
            4 => Some(Self::ReplyErr),
            5 => Some(Self::Cancel),
            _ => None,
        }
    }
}

/// One decoded RPC message.
///
/// Every message carries the request id it belongs to; notifications carry
/// one too so the wire shape stays uniform even though no reply ever
/// references it.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    Request {
        id: u32,
        method: String,
        args: Vec<Value>,
    },
    Notification {
        id: u32,
        method: String,
        args: Vec<Value>,
    },
    Reply {
        id: u32,
        result: Value,
    },
    ReplyErr {
        id: u32,
        error: Value,
    },
    Cancel {
        id: u32,
    },
}

impl RpcMessage {
    pub fn id(&self) -> u32 {
        match self {
            RpcMessage::Request { id, .. }
            | RpcMessage::Notification { id, .. }
            | RpcMessage::Reply { id, .. }
            | RpcMessage::ReplyErr { id, .. }
            | RpcMessage::Cancel { id } => *id,
        }
    }

    pub fn kind(&self) -> RpcMessageKind {
        match self {
            RpcMessage::Request { .. } => RpcMessageKind::Request,
            RpcMessage::Notification { .. } => RpcMessageKind::Notification,
            RpcMessage::Reply { .. } => RpcMessageKind::Reply,
            RpcMessage::ReplyErr { .. } => RpcMessageKind::ReplyErr,
            RpcMessage::Cancel { .. } => RpcMessageKind::Cancel,
        }
    }
}

/// Encodes and decodes RPC messages through a shared codec registry.
///
/// Message layout is one kind byte, the u32 request id, then a
/// kind-specific body. Request and Notification bodies are the method name
/// followed by the arguments as a single encoded array value, so argument
/// values (including application-tagged ones) dispatch uniformly.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    registry: Arc<CodecRegistry>,
}

impl MessageCodec {
    /// Codec over a fresh registry with the built-ins.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(CodecRegistry::new()),
        }
    }

    /// Codec over a shared, possibly extended registry.
    pub fn with_registry(registry: Arc<CodecRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<CodecRegistry> {
        &self.registry
    }

    pub fn write_request(
        &self,
        buf: &mut WriteBuffer,
        id: u32,
        method: &str,
        args: Vec<Value>,
    ) -> Result<()> {
        buf.write_u8(RpcMessageKind::Request as u8).write_u32(id);
        buf.write_str(method)?;
        self.registry.encode_value(buf, &Value::Array(args))
    }

    pub fn write_notification(
        &self,
        buf: &mut WriteBuffer,
        id: u32,
        method: &str,
        args: Vec<Value>,
    ) -> Result<()> {
        buf.write_u8(RpcMessageKind::Notification as u8).write_u32(id);
        buf.write_str(method)?;
        self.registry.encode_value(buf, &Value::Array(args))
    }

    pub fn write_reply(&self, buf: &mut WriteBuffer, id: u32, result: &Value) -> Result<()> {
        buf.write_u8(RpcMessageKind::Reply as u8).write_u32(id);
        self.registry.encode_value(buf, result)
    }

    pub fn write_reply_err(&self, buf: &mut WriteBuffer, id: u32, error: &Value) -> Result<()> {
        buf.write_u8(RpcMessageKind::ReplyErr as u8).write_u32(id);
        self.registry.encode_value(buf, error)
    }

    pub fn write_cancel(&self, buf: &mut WriteBuffer, id: u32) -> Result<()> {
        buf.write_u8(RpcMessageKind::Cancel as u8).write_u32(id);
        Ok(())
    }

    pub fn write_message(&self, buf: &mut WriteBuffer, message: RpcMessage) -> Result<()> {
        match message {
            RpcMessage::Request { id, method, args } => {
                self.write_request(buf, id, &method, args)
            }
            RpcMessage::Notification { id, method, args } => {
                self.write_notification(buf, id, &method, args)
            }
            RpcMessage::Reply { id, result } => self.write_reply(buf, id, &result),
            RpcMessage::ReplyErr { id, error } => self.write_reply_err(buf, id, &error),
            RpcMessage::Cancel { id } => self.write_cancel(buf, id),
        }
    }

    pub fn read_message(&self, buf: &mut ReadBuffer) -> Result<RpcMessage> {
        let kind_byte = buf.read_u8()?;
        let kind = RpcMessageKind::from_u8(kind_byte)
            .ok_or(CodecError::UnknownMessageType(kind_byte))?;
        let id = buf.read_u32()?;
        match kind {
            RpcMessageKind::Request => {
                let method = buf.read_str()?;
                let args = self.read_args(buf)?;
                Ok(RpcMessage::Request { id, method, args })
            }
            RpcMessageKind::Notification => {
                let method = buf.read_str()?;
                let args = self.read_args(buf)?;
                Ok(RpcMessage::Notification { id, method, args })
            }
            RpcMessageKind::Reply => Ok(RpcMessage::Reply {
                id,
                result: self.registry.decode_value(buf)?,
            }),
            RpcMessageKind::ReplyErr => Ok(RpcMessage::ReplyErr {
                id,
                error: self.registry.decode_value(buf)?,
            }),
            RpcMessageKind::Cancel => Ok(RpcMessage::Cancel { id }),
        }
    }

    fn read_args(&self, buf: &mut ReadBuffer) -> Result<Vec<Value>> {
        match self.registry.decode_value(buf)? {
            Value::Array(args) => Ok(args),
            other => Err(CodecError::Malformed(format!(
                "expected argument array, got {}",
                other.type_name()
            ))),
        }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::failure::RpcFailure;

    fn roundtrip(codec: &MessageCodec, message: RpcMessage) -> RpcMessage {
        let mut buf = WriteBuffer::new();
        codec.write_message(&mut buf, message).unwrap();
        let mut rd = ReadBuffer::new(buf.commit());
        let decoded = codec.read_message(&mut rd).unwrap();
        assert!(rd.is_exhausted());
        decoded
    }

    #[test]
    fn request_roundtrip_with_mixed_args() {
        let codec = MessageCodec::new();
        let message = RpcMessage::Request {
            id: 41,
            method: "files/read".to_owned(),
            args: vec![
                Value::from("/tmp/a.txt"),
                Value::from(vec![1u8, 2, 3]),
                Value::from(json!({"offset": 10})),
            ],
        };
        assert_eq!(roundtrip(&codec, message.clone()), message);
    }

    #[test]
    fn notification_roundtrip() {
        let codec = MessageCodec::new();
        let message = RpcMessage::Notification {
            id: 7,
            method: "onDidChange".to_owned(),
            args: vec![Value::Undefined],
        };
        assert_eq!(roundtrip(&codec, message.clone()), message);
    }

    #[test]
    fn reply_and_error_roundtrip() {
        let codec = MessageCodec::new();

        let reply = RpcMessage::Reply {
            id: 9,
            result: Value::from(json!([1, "two"])),
        };
        assert_eq!(roundtrip(&codec, reply.clone()), reply);

        let failure = RpcFailure::application(404, "missing", Some(json!({"k": 1})));
        let err = RpcMessage::ReplyErr {
            id: 9,
            error: failure.to_value(),
        };
        match roundtrip(&codec, err) {
            RpcMessage::ReplyErr { id, error } => {
                assert_eq!(id, 9);
                assert_eq!(RpcFailure::from_value(&error).unwrap(), failure);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn cancel_roundtrip() {
        let codec = MessageCodec::new();
        let message = RpcMessage::Cancel { id: 1234 };
        assert_eq!(roundtrip(&codec, message.clone()), message);
    }

    #[test]
    fn unknown_message_type_errors() {
        let codec = MessageCodec::new();
        let mut buf = WriteBuffer::new();
        buf.write_u8(0xEE).write_u32(1);

        let mut rd = ReadBuffer::new(buf.commit());
        assert!(matches!(
            codec.read_message(&mut rd),
            Err(CodecError::UnknownMessageType(0xEE))
        ));
    }

    #[test]
    fn non_array_args_are_malformed() {
        let codec = MessageCodec::new();
        let mut buf = WriteBuffer::new();
        buf.write_u8(RpcMessageKind::Request as u8).write_u32(3);
        buf.write_str("m").unwrap();
        codec
            .registry()
            .encode_value(&mut buf, &Value::from("not an array"))
            .unwrap();

        let mut rd = ReadBuffer::new(buf.commit());
        assert!(matches!(
            codec.read_message(&mut rd),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn message_accessors() {
        let message = RpcMessage::Cancel { id: 5 };
        assert_eq!(message.id(), 5);
        assert_eq!(message.kind(), RpcMessageKind::Cancel);
        assert_eq!(RpcMessageKind::from_u8(3), Some(RpcMessageKind::Reply));
        assert_eq!(RpcMessageKind::from_u8(0), None);
    }
}
