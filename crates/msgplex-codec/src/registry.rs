use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use msgplex_wire::{ReadBuffer, WriteBuffer};

use crate::error::{CodecError, Result};
use crate::value::Value;

/// Built-in value tags.
pub mod tag {
    /// JSON fallback; accepts every value.
    pub const JSON: u32 = 0;
    /// Raw binary payloads.
    pub const BYTE_ARRAY: u32 = 1;
    /// Heterogeneous value sequences.
    pub const ARRAY: u32 = 2;
    /// The absent value.
    pub const UNDEFINED: u32 = 3;
    /// String-keyed maps.
    pub const OBJECT: u32 = 4;
}

/// One pluggable value encoding.
///
/// Encoding consults codecs in descending tag order and picks the first
/// whose [`can_encode`](ValueCodec::can_encode) accepts the value, so a
/// custom codec registered under a high tag overrides the built-ins for the
/// values it claims. Nested values are dispatched back through the registry.
pub trait ValueCodec: Send + Sync {
    /// Numeric wire tag.
    fn tag(&self) -> u32;

    /// Whether this codec can encode `value`.
    fn can_encode(&self, value: &Value) -> bool;

    /// Encode `value`. The tag has already been written.
    fn encode(&self, buf: &mut WriteBuffer, value: &Value, registry: &CodecRegistry)
        -> Result<()>;

    /// Decode a value whose tag selected this codec.
    fn decode(&self, buf: &mut ReadBuffer, registry: &CodecRegistry) -> Result<Value>;
}

/// Tag-keyed registry of value codecs.
///
/// [`CodecRegistry::new`] installs the five built-ins; applications add
/// their own codecs with [`register`](CodecRegistry::register). Tags are
/// first come, first served: registering an already-taken tag is refused.
pub struct CodecRegistry {
    by_tag: HashMap<u32, Arc<dyn ValueCodec>>,
    // Kept sorted by descending tag; encode scans this list.
    ordered: Vec<Arc<dyn ValueCodec>>,
}

impl CodecRegistry {
    /// Registry with the built-in codecs.
    pub fn new() -> Self {
        let mut registry = Self {
            by_tag: HashMap::new(),
            ordered: Vec::new(),
        };
        registry.insert(Arc::new(JsonCodec));
        registry.insert(Arc::new(ByteArrayCodec));
        registry.insert(Arc::new(ArrayCodec));
        registry.insert(Arc::new(UndefinedCodec));
        registry.insert(Arc::new(ObjectCodec));
        registry
    }

    /// Register an application codec.
    pub fn register(&mut self, codec: Arc<dyn ValueCodec>) -> Result<()> {
        let tag = codec.tag();
        if self.by_tag.contains_key(&tag) {
            return Err(CodecError::DuplicateTag(tag));
        }
        self.insert(codec);
        Ok(())
    }

    fn insert(&mut self, codec: Arc<dyn ValueCodec>) {
        self.by_tag.insert(codec.tag(), Arc::clone(&codec));
        self.ordered.push(codec);
        self.ordered.sort_by(|a, b| b.tag().cmp(&a.tag()));
    }

    /// Encode one value: tag, then the selected codec's payload.
    pub fn encode_value(&self, buf: &mut WriteBuffer, value: &Value) -> Result<()> {
        for codec in &self.ordered {
            if codec.can_encode(value) {
                buf.write_length(codec.tag() as usize)?;
                return codec.encode(buf, value, self);
            }
        }
        Err(CodecError::Encode(format!(
            "no codec accepts a {} value",
            value.type_name()
        )))
    }

    /// Decode one value: read the tag, dispatch to its codec.
    pub fn decode_value(&self, buf: &mut ReadBuffer) -> Result<Value> {
        let raw = buf.read_length()?;
        let tag = raw as u32;
        match self.by_tag.get(&tag) {
            Some(codec) => codec.decode(buf, self),
            None => Err(CodecError::UnknownTag(tag)),
        }
    }

    /// Registered tags, ascending.
    pub fn tags(&self) -> Vec<u32> {
        let mut tags: Vec<u32> = self.by_tag.keys().copied().collect();
        tags.sort_unstable();
        tags
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

struct JsonCodec;

impl ValueCodec for JsonCodec {
    fn tag(&self) -> u32 {
        tag::JSON
    }

    fn can_encode(&self, _value: &Value) -> bool {
        true
    }

    fn encode(&self, buf: &mut WriteBuffer, value: &Value, _registry: &CodecRegistry) -> Result<()> {
        let json = match value {
            Value::Json(json) => serde_json::to_string(json),
            other => serde_json::to_string(&other.to_json()),
        };
        let text = json.map_err(|err| CodecError::Encode(err.to_string()))?;
        buf.write_str(&text)?;
        Ok(())
    }

    fn decode(&self, buf: &mut ReadBuffer, _registry: &CodecRegistry) -> Result<Value> {
        let text = buf.read_str()?;
        let json = serde_json::from_str(&text)
            .map_err(|err| CodecError::Malformed(format!("invalid JSON payload: {err}")))?;
        Ok(Value::Json(json))
    }
}

struct ByteArrayCodec;

impl ValueCodec for ByteArrayCodec {
    fn tag(&self) -> u32 {
        tag::BYTE_ARRAY
    }

    fn can_encode(&self, value: &Value) -> bool {
        matches!(value, Value::Bytes(_))
    }

    fn encode(&self, buf: &mut WriteBuffer, value: &Value, _registry: &CodecRegistry) -> Result<()> {
        match value {
            Value::Bytes(bytes) => {
                buf.write_bytes(bytes)?;
                Ok(())
            }
            other => Err(CodecError::Encode(format!(
                "byte array codec got a {} value",
                other.type_name()
            ))),
        }
    }

    fn decode(&self, buf: &mut ReadBuffer, _registry: &CodecRegistry) -> Result<Value> {
        Ok(Value::Bytes(buf.read_bytes()?))
    }
}

struct ArrayCodec;

impl ValueCodec for ArrayCodec {
    fn tag(&self) -> u32 {
        tag::ARRAY
    }

    fn can_encode(&self, value: &Value) -> bool {
        matches!(value, Value::Array(_))
    }

    fn encode(&self, buf: &mut WriteBuffer, value: &Value, registry: &CodecRegistry) -> Result<()> {
        match value {
            Value::Array(items) => {
                buf.write_length(items.len())?;
                for item in items {
                    registry.encode_value(buf, item)?;
                }
                Ok(())
            }
            other => Err(CodecError::Encode(format!(
                "array codec got a {} value",
                other.type_name()
            ))),
        }
    }

    fn decode(&self, buf: &mut ReadBuffer, registry: &CodecRegistry) -> Result<Value> {
        let len = buf.read_length()?;
        let mut items = Vec::with_capacity(len.min(4096));
        for _ in 0..len {
            items.push(registry.decode_value(buf)?);
        }
        Ok(Value::Array(items))
    }
}

struct UndefinedCodec;

impl ValueCodec for UndefinedCodec {
    fn tag(&self) -> u32 {
        tag::UNDEFINED
    }

    fn can_encode(&self, value: &Value) -> bool {
        value.is_undefined()
    }

    fn encode(&self, _buf: &mut WriteBuffer, _value: &Value, _registry: &CodecRegistry) -> Result<()> {
        // The tag is the whole encoding.
        Ok(())
    }

    fn decode(&self, _buf: &mut ReadBuffer, _registry: &CodecRegistry) -> Result<Value> {
        Ok(Value::Undefined)
    }
}

struct ObjectCodec;

impl ValueCodec for ObjectCodec {
    fn tag(&self) -> u32 {
        tag::OBJECT
    }

    fn can_encode(&self, value: &Value) -> bool {
        matches!(value, Value::Object(_))
    }

    fn encode(&self, buf: &mut WriteBuffer, value: &Value, registry: &CodecRegistry) -> Result<()> {
        match value {
            Value::Object(map) => {
                buf.write_length(map.len())?;
                for (key, item) in map {
                    buf.write_str(key)?;
                    registry.encode_value(buf, item)?;
                }
                Ok(())
            }
            other => Err(CodecError::Encode(format!(
                "object codec got a {} value",
                other.type_name()
            ))),
        }
    }

    fn decode(&self, buf: &mut ReadBuffer, registry: &CodecRegistry) -> Result<Value> {
        let len = buf.read_length()?;
        let mut map = BTreeMap::new();
        for _ in 0..len {
            let key = buf.read_str()?;
            let item = registry.decode_value(buf)?;
            map.insert(key, item);
        }
        Ok(Value::Object(map))
    }
}
