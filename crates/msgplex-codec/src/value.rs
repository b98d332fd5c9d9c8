use std::collections::BTreeMap;

use bytes::Bytes;

/// A message value travelling through the tagged codec.
///
/// `Json` is the fallback kind and carries anything plain JSON can express.
/// The other kinds exist so binary payloads, nested sequences, maps and the
/// absent value keep their identity across the wire instead of being forced
/// through JSON text.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Anything representable as plain JSON.
    Json(serde_json::Value),
    /// Raw binary, transferred without re-encoding.
    Bytes(Bytes),
    /// Heterogeneous sequence; elements dispatch through the codec again.
    Array(Vec<Value>),
    /// The absent value.
    Undefined,
    /// String-keyed map. `BTreeMap` keeps encode order deterministic.
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Json(_) => "json",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Undefined => "undefined",
            Value::Object(_) => "object",
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(json) => Some(json),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(serde_json::Value::as_str)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_json().and_then(serde_json::Value::as_i64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_json().and_then(serde_json::Value::as_bool)
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Lossy JSON rendering for logs and CLI output. Byte payloads become
    /// number arrays and `Undefined` becomes `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Json(json) => json.clone(),
            Value::Bytes(bytes) => serde_json::Value::Array(
                bytes.iter().map(|&byte| serde_json::Value::from(byte)).collect(),
            ),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Undefined => serde_json::Value::Null,
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(key, value)| (key.clone(), value.to_json())).collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::Json(json)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Json(serde_json::Value::from(text))
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Json(serde_json::Value::from(text))
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::Json(serde_json::Value::from(flag))
    }
}

impl From<i64> for Value {
    fn from(number: i64) -> Self {
        Value::Json(serde_json::Value::from(number))
    }
}

impl From<u32> for Value {
    fn from(number: u32) -> Self {
        Value::Json(serde_json::Value::from(number))
    }
}

impl From<f64> for Value {
    fn from(number: f64) -> Self {
        Value::Json(serde_json::Value::from(number))
    }
}

impl From<Bytes> for Value {
    fn from(bytes: Bytes) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(bytes))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Object(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(inner) => inner.into(),
            None => Value::Undefined,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conversions_pick_the_right_kind() {
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert_eq!(Value::from(7i64).as_i64(), Some(7));
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(
            Value::from(vec![1u8, 2]).as_bytes().map(|b| b.as_ref()),
            Some(&[1u8, 2][..])
        );
        assert!(Value::from(None::<i64>).is_undefined());
        assert_eq!(Value::from(Some(3i64)).as_i64(), Some(3));
    }

    #[test]
    fn to_json_rendering() {
        let mut map = BTreeMap::new();
        map.insert("payload".to_owned(), Value::from(vec![1u8, 2]));
        map.insert("missing".to_owned(), Value::Undefined);
        let value = Value::Array(vec![Value::Object(map), Value::from("tail")]);

        assert_eq!(
            value.to_json(),
            json!([{ "missing": null, "payload": [1, 2] }, "tail"])
        );
    }

    #[test]
    fn type_names() {
        assert_eq!(Value::Undefined.type_name(), "undefined");
        assert_eq!(Value::from(json!({})).type_name(), "json");
        assert_eq!(Value::Object(BTreeMap::new()).type_name(), "object");
    }
}
