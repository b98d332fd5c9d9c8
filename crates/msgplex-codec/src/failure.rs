use serde_json::json;

use crate::value::Value;

/// A failure travelling in a ReplyErr message.
///
/// On the wire this is a JSON object marked with `"$isError": true`. Plain
/// failures carry a name, message and optional stack; application failures
/// additionally carry a numeric `code` and structured `data` so the caller
/// can reconstruct a typed error instead of a bare string.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcFailure {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    pub code: Option<i64>,
    pub data: Option<serde_json::Value>,
}

impl RpcFailure {
    /// A plain failure with the default name.
    pub fn new(message: impl Into<String>) -> Self {
        Self::named("Error", message)
    }

    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            code: None,
            data: None,
        }
    }

    /// An application-level failure carrying a code and structured data.
    pub fn application(
        code: i64,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            name: "ResponseError".to_owned(),
            message: message.into(),
            stack: None,
            code: Some(code),
            data,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Whether this failure carries an application error code.
    pub fn is_application(&self) -> bool {
        self.code.is_some()
    }

    /// The wire form: a `$isError`-marked JSON object value.
    pub fn to_value(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("$isError".to_owned(), json!(true));
        obj.insert("name".to_owned(), json!(self.name));
        obj.insert("message".to_owned(), json!(self.message));
        if let Some(stack) = &self.stack {
            obj.insert("stack".to_owned(), json!(stack));
        }
        if let Some(code) = self.code {
            obj.insert("code".to_owned(), json!(code));
        }
        if let Some(data) = &self.data {
            obj.insert("data".to_owned(), data.clone());
        }
        Value::Json(serde_json::Value::Object(obj))
    }

    /// Parse the wire form back. Returns `None` when the value is not a
    /// `$isError`-marked object; ReplyErr payloads without the marker are
    /// treated as opaque by the caller.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_json()?.as_object()?;
        let marked = obj
            .get("$isError")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        if !marked {
            return None;
        }
        Some(Self {
            name: obj
                .get("name")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("Error")
                .to_owned(),
            message: obj
                .get("message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            stack: obj
                .get("stack")
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned),
            code: obj.get("code").and_then(serde_json::Value::as_i64),
            data: obj.get("data").cloned(),
        })
    }
}

impl std::fmt::Display for RpcFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for RpcFailure {}

impl From<String> for RpcFailure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for RpcFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_failure_roundtrip() {
        let failure = RpcFailure::new("it broke").with_stack("at frob()\nat main()");
        let decoded = RpcFailure::from_value(&failure.to_value()).unwrap();
        assert_eq!(decoded, failure);
        assert!(!decoded.is_application());
    }

    #[test]
    fn application_failure_roundtrip() {
        let failure = RpcFailure::application(-32001, "not found", Some(json!({"path": "/x"})));
        let decoded = RpcFailure::from_value(&failure.to_value()).unwrap();
        assert_eq!(decoded.code, Some(-32001));
        assert_eq!(decoded.data, Some(json!({"path": "/x"})));
        assert!(decoded.is_application());
    }

    #[test]
    fn unmarked_values_are_not_failures() {
        assert!(RpcFailure::from_value(&Value::from(json!({"message": "x"}))).is_none());
        assert!(RpcFailure::from_value(&Value::from("oops")).is_none());
        assert!(RpcFailure::from_value(&Value::Undefined).is_none());
    }

    #[test]
    fn display_names_the_failure() {
        let failure = RpcFailure::named("TimeoutError", "deadline exceeded");
        assert_eq!(failure.to_string(), "TimeoutError: deadline exceeded");
    }
}
