//! Loosely-typed event payloads
//!
//! `twm` event data is a JSON object whose fields depend on the event name
//! and may be missing on older producers. `Payload` keeps the raw
//! `serde_json` map and offers lookups that fall back to a caller-chosen
//! default instead of failing, so a missing or oddly-typed field never
//! costs the whole event.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The `data` object of an event or response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Raw access to a field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// String field, or `None` if absent or not a string
    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// String field with a fallback such as `"Unknown"`
    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.str(key).unwrap_or(default)
    }

    /// Non-negative integer field
    pub fn u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    pub fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.u64(key).unwrap_or(default)
    }

    /// Signed integer field
    pub fn i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn i64_or(&self, key: &str, default: i64) -> i64 {
        self.i64(key).unwrap_or(default)
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.bool(key).unwrap_or(default)
    }

    /// Nested object field; empty when absent or not an object
    pub fn object(&self, key: &str) -> Payload {
        match self.get(key) {
            Some(Value::Object(map)) => Payload(map.clone()),
            _ => Payload::new(),
        }
    }

    /// Opaque handle field (integer or string on the wire)
    pub fn handle(&self, key: &str) -> Option<Handle> {
        self.get(key).and_then(Handle::from_value)
    }

    /// Field rendered for display, `default` when absent or null
    ///
    /// Strings are shown without quotes; other values use their JSON form.
    pub fn display_or(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            None | Some(Value::Null) => default.to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Payload> for Value {
    fn from(payload: Payload) -> Self {
        Value::Object(payload.0)
    }
}

/// Opaque identifier such as a window handle (hwnd)
///
/// The producer has sent handles both as JSON numbers and as decimal
/// strings. They are compared as given and never interpreted
/// arithmetically, so `Int(123)` and `Text("123")` are distinct values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Handle {
    Int(i64),
    Text(String),
}

impl Handle {
    /// Build a handle from a JSON value; only integers and strings qualify
    ///
    /// Integers beyond `i64` keep their decimal digits as `Text`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => match (n.as_i64(), n.as_u64()) {
                (Some(n), _) => Some(Handle::Int(n)),
                (None, Some(n)) => Some(Handle::Text(n.to_string())),
                (None, None) => None,
            },
            Value::String(s) => Some(Handle::Text(s.clone())),
            _ => None,
        }
    }

    /// Argument form for passing the handle back to `twm`
    pub fn as_arg(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Int(n) => write!(f, "{}", n),
            Handle::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Handle {
    fn from(n: i64) -> Self {
        Handle::Int(n)
    }
}

impl From<&str> for Handle {
    fn from(s: &str) -> Self {
        Handle::Text(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => Payload::from(map),
            other => panic!("test payload must be an object, got {}", other),
        }
    }

    #[test]
    fn test_accessors_read_present_fields() {
        let data = payload(json!({
            "title": "Notes",
            "workspace": 2,
            "floating": true,
            "offset": -4,
            "scale": 1.5
        }));

        assert_eq!(data.str("title"), Some("Notes"));
        assert_eq!(data.u64("workspace"), Some(2));
        assert_eq!(data.bool("floating"), Some(true));
        assert_eq!(data.i64("offset"), Some(-4));
        assert_eq!(data.f64("scale"), Some(1.5));
    }

    #[test]
    fn test_accessors_default_on_missing_fields() {
        let data = Payload::new();

        assert_eq!(data.str_or("title", "Unknown"), "Unknown");
        assert_eq!(data.u64_or("window_count", 0), 0);
        assert_eq!(data.i64_or("x", 0), 0);
        assert!(!data.bool_or("active", false));
        assert_eq!(data.display_or("workspace", "?"), "?");
        assert!(data.object("rect").is_empty());
        assert_eq!(data.handle("hwnd"), None);
    }

    #[test]
    fn test_accessors_default_on_wrong_shape() {
        let data = payload(json!({
            "title": 42,
            "workspace": "two",
            "active": "yes",
            "rect": [1, 2, 3, 4],
            "hwnd": {"nested": true}
        }));

        assert_eq!(data.str_or("title", "Unknown"), "Unknown");
        assert_eq!(data.u64_or("workspace", 0), 0);
        assert!(!data.bool_or("active", false));
        assert!(data.object("rect").is_empty());
        assert_eq!(data.handle("hwnd"), None);
    }

    #[test]
    fn test_display_or_renders_strings_without_quotes() {
        let data = payload(json!({"hwnd": "0x1A2B", "workspace": 3, "gone": null}));

        assert_eq!(data.display_or("hwnd", "Unknown"), "0x1A2B");
        assert_eq!(data.display_or("workspace", "?"), "3");
        assert_eq!(data.display_or("gone", "?"), "?");
    }

    #[test]
    fn test_handle_accepts_integers_and_strings() {
        assert_eq!(Handle::from_value(&json!(123)), Some(Handle::Int(123)));
        assert_eq!(
            Handle::from_value(&json!("65794")),
            Some(Handle::Text("65794".to_string()))
        );
        assert_eq!(Handle::from_value(&json!(1.5)), None);
        assert_eq!(Handle::from_value(&json!(null)), None);
    }

    #[test]
    fn test_handle_wider_than_i64_keeps_digits() {
        let big = u64::MAX;
        let handle = Handle::from_value(&json!(big)).unwrap();

        assert_eq!(handle, Handle::Text("18446744073709551615".to_string()));
        assert_eq!(handle.as_arg(), big.to_string());

        let data = payload(json!({"hwnd": big}));
        assert_eq!(data.handle("hwnd"), Some(handle));
    }

    #[test]
    fn test_handle_is_opaque() {
        // Same digits, different wire representation: not the same handle
        assert_ne!(Handle::from(123), Handle::from("123"));
        assert_eq!(Handle::from(123).to_string(), "123");
        assert_eq!(Handle::from("123").as_arg(), "123");
    }

    #[test]
    fn test_payload_serializes_as_plain_object() {
        let data = payload(json!({"id": 1}));
        assert_eq!(serde_json::to_string(&data).unwrap(), r#"{"id":1}"#);
    }
}
