//! Host-side representation of script values.
//!
//! Values cross the thread boundary in this form: arguments for deferred
//! invocations travel to the owner thread as `JSValue`, and results travel
//! back to the host the same way. Engine-owned values never leave the owner
//! thread; see [`crate::runtime::engine::ValueId`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Maximum depth for JavaScript value serialization
pub const MAX_JS_DEPTH: usize = 100;
/// Maximum size in bytes for JavaScript value serialization
pub const MAX_JS_BYTES: usize = 10 * 1024 * 1024; // 10MB

/// JavaScript value as seen by the host.
///
/// Unlike `serde_json::Value`, this enum keeps `undefined` apart from `null`
/// and can carry NaN and ±Infinity.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum JSValue {
    /// JavaScript undefined; also the inert result of skipped work
    #[default]
    Undefined,
    /// JavaScript null
    Null,
    /// JavaScript boolean
    Bool(bool),
    /// JavaScript integer (within i64 range)
    Int(i64),
    /// JavaScript float (including NaN and ±Infinity)
    Float(f64),
    /// JavaScript string
    String(String),
    /// JavaScript array (preserves order)
    Array(Vec<JSValue>),
    /// JavaScript object (uses IndexMap to preserve insertion order)
    Object(IndexMap<String, JSValue>),
}

impl JSValue {
    /// Name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            JSValue::Undefined => "undefined",
            JSValue::Null => "null",
            JSValue::Bool(_) => "boolean",
            JSValue::Int(_) | JSValue::Float(_) => "number",
            JSValue::String(_) => "string",
            JSValue::Array(_) => "array",
            JSValue::Object(_) => "object",
        }
    }

    /// Whether the value can be passed as a deferred invocation argument.
    pub fn is_native_argument(&self) -> bool {
        !matches!(self, JSValue::Array(_) | JSValue::Object(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            JSValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, JSValue::Undefined)
    }
}

impl From<bool> for JSValue {
    fn from(value: bool) -> Self {
        JSValue::Bool(value)
    }
}

impl From<i64> for JSValue {
    fn from(value: i64) -> Self {
        JSValue::Int(value)
    }
}

impl From<i32> for JSValue {
    fn from(value: i32) -> Self {
        JSValue::Int(i64::from(value))
    }
}

impl From<f64> for JSValue {
    fn from(value: f64) -> Self {
        JSValue::Float(value)
    }
}

impl From<&str> for JSValue {
    fn from(value: &str) -> Self {
        JSValue::String(value.to_owned())
    }
}

impl From<String> for JSValue {
    fn from(value: String) -> Self {
        JSValue::String(value)
    }
}

// undefined and null both serialize as JSON null.
impl Serialize for JSValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            JSValue::Undefined | JSValue::Null => serializer.serialize_none(),
            JSValue::Bool(b) => serializer.serialize_bool(*b),
            JSValue::Int(i) => serializer.serialize_i64(*i),
            JSValue::Float(f) => serializer.serialize_f64(*f),
            JSValue::String(s) => serializer.serialize_str(s),
            JSValue::Array(arr) => arr.serialize(serializer),
            JSValue::Object(obj) => obj.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for JSValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct JSValueVisitor;

        impl<'de> Visitor<'de> for JSValueVisitor {
            type Value = JSValue;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter
                    .write_str("a JavaScript value (null, bool, number, string, array, or object)")
            }

            fn visit_bool<E>(self, value: bool) -> Result<Self::Value, E> {
                Ok(JSValue::Bool(value))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E> {
                Ok(JSValue::Int(value))
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E> {
                if value <= i64::MAX as u64 {
                    Ok(JSValue::Int(value as i64))
                } else {
                    Ok(JSValue::Float(value as f64))
                }
            }

            fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E> {
                Ok(JSValue::Float(value))
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E> {
                Ok(JSValue::String(value.to_owned()))
            }

            fn visit_string<E>(self, value: String) -> Result<Self::Value, E> {
                Ok(JSValue::String(value))
            }

            fn visit_none<E>(self) -> Result<Self::Value, E> {
                Ok(JSValue::Null)
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(JSValue::Null)
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut vec = Vec::new();
                while let Some(elem) = seq.next_element()? {
                    vec.push(elem);
                }
                Ok(JSValue::Array(vec))
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: de::MapAccess<'de>,
            {
                let mut obj = IndexMap::new();
                while let Some((key, value)) = map.next_entry()? {
                    obj.insert(key, value);
                }
                Ok(JSValue::Object(obj))
            }
        }

        deserializer.deserialize_any(JSValueVisitor)
    }
}

/// Tracks depth and size limits while converting engine values.
pub struct LimitTracker {
    max_depth: usize,
    max_bytes: usize,
    current_depth: usize,
    current_bytes: usize,
}

impl LimitTracker {
    pub fn new(max_depth: usize, max_bytes: usize) -> Self {
        Self {
            max_depth,
            max_bytes,
            current_depth: 0,
            current_bytes: 0,
        }
    }

    /// Enter a new depth level.
    pub fn enter(&mut self) -> Result<(), String> {
        self.current_depth += 1;
        if self.current_depth > self.max_depth {
            return Err(format!(
                "Depth exceeded maximum limit of {}",
                self.max_depth
            ));
        }
        Ok(())
    }

    pub fn exit(&mut self) {
        self.current_depth = self.current_depth.saturating_sub(1);
    }

    pub fn add_bytes(&mut self, bytes: usize) -> Result<(), String> {
        self.current_bytes += bytes;
        if self.current_bytes > self.max_bytes {
            return Err(format!(
                "Size ({} bytes) exceeded maximum limit of {} bytes",
                self.current_bytes, self.max_bytes
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_argument_kinds() {
        assert!(JSValue::from("hi").is_native_argument());
        assert!(JSValue::from(3).is_native_argument());
        assert!(JSValue::from(2.5).is_native_argument());
        assert!(JSValue::from(true).is_native_argument());
        assert!(JSValue::Null.is_native_argument());
        assert!(!JSValue::Array(vec![]).is_native_argument());
        assert!(!JSValue::Object(IndexMap::new()).is_native_argument());
        assert_eq!(JSValue::Array(vec![]).type_name(), "array");
    }

    #[test]
    fn test_undefined_serializes_as_null() {
        let json = serde_json::to_string(&JSValue::Array(vec![
            JSValue::Undefined,
            JSValue::Int(1),
            JSValue::from("x"),
        ]))
        .unwrap();
        assert_eq!(json, r#"[null,1,"x"]"#);
    }

    #[test]
    fn test_deserialize_preserves_key_order() {
        let value: JSValue = serde_json::from_str(r#"{"b": 1, "a": [true, null]}"#).unwrap();
        let JSValue::Object(map) = value else {
            panic!("expected object");
        };
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(
            map["a"],
            JSValue::Array(vec![JSValue::Bool(true), JSValue::Null])
        );
    }

    #[test]
    fn test_limit_tracker_depth_exceeded() {
        let mut tracker = LimitTracker::new(3, 1000);

        assert!(tracker.enter().is_ok()); // depth 1
        assert!(tracker.enter().is_ok()); // depth 2
        assert!(tracker.enter().is_ok()); // depth 3
        assert!(tracker.enter().is_err()); // depth 4 - should fail
    }

    #[test]
    fn test_limit_tracker_size_exceeded() {
        let mut tracker = LimitTracker::new(10, 100);

        assert!(tracker.add_bytes(50).is_ok());
        assert!(tracker.add_bytes(40).is_ok());
        assert!(tracker.add_bytes(20).is_err()); // Total 110 - should fail
    }
}
