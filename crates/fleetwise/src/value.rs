use alloc::string::String;

use hashbrown::DefaultHashBuilder;

use indexmap::IndexMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Device attributes, keyed by field name and kept in insertion order.
pub type Attributes = IndexMap<String, AttributeValue, DefaultHashBuilder>;

/// A single device attribute value.
///
/// Devices report attributes as loosely-typed `JSON` values. Scalars are
/// kept as dedicated variants so they can be inspected without going through
/// `JSON`, while objects, arrays and `null` are kept as they arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Integer(i64),
    /// A floating-point number.
    Float(f64),
    /// A text.
    Text(String),
    /// A structured value: an object, an array, or `null`.
    Structured(JsonValue),
}

impl From<JsonValue> for AttributeValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Bool(value) => Self::Bool(value),
            JsonValue::Number(number) => number.as_i64().map_or_else(
                || Self::Float(number.as_f64().unwrap_or_default()),
                Self::Integer,
            ),
            JsonValue::String(text) => Self::Text(text),
            other => Self::Structured(other),
        }
    }
}

impl From<&JsonValue> for AttributeValue {
    fn from(value: &JsonValue) -> Self {
        Self::from(value.clone())
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.into())
    }
}

impl AttributeValue {
    /// Returns the value as a [`bool`], if it is one.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the value as an [`i64`], if it is an integer.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the value as an [`f64`], if it is numeric.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the value as a [`&str`], if it is a text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }
}
