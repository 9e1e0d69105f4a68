//! Positional argument values.
//!
//! Call arguments are untyped positional trees. Position carries all meaning,
//! so `Null` placeholders are significant and must never be dropped or coerced.

use serde::ser::{Error as _, SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::error::CoreError;

// ============================================================================
// Number
// ============================================================================

/// A numeric argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RpcNumber {
    /// Integer value.
    Int(i64),
    /// Floating point value. Must be finite to encode.
    Float(f64),
}

// ============================================================================
// Value
// ============================================================================

/// One node of a positional argument tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RpcValue {
    /// JSON `null`.
    #[default]
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON number.
    Number(RpcNumber),
    /// JSON string.
    String(String),
    /// JSON array.
    Sequence(Vec<RpcValue>),
    /// JSON object. Keys keep insertion order on the wire.
    Mapping(Vec<(String, RpcValue)>),
}

impl RpcValue {
    /// Builds a sequence from anything convertible.
    pub fn seq<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<RpcValue>,
    {
        Self::Sequence(items.into_iter().map(Into::into).collect())
    }

    /// Returns true for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Encodes an argument list as compact JSON (`[a,b,c]`, no spaces).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Encoding`] if any number is NaN or infinite.
    pub fn encode_args(args: &[RpcValue]) -> Result<String, CoreError> {
        serde_json::to_string(args).map_err(|e| CoreError::Encoding(e.to_string()))
    }

    /// Encodes this value as compact JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Encoding`] if any number is NaN or infinite.
    pub fn to_json_string(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::Encoding(e.to_string()))
    }
}

impl Serialize for RpcValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(RpcNumber::Int(n)) => serializer.serialize_i64(*n),
            Self::Number(RpcNumber::Float(f)) => {
                // serde_json would silently write NaN as null.
                if !f.is_finite() {
                    return Err(S::Error::custom(format!("non-finite number {f}")));
                }
                serializer.serialize_f64(*f)
            }
            Self::String(s) => serializer.serialize_str(s),
            Self::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Mapping(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<()> for RpcValue {
    fn from((): ()) -> Self {
        Self::Null
    }
}

impl From<bool> for RpcValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for RpcValue {
    fn from(value: i32) -> Self {
        Self::Number(RpcNumber::Int(i64::from(value)))
    }
}

impl From<i64> for RpcValue {
    fn from(value: i64) -> Self {
        Self::Number(RpcNumber::Int(value))
    }
}

impl From<u32> for RpcValue {
    fn from(value: u32) -> Self {
        Self::Number(RpcNumber::Int(i64::from(value)))
    }
}

impl From<f64> for RpcValue {
    fn from(value: f64) -> Self {
        Self::Number(RpcNumber::Float(value))
    }
}

impl From<&str> for RpcValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for RpcValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&String> for RpcValue {
    fn from(value: &String) -> Self {
        Self::String(value.clone())
    }
}

impl<T: Into<RpcValue>> From<Option<T>> for RpcValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<RpcValue>> From<Vec<T>> for RpcValue {
    fn from(value: Vec<T>) -> Self {
        Self::seq(value)
    }
}

impl From<serde_json::Value> for RpcValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Number(RpcNumber::Int(i)),
                None => Self::Number(RpcNumber::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::seq(items),
            Value::Object(map) => {
                Self::Mapping(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
