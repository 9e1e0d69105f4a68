//! Positional shapes.
//!
//! [`ArgShape`] declares the argument layout of a call so tests can check
//! that builders produce what the server expects. [`Cursor`] walks a decoded
//! payload and reports the exact path whenever a position is missing or
//! holds the wrong kind of value.

use nblm_core::RpcValue;
use serde_json::Value;

use crate::error::ShapeError;

// ============================================================================
// Argument Shapes
// ============================================================================

/// Declared layout of a positional argument tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgShape {
    /// Anything, including `null`.
    Any,
    /// Exactly `null`.
    Null,
    /// A string.
    Str,
    /// An integer.
    Int,
    /// Exactly this value.
    Literal(Value),
    /// `null` or the inner shape.
    Nullable(Box<ArgShape>),
    /// A fixed-length array, one shape per position.
    Tuple(Vec<ArgShape>),
    /// An array of any length whose items share one shape.
    ListOf(Box<ArgShape>),
}

impl ArgShape {
    /// Fixed-length array.
    pub fn tuple(items: impl IntoIterator<Item = ArgShape>) -> Self {
        Self::Tuple(items.into_iter().collect())
    }

    /// Homogeneous array.
    pub fn list_of(item: ArgShape) -> Self {
        Self::ListOf(Box::new(item))
    }

    /// `null` or `inner`.
    pub fn nullable(inner: ArgShape) -> Self {
        Self::Nullable(Box::new(inner))
    }

    /// Exactly `value`.
    pub fn literal(value: Value) -> Self {
        Self::Literal(value)
    }

    /// Checks an argument list against this shape.
    ///
    /// # Errors
    ///
    /// Returns the first position that does not match.
    pub fn validate_args(&self, args: &[RpcValue]) -> Result<(), ShapeError> {
        let value = serde_json::to_value(args)
            .map_err(|e| ShapeError::missing("args", format!("encodable arguments ({e})")))?;
        self.validate(&value, "args")
    }

    /// Checks `value` against this shape. `path` names the value in errors.
    ///
    /// # Errors
    ///
    /// Returns the first position that does not match.
    pub fn validate(&self, value: &Value, path: &str) -> Result<(), ShapeError> {
        match (self, value) {
            (Self::Any, _)
            | (Self::Null, Value::Null)
            | (Self::Str, Value::String(_))
            | (Self::Nullable(_), Value::Null) => Ok(()),
            (Self::Int, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(()),
            (Self::Literal(expected), found) if expected == found => Ok(()),
            (Self::Nullable(inner), found) => inner.validate(found, path),
            (Self::Tuple(shapes), Value::Array(items)) => {
                if shapes.len() != items.len() {
                    return Err(ShapeError::new(path, self.expected(), value));
                }
                for (i, (shape, item)) in shapes.iter().zip(items).enumerate() {
                    shape.validate(item, &format!("{path}[{i}]"))?;
                }
                Ok(())
            }
            (Self::ListOf(shape), Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    shape.validate(item, &format!("{path}[{i}]"))?;
                }
                Ok(())
            }
            _ => Err(ShapeError::new(path, self.expected(), value)),
        }
    }

    fn expected(&self) -> String {
        match self {
            Self::Any => "anything".to_string(),
            Self::Null => "null".to_string(),
            Self::Str => "string".to_string(),
            Self::Int => "integer".to_string(),
            Self::Literal(value) => format!("literal {value}"),
            Self::Nullable(inner) => format!("null or {}", inner.expected()),
            Self::Tuple(shapes) => format!("array of {}", shapes.len()),
            Self::ListOf(inner) => format!("array of {}", inner.expected()),
        }
    }
}

// ============================================================================
// Payload Cursor
// ============================================================================

/// A position inside a decoded payload, carrying its path.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    value: &'a Value,
    path: String,
}

impl<'a> Cursor<'a> {
    /// Starts at `value`, naming it `root` in paths.
    pub fn root(value: &'a Value, root: &str) -> Self {
        Self {
            value,
            path: root.to_string(),
        }
    }

    /// The value at this position.
    pub fn value(&self) -> &'a Value {
        self.value
    }

    /// Path of this position.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// True for `null`.
    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// Item `index` of an array.
    ///
    /// # Errors
    ///
    /// Fails if this is not an array or the index is out of range.
    pub fn at(&self, index: usize) -> Result<Cursor<'a>, ShapeError> {
        let path = format!("{}[{index}]", self.path);
        match self.items_slice()?.get(index) {
            Some(value) => Ok(Cursor { value, path }),
            None => Err(ShapeError::missing(path, "a value")),
        }
    }

    /// Item `index` when this is an array long enough, `None` otherwise.
    /// A `null` item also yields `None`.
    pub fn get(&self, index: usize) -> Option<Cursor<'a>> {
        let value = self.value.as_array()?.get(index)?;
        if value.is_null() {
            return None;
        }
        Some(Cursor {
            value,
            path: format!("{}[{index}]", self.path),
        })
    }

    /// Items of an array, each with its own path.
    ///
    /// # Errors
    ///
    /// Fails if this is not an array.
    pub fn items(&self) -> Result<Vec<Cursor<'a>>, ShapeError> {
        Ok(self
            .items_slice()?
            .iter()
            .enumerate()
            .map(|(i, value)| Cursor {
                value,
                path: format!("{}[{i}]", self.path),
            })
            .collect())
    }

    /// Items of an array, or nothing for `null`.
    ///
    /// # Errors
    ///
    /// Fails for anything other than an array or `null`.
    pub fn items_or_empty(&self) -> Result<Vec<Cursor<'a>>, ShapeError> {
        if self.is_null() {
            return Ok(Vec::new());
        }
        self.items()
    }

    /// A string.
    ///
    /// # Errors
    ///
    /// Fails for anything other than a string.
    pub fn str(&self) -> Result<&'a str, ShapeError> {
        self.value
            .as_str()
            .ok_or_else(|| ShapeError::new(self.path.clone(), "string", self.value))
    }

    /// A string, or `None` for `null`.
    ///
    /// # Errors
    ///
    /// Fails for anything other than a string or `null`.
    pub fn opt_str(&self) -> Result<Option<&'a str>, ShapeError> {
        if self.is_null() {
            return Ok(None);
        }
        self.str().map(Some)
    }

    /// An integer.
    ///
    /// # Errors
    ///
    /// Fails for anything other than an integer.
    pub fn i64(&self) -> Result<i64, ShapeError> {
        self.value
            .as_i64()
            .ok_or_else(|| ShapeError::new(self.path.clone(), "integer", self.value))
    }

    fn items_slice(&self) -> Result<&'a [Value], ShapeError> {
        self.value
            .as_array()
            .map(Vec::as_slice)
            .ok_or_else(|| ShapeError::new(self.path.clone(), "array", self.value))
    }
}

// ============================================================================
// Tests
// ============================================================================
