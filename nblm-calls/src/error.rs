//! Shape errors for positional payloads and arguments.

use nblm_fetch::RpcError;
use serde_json::Value;
use thiserror::Error;

/// A positional value did not have the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unexpected shape at {path}: expected {expected}, found {found}")]
pub struct ShapeError {
    /// Path of the offending value, e.g. `result[0][3][5]`.
    pub path: String,
    /// What the reader expected.
    pub expected: String,
    /// What it found.
    pub found: String,
}

impl ShapeError {
    /// Creates a shape error describing the value found at `path`.
    pub fn new(path: impl Into<String>, expected: impl Into<String>, found: &Value) -> Self {
        Self {
            path: path.into(),
            expected: expected.into(),
            found: describe(found),
        }
    }

    /// Creates a shape error for a position that does not exist.
    pub fn missing(path: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            expected: expected.into(),
            found: "nothing".to_string(),
        }
    }
}

impl From<ShapeError> for RpcError {
    fn from(err: ShapeError) -> Self {
        RpcError::Parse(err.to_string())
    }
}

/// Short description of a JSON value for error messages.
pub fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("bool {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) if s.chars().count() > 32 => "long string".to_string(),
        Value::String(s) => format!("string {s:?}"),
        Value::Array(items) => format!("array of {}", items.len()),
        Value::Object(_) => "object".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_names_path() {
        let err = ShapeError::new("result[2]", "string", &json!([1, 2]));
        assert_eq!(
            err.to_string(),
            "Unexpected shape at result[2]: expected string, found array of 2"
        );
    }

    #[test]
    fn test_converts_to_parse_error() {
        let err: RpcError = ShapeError::missing("result[0]", "array").into();
        assert!(matches!(err, RpcError::Parse(ref msg) if msg.contains("result[0]")));
        assert!(err.is_retryable_once());
    }
}
