//! Result items and batch correlation.
//!
//! A decoded frame holds items such as
//! `["wrb.fr", id, result_json, null, null, [code], tag]`. Only `wrb.fr`
//! items carry call results; `di`, `af.httprm` and the like are ignored.

use serde_json::Value;
use std::collections::HashMap;

use super::request::CallKey;
use crate::error::RpcError;

/// Marker of a call result item.
pub const RESULT_MARKER: &str = "wrb.fr";

// ============================================================================
// Result Item
// ============================================================================

/// One `wrb.fr` item from a response frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultItem {
    /// Echoed call id, when present.
    pub call_id: Option<String>,
    /// Result payload. String payloads are parsed as JSON when they parse.
    pub payload: Option<Value>,
    /// Status code from an error marker.
    pub error_code: Option<i64>,
    /// Echoed correlation tag, when present.
    pub tag: Option<String>,
}

impl ResultItem {
    /// Reads an item, returning `None` for anything that is not `wrb.fr`.
    pub fn from_value(item: &Value) -> Option<Self> {
        let fields = item.as_array()?;
        if fields.first()?.as_str()? != RESULT_MARKER {
            return None;
        }

        let call_id = fields.get(1).and_then(Value::as_str).map(str::to_string);
        let payload = match fields.get(2) {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(
                serde_json::from_str::<Value>(text).unwrap_or_else(|_| Value::String(text.clone())),
            ),
            Some(other) => Some(other.clone()),
        };
        let error_code = fields.get(5).and_then(error_code);
        let tag = fields.get(6).and_then(|t| match t {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        Some(Self {
            call_id,
            payload,
            error_code,
            tag,
        })
    }

    fn into_chunk(self) -> ResponseChunk {
        match self.error_code {
            Some(code) => ResponseChunk::Error { code },
            None => ResponseChunk::Payload(self.payload.unwrap_or(Value::Null)),
        }
    }
}

/// `[code]`, or a bare number on some endpoints.
fn error_code(marker: &Value) -> Option<i64> {
    match marker {
        Value::Array(items) => items.first().and_then(Value::as_i64),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

/// Collects every `wrb.fr` item from decoded frames, in order.
///
/// A frame may be a list of items or a single item.
pub fn result_items(frames: &[Value]) -> Vec<ResultItem> {
    let mut items = Vec::new();
    for frame in frames {
        let Some(entries) = frame.as_array() else {
            continue;
        };
        if entries.first().and_then(Value::as_str) == Some(RESULT_MARKER) {
            items.extend(ResultItem::from_value(frame));
            continue;
        }
        items.extend(entries.iter().filter_map(ResultItem::from_value));
    }
    items
}

// ============================================================================
// Responses
// ============================================================================

/// One piece of a call's response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseChunk {
    /// Result payload.
    Payload(Value),
    /// Error marker with its status code.
    Error {
        /// Status code.
        code: i64,
    },
}

/// Everything the server returned for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    /// Call id.
    pub call_id: String,
    /// Correlation tag.
    pub tag: String,
    /// Chunks in arrival order.
    pub chunks: Vec<ResponseChunk>,
}

impl RpcResponse {
    /// First payload, if any.
    pub fn payload(&self) -> Option<&Value> {
        self.chunks.iter().find_map(|c| match c {
            ResponseChunk::Payload(v) => Some(v),
            ResponseChunk::Error { .. } => None,
        })
    }

    /// Consumes the response, returning the first payload or `null`.
    pub fn into_payload(self) -> Value {
        self.chunks
            .into_iter()
            .find_map(|c| match c {
                ResponseChunk::Payload(v) => Some(v),
                ResponseChunk::Error { .. } => None,
            })
            .unwrap_or(Value::Null)
    }

    /// First error marker code, if any.
    pub fn error_code(&self) -> Option<i64> {
        self.chunks.iter().find_map(|c| match c {
            ResponseChunk::Error { code } => Some(*code),
            ResponseChunk::Payload(_) => None,
        })
    }
}

/// Attributes result items to calls by `(call id, tag)`.
///
/// Items arrive in any order. An item without a tag is attributed by id
/// only when that id appears once in the batch; an item without an id is
/// attributed by tag. Fails with [`RpcError::MissingResult`] for the first
/// call nothing matched.
pub fn correlate(items: Vec<ResultItem>, keys: &[CallKey]) -> Result<Vec<RpcResponse>, RpcError> {
    let mut id_counts: HashMap<&str, usize> = HashMap::new();
    for key in keys {
        *id_counts.entry(key.call_id.as_str()).or_default() += 1;
    }

    let mut responses: Vec<RpcResponse> = keys
        .iter()
        .map(|key| RpcResponse {
            call_id: key.call_id.clone(),
            tag: key.tag.clone(),
            chunks: Vec::new(),
        })
        .collect();

    for item in items {
        let slot = keys.iter().position(|key| {
            match (item.call_id.as_deref(), item.tag.as_deref()) {
                (Some(id), Some(tag)) => id == key.call_id && tag == key.tag,
                (Some(id), None) => id == key.call_id && id_counts.get(id) == Some(&1),
                (None, Some(tag)) => tag == key.tag,
                (None, None) => false,
            }
        });
        if let Some(index) = slot {
            responses[index].chunks.push(item.into_chunk());
        }
    }

    if let Some(missing) = responses.iter().find(|r| r.chunks.is_empty()) {
        return Err(RpcError::MissingResult {
            call: missing.call_id.clone(),
            tag: missing.tag.clone(),
        });
    }
    Ok(responses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_item_parses_string_payload() {
        let item =
            ResultItem::from_value(&json!(["wrb.fr", "wXbhsf", "[[\"nb\"]]", null, null, null, "generic"]))
                .unwrap();
        assert_eq!(item.call_id.as_deref(), Some("wXbhsf"));
        assert_eq!(item.payload, Some(json!([["nb"]])));
        assert_eq!(item.tag.as_deref(), Some("generic"));
        assert_eq!(item.error_code, None);
    }

    #[test]
    fn test_item_keeps_non_json_string() {
        let item = ResultItem::from_value(&json!(["wrb.fr", "x", "not json"])).unwrap();
        assert_eq!(item.payload, Some(json!("not json")));
    }

    #[test]
    fn test_item_error_marker() {
        let item =
            ResultItem::from_value(&json!(["wrb.fr", "x", null, null, null, [16], "generic"])).unwrap();
        assert_eq!(item.error_code, Some(16));
        assert_eq!(item.payload, None);
    }

    #[test]
    fn test_non_result_items_ignored() {
        let frames = vec![
            json!([["wrb.fr", "a", "1", null, null, null, "generic"], ["di", 42], ["af.httprm", 42, "x", 1]]),
            json!([["e", 4, null, null, 100]]),
        ];
        let items = result_items(&frames);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].payload, Some(json!(1)));
    }

    #[test]
    fn test_untagged_duplicate_id_not_attributed() {
        let keys = vec![
            CallKey {
                call_id: "a".to_string(),
                tag: "1".to_string(),
            },
            CallKey {
                call_id: "a".to_string(),
                tag: "2".to_string(),
            },
        ];
        let items = vec![ResultItem {
            call_id: Some("a".to_string()),
            payload: Some(json!(1)),
            error_code: None,
            tag: None,
        }];

        let err = correlate(items, &keys).unwrap_err();
        assert!(matches!(err, RpcError::MissingResult { ref tag, .. } if tag == "1"));
    }

    #[test]
    fn test_response_accessors() {
        let response = RpcResponse {
            call_id: "a".to_string(),
            tag: "generic".to_string(),
            chunks: vec![ResponseChunk::Error { code: 3 }, ResponseChunk::Payload(json!([1]))],
        };
        assert_eq!(response.error_code(), Some(3));
        assert_eq!(response.payload(), Some(&json!([1])));
        assert_eq!(response.into_payload(), json!([1]));
    }
}
