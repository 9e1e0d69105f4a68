//! Request encoding.
//!
//! Batched body: `f.req=<pct([[[id, args_json, null, tag], ...]])>&at=<pct(csrf)>&`.
//! Streaming body: `f.req=<pct([null, args_json])>&at=<pct(csrf)>&`.
//! The trailing `&` is part of the format.

use nblm_core::{CoreError, RpcValue};
use serde_json::{Value, json};
use std::fmt;
use url::Url;

use crate::error::RpcError;

// ============================================================================
// Constants
// ============================================================================

/// Batched transport path.
pub const BATCH_EXECUTE_PATH: &str = "/_/LabsTailwindUi/data/batchexecute";

/// Streaming query transport path.
pub const STREAM_QUERY_PATH: &str = "/_/LabsTailwindUi/data/google.internal.labs.tailwind.orchestration.v1.LabsTailwindOrchestrationService/GenerateFreeFormStreamed";

/// Correlation tag of a single-call envelope.
pub const GENERIC_TAG: &str = "generic";

/// Longest body fragment written to trace logs.
const MAX_LOGGED_BODY: usize = 2000;

// ============================================================================
// Request Context
// ============================================================================

/// Per-request values that are not call arguments.
#[derive(Clone)]
pub struct RequestContext {
    /// Service origin, e.g. `https://notebooklm.google.com`.
    pub base_url: String,
    /// `source-path` hint, e.g. `/notebook/<id>`.
    pub source_path: String,
    /// `bl` frontend build label.
    pub build_label: String,
    /// `hl` language code.
    pub language: String,
    /// `f.sid`. Omitted from the URL when empty.
    pub session_id: String,
    /// `at`. Omitted from the body when empty.
    pub csrf_token: String,
    /// `_reqid` counter value.
    pub request_id: u64,
}

impl RequestContext {
    /// Creates a context with `/` source path and `en` language.
    pub fn new(base_url: impl Into<String>, build_label: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            source_path: "/".to_string(),
            build_label: build_label.into(),
            language: "en".to_string(),
            session_id: String::new(),
            csrf_token: String::new(),
            request_id: 0,
        }
    }

    /// Sets the source path.
    #[must_use]
    pub fn with_source_path(mut self, path: impl Into<String>) -> Self {
        self.source_path = path.into();
        self
    }

    /// Sets CSRF token and session id.
    #[must_use]
    pub fn with_tokens(mut self, csrf_token: impl Into<String>, session_id: impl Into<String>) -> Self {
        self.csrf_token = csrf_token.into();
        self.session_id = session_id.into();
        self
    }

    /// Sets the language code.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Sets the request counter.
    #[must_use]
    pub fn with_request_id(mut self, request_id: u64) -> Self {
        self.request_id = request_id;
        self
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("base_url", &self.base_url)
            .field("source_path", &self.source_path)
            .field("build_label", &self.build_label)
            .field("language", &self.language)
            .field("session_id", &self.session_id)
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Calls
// ============================================================================

/// One call inside a batched envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchCall {
    /// RPC id, e.g. `wXbhsf`.
    pub call_id: String,
    /// Positional arguments.
    pub args: Vec<RpcValue>,
}

impl BatchCall {
    /// Creates a call.
    pub fn new(call_id: impl Into<String>, args: Vec<RpcValue>) -> Self {
        Self {
            call_id: call_id.into(),
            args,
        }
    }
}

/// The key a result item must echo to be attributed to a call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallKey {
    /// RPC id.
    pub call_id: String,
    /// `generic` for single calls, `1..n` for multi-call envelopes.
    pub tag: String,
}

/// An encoded request, ready for the transport.
#[derive(Debug, Clone)]
pub struct EncodedRequest {
    /// Full URL including query string.
    pub url: String,
    /// Form-encoded body.
    pub body: String,
    /// Correlation keys in request order. Empty for streaming requests.
    pub calls: Vec<CallKey>,
}

impl EncodedRequest {
    /// Body with the CSRF token masked, truncated for logs.
    pub fn redacted_body(&self) -> String {
        let masked = self
            .body
            .split('&')
            .map(|pair| {
                if pair.starts_with("at=") {
                    "at=(csrf_token)"
                } else {
                    pair
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        if masked.len() > MAX_LOGGED_BODY {
            let mut end = MAX_LOGGED_BODY;
            while !masked.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated)", &masked[..end])
        } else {
            masked
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes a single batched call with the `generic` tag.
pub fn encode_batched(
    call_id: &str,
    args: &[RpcValue],
    ctx: &RequestContext,
) -> Result<EncodedRequest, RpcError> {
    let call = BatchCall::new(call_id, args.to_vec());
    encode_batch(std::slice::from_ref(&call), ctx)
}

/// Encodes one or more calls into a single batched envelope.
///
/// Multi-call envelopes tag calls `"1"`, `"2"`, ... in request order so the
/// response can be correlated without trusting result order.
pub fn encode_batch(calls: &[BatchCall], ctx: &RequestContext) -> Result<EncodedRequest, RpcError> {
    if calls.is_empty() {
        return Err(RpcError::Encoding("batch contains no calls".to_string()));
    }

    let mut entries = Vec::with_capacity(calls.len());
    let mut keys = Vec::with_capacity(calls.len());
    for (index, call) in calls.iter().enumerate() {
        if call.call_id.is_empty() {
            return Err(RpcError::Encoding("empty call id".to_string()));
        }
        let tag = if calls.len() == 1 {
            GENERIC_TAG.to_string()
        } else {
            (index + 1).to_string()
        };
        let args_json = encode_args(&call.args)?;
        entries.push(json!([call.call_id, args_json, Value::Null, tag]));
        keys.push(CallKey {
            call_id: call.call_id.clone(),
            tag,
        });
    }

    let envelope = Value::Array(vec![Value::Array(entries)]);
    let f_req = serde_json::to_string(&envelope).map_err(|e| RpcError::Encoding(e.to_string()))?;

    let rpc_ids = calls
        .iter()
        .map(|c| c.call_id.as_str())
        .collect::<Vec<_>>()
        .join(",");
    let request_id = ctx.request_id.to_string();

    let mut params: Vec<(&str, &str)> = vec![
        ("rpcids", rpc_ids.as_str()),
        ("source-path", ctx.source_path.as_str()),
        ("bl", ctx.build_label.as_str()),
    ];
    if !ctx.session_id.is_empty() {
        params.push(("f.sid", ctx.session_id.as_str()));
    }
    params.push(("hl", ctx.language.as_str()));
    params.push(("_reqid", request_id.as_str()));
    params.push(("rt", "c"));

    Ok(EncodedRequest {
        url: build_url(&ctx.base_url, BATCH_EXECUTE_PATH, &params)?,
        body: form_body(&f_req, &ctx.csrf_token),
        calls: keys,
    })
}

/// Encodes the free-form streaming query.
pub fn encode_streaming(args: &[RpcValue], ctx: &RequestContext) -> Result<EncodedRequest, RpcError> {
    let args_json = encode_args(args)?;
    let f_req = serde_json::to_string(&json!([Value::Null, args_json]))
        .map_err(|e| RpcError::Encoding(e.to_string()))?;

    let request_id = ctx.request_id.to_string();
    let mut params: Vec<(&str, &str)> = vec![
        ("bl", ctx.build_label.as_str()),
        ("hl", ctx.language.as_str()),
        ("_reqid", request_id.as_str()),
        ("rt", "c"),
    ];
    if !ctx.session_id.is_empty() {
        params.push(("f.sid", ctx.session_id.as_str()));
    }

    Ok(EncodedRequest {
        url: build_url(&ctx.base_url, STREAM_QUERY_PATH, &params)?,
        body: form_body(&f_req, &ctx.csrf_token),
        calls: Vec::new(),
    })
}

fn encode_args(args: &[RpcValue]) -> Result<String, RpcError> {
    RpcValue::encode_args(args).map_err(|e| match e {
        CoreError::Encoding(msg) => RpcError::Encoding(msg),
        other => RpcError::Core(other),
    })
}

/// `f.req=...&at=...&`, every byte outside `A-Za-z0-9-_.~` percent-encoded.
fn form_body(f_req: &str, csrf_token: &str) -> String {
    let mut body = format!("f.req={}&", urlencoding::encode(f_req));
    if !csrf_token.is_empty() {
        body.push_str("at=");
        body.push_str(&urlencoding::encode(csrf_token));
        body.push('&');
    }
    body
}

/// Joins `path` onto the origin and form-encodes the query (`/` → `%2F`, space → `+`).
fn build_url(base_url: &str, path: &str, params: &[(&str, &str)]) -> Result<String, RpcError> {
    let mut url = Url::parse(base_url)
        .map_err(|e| RpcError::Encoding(format!("invalid base URL {base_url}: {e}")))?;
    url.set_path(path);
    url.query_pairs_mut().clear().extend_pairs(params);
    Ok(url.into())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RequestContext {
        RequestContext::new("https://notebooklm.google.com", "boq_test")
            .with_tokens("AJpMi:123", "-42")
            .with_request_id(200_000)
    }

    #[test]
    fn test_single_call_body() {
        let args = vec![RpcValue::Null, RpcValue::from(1), RpcValue::Null, RpcValue::seq([2])];
        let req = encode_batched("wXbhsf", &args, &ctx()).unwrap();

        let expected_f_req = r#"[[["wXbhsf","[null,1,null,[2]]",null,"generic"]]]"#;
        assert_eq!(
            req.body,
            format!(
                "f.req={}&at=AJpMi%3A123&",
                urlencoding::encode(expected_f_req)
            )
        );
        assert_eq!(
            req.calls,
            vec![CallKey {
                call_id: "wXbhsf".to_string(),
                tag: "generic".to_string()
            }]
        );
    }

    #[test]
    fn test_single_call_url() {
        let req = encode_batched(
            "rLM1Ne",
            &[RpcValue::from("nb-1")],
            &ctx().with_source_path("/notebook/nb-1"),
        )
        .unwrap();

        assert_eq!(
            req.url,
            "https://notebooklm.google.com/_/LabsTailwindUi/data/batchexecute\
             ?rpcids=rLM1Ne&source-path=%2Fnotebook%2Fnb-1&bl=boq_test&f.sid=-42&hl=en&_reqid=200000&rt=c"
        );
    }

    #[test]
    fn test_empty_session_and_csrf_omitted() {
        let ctx = RequestContext::new("https://notebooklm.google.com", "bl");
        let req = encode_batched("wXbhsf", &[], &ctx).unwrap();

        assert!(!req.url.contains("f.sid"));
        assert!(!req.body.contains("at="));
        assert!(req.body.ends_with('&'));
    }

    #[test]
    fn test_multi_call_tags() {
        let calls = vec![
            BatchCall::new("wXbhsf", vec![]),
            BatchCall::new("ozz5Z", vec![RpcValue::Null]),
        ];
        let req = encode_batch(&calls, &ctx()).unwrap();

        let tags: Vec<_> = req.calls.iter().map(|k| k.tag.as_str()).collect();
        assert_eq!(tags, vec!["1", "2"]);
        assert!(req.url.contains("rpcids=wXbhsf%2Cozz5Z"));
        let decoded = urlencoding::decode(&req.body).unwrap();
        assert!(decoded.contains(r#"["wXbhsf","[]",null,"1"]"#));
        assert!(decoded.contains(r#"["ozz5Z","[null]",null,"2"]"#));
    }

    #[test]
    fn test_empty_batch_is_encoding_error() {
        assert!(matches!(encode_batch(&[], &ctx()), Err(RpcError::Encoding(_))));
    }

    #[test]
    fn test_nan_argument_is_encoding_error() {
        let err = encode_batched("wXbhsf", &[RpcValue::from(f64::NAN)], &ctx()).unwrap_err();
        assert!(matches!(err, RpcError::Encoding(_)));
    }

    #[test]
    fn test_streaming_request() {
        let args = vec![
            RpcValue::seq([RpcValue::seq([RpcValue::seq(["src-1"])])]),
            RpcValue::from("What is this?"),
            RpcValue::Null,
            RpcValue::from(serde_json::json!([2, null, [1]])),
            RpcValue::from("conv-1"),
        ];
        let req = encode_streaming(&args, &ctx()).unwrap();

        assert!(req.url.starts_with(
            "https://notebooklm.google.com/_/LabsTailwindUi/data/google.internal.labs.tailwind.orchestration.v1.LabsTailwindOrchestrationService/GenerateFreeFormStreamed?"
        ));
        assert!(req.url.ends_with("bl=boq_test&hl=en&_reqid=200000&rt=c&f.sid=-42"));
        assert!(req.calls.is_empty());

        let f_req = req.body.strip_prefix("f.req=").unwrap().split('&').next().unwrap();
        let decoded = urlencoding::decode(f_req).unwrap();
        assert_eq!(
            decoded,
            r#"[null,"[[[[\"src-1\"]]],\"What is this?\",null,[2,null,[1]],\"conv-1\"]"]"#
        );
    }

    #[test]
    fn test_redacted_body() {
        let req = encode_batched("wXbhsf", &[], &ctx()).unwrap();
        let redacted = req.redacted_body();

        assert!(!redacted.contains("AJpMi"));
        assert!(redacted.contains("at=(csrf_token)"));
    }

    #[test]
    fn test_debug_hides_csrf() {
        assert!(!format!("{:?}", ctx()).contains("AJpMi"));
    }
}
