//! End-to-end codec tests: encode a request, decode a canned response, and
//! attribute results to calls.

use nblm_core::RpcValue;
use serde_json::json;

use super::frames::decode_response;
use super::request::{BatchCall, RequestContext, encode_batch, encode_batched};
use super::results::{ResponseChunk, correlate, result_items};
use crate::error::RpcError;

fn ctx() -> RequestContext {
    RequestContext::new("https://notebooklm.google.com", "boq_labs-tailwind-frontend_test")
        .with_tokens("csrf", "sess")
        .with_request_id(123_456)
}

/// Frames a list of JSON chunks the way the server does.
fn framed(chunks: &[String]) -> Vec<u8> {
    let mut body = String::from(")]}'\n\n");
    for chunk in chunks {
        body.push_str(&format!("{}\n{}\n", chunk.len(), chunk));
    }
    body.into_bytes()
}

fn wrb(id: &str, payload: &serde_json::Value, tag: &str) -> String {
    json!([["wrb.fr", id, payload.to_string(), null, null, null, tag]]).to_string()
}

// ============================================================================
// Single Call
// ============================================================================

#[test]
fn test_single_call_round_trip() {
    let request = encode_batched("wXbhsf", &[RpcValue::Null, 1.into()], &ctx()).unwrap();

    let body = framed(&[
        wrb("wXbhsf", &json!([[["Notebook", null, "nb-1"]]]), "generic"),
        json!([["di", 58], ["af.httprm", 57, "-1", 3]]).to_string(),
    ]);
    let frames = decode_response(&body).unwrap();
    let responses = correlate(result_items(&frames), &request.calls).unwrap();

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].payload(), Some(&json!([[["Notebook", null, "nb-1"]]])));
}

#[test]
fn test_declared_length_scenario() {
    let frames = decode_response(b")]}'\n23\n[[\"r1\",[1,2,3]]]").unwrap();
    assert_eq!(frames, vec![json!([["r1", [1, 2, 3]]])]);
}

#[test]
fn test_declared_length_beyond_body() {
    let err = decode_response(b")]}'\n64\n[[\"r1\",[1,2,3]]]").unwrap_err();
    assert!(matches!(err, RpcError::Framing(_)));
}

#[test]
fn test_missing_result() {
    let request = encode_batched("wXbhsf", &[], &ctx()).unwrap();
    let body = framed(&[json!([["di", 58]]).to_string()]);

    let frames = decode_response(&body).unwrap();
    let err = correlate(result_items(&frames), &request.calls).unwrap_err();
    assert!(matches!(err, RpcError::MissingResult { ref call, .. } if call == "wXbhsf"));
}

// ============================================================================
// Batches
// ============================================================================

#[test]
fn test_out_of_order_batch_correlation() {
    let calls = vec![
        BatchCall::new("rLM1Ne", vec!["nb-1".into()]),
        BatchCall::new("hPTbtc", vec![RpcValue::seq(["src-1"])]),
        BatchCall::new("rLM1Ne", vec!["nb-2".into()]),
    ];
    let request = encode_batch(&calls, &ctx()).unwrap();

    // Server answers in reverse order.
    let body = framed(&[
        wrb("rLM1Ne", &json!(["second notebook"]), "3"),
        wrb("hPTbtc", &json!(["source"]), "2"),
        wrb("rLM1Ne", &json!(["first notebook"]), "1"),
    ]);
    let frames = decode_response(&body).unwrap();
    let responses = correlate(result_items(&frames), &request.calls).unwrap();

    assert_eq!(responses[0].payload(), Some(&json!(["first notebook"])));
    assert_eq!(responses[1].payload(), Some(&json!(["source"])));
    assert_eq!(responses[2].payload(), Some(&json!(["second notebook"])));
}

#[test]
fn test_batch_keeps_per_call_errors() {
    let calls = vec![
        BatchCall::new("CCqFvf", vec!["Title".into()]),
        BatchCall::new("WWINqb", vec![RpcValue::seq(["nb-1"])]),
    ];
    let request = encode_batch(&calls, &ctx()).unwrap();

    let body = framed(&[json!([
        ["wrb.fr", "WWINqb", null, null, null, [5], "2"],
        ["wrb.fr", "CCqFvf", "[\"t\",null,\"nb-9\"]", null, null, null, "1"]
    ])
    .to_string()]);
    let frames = decode_response(&body).unwrap();
    let responses = correlate(result_items(&frames), &request.calls).unwrap();

    assert_eq!(responses[0].payload(), Some(&json!(["t", null, "nb-9"])));
    assert_eq!(responses[1].chunks, vec![ResponseChunk::Error { code: 5 }]);
}

#[test]
fn test_untagged_items_match_unique_ids() {
    let calls = vec![
        BatchCall::new("a", Vec::new()),
        BatchCall::new("b", Vec::new()),
    ];
    let request = encode_batch(&calls, &ctx()).unwrap();

    let body = framed(&[json!([
        ["wrb.fr", "b", "2"],
        ["wrb.fr", "a", "1"]
    ])
    .to_string()]);
    let frames = decode_response(&body).unwrap();
    let responses = correlate(result_items(&frames), &request.calls).unwrap();

    assert_eq!(responses[0].payload(), Some(&json!(1)));
    assert_eq!(responses[1].payload(), Some(&json!(2)));
}

#[test]
fn test_multibyte_payload_frames() {
    let request = encode_batched("VfAZjd", &[], &ctx()).unwrap();
    let body = framed(&[wrb("VfAZjd", &json!(["Résumé – 日本語"]), "generic")]);

    let frames = decode_response(&body).unwrap();
    let responses = correlate(result_items(&frames), &request.calls).unwrap();
    assert_eq!(responses[0].payload(), Some(&json!(["Résumé – 日本語"])));
}
