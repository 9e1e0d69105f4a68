//! Serialization tests for the persisted credential format.
//!
//! The credential file is shared with the login tool, so field names and the
//! float timestamp must stay stable.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeMap;

use super::{Credential, RecoveryState};

#[test]
fn test_credential_reads_login_tool_file() {
    let raw = json!({
        "cookies": {"SID": "a", "HSID": "b"},
        "csrf_token": "AJpMi_token",
        "session_id": "-123456789",
        "extracted_at": 1_736_000_000.5
    });

    let cred: Credential = serde_json::from_value(raw).unwrap();

    assert_eq!(cred.cookies.len(), 2);
    assert_eq!(cred.csrf_token, "AJpMi_token");
    assert_eq!(cred.session_id, "-123456789");
    assert_eq!(cred.extracted_at.timestamp(), 1_736_000_000);
    assert_eq!(cred.extracted_at.timestamp_subsec_millis(), 500);
}

#[test]
fn test_credential_missing_fields_default() {
    let cred: Credential = serde_json::from_value(json!({"cookies": {"SID": "a"}})).unwrap();

    assert!(cred.csrf_token.is_empty());
    assert!(cred.session_id.is_empty());
    assert_eq!(cred.extracted_at, DateTime::<Utc>::default());
}

#[test]
fn test_credential_null_timestamp() {
    let cred: Credential =
        serde_json::from_value(json!({"cookies": {}, "extracted_at": null})).unwrap();

    assert_eq!(cred.extracted_at, DateTime::<Utc>::default());
}

#[test]
fn test_credential_writes_float_timestamp() {
    let mut cookies = BTreeMap::new();
    cookies.insert("SID".to_string(), "a".to_string());
    let mut cred = Credential::new(cookies, "csrf", "sid");
    cred.extracted_at = DateTime::from_timestamp(1_700_000_000, 250_000_000).unwrap();

    let value = serde_json::to_value(&cred).unwrap();

    assert_eq!(value["cookies"]["SID"], "a");
    assert_eq!(value["csrf_token"], "csrf");
    assert_eq!(value["session_id"], "sid");
    assert!((value["extracted_at"].as_f64().unwrap() - 1_700_000_000.25).abs() < 1e-6);
}

#[test]
fn test_recovery_state_snake_case() {
    let value = serde_json::to_value(RecoveryState::NeedsCsrfRefresh).unwrap();
    assert_eq!(value, "needs_csrf_refresh");
}
