//! Credential model.
//!
//! A credential is the full set of browser cookies for the Google account plus
//! the two short-lived values scraped from the landing page: the CSRF token
//! (`SNlM0e`) and the session id (`FdrFJe`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Cookie Sets
// ============================================================================

/// Cookies that must be present for a credential to be usable.
pub const REQUIRED_COOKIES: &[&str] = &["SID", "HSID", "SSID", "APISID", "SAPISID"];

/// Cookies kept when importing a full browser cookie header.
pub const ESSENTIAL_COOKIES: &[&str] = &[
    "SID",
    "HSID",
    "SSID",
    "APISID",
    "SAPISID",
    "__Secure-1PSID",
    "__Secure-3PSID",
    "__Secure-1PAPISID",
    "__Secure-3PAPISID",
    "OSID",
    "__Secure-OSID",
    "__Secure-1PSIDTS",
    "__Secure-3PSIDTS",
    "SIDCC",
    "__Secure-1PSIDCC",
    "__Secure-3PSIDCC",
];

// ============================================================================
// Credential
// ============================================================================

/// Authentication material attached to every outbound call.
///
/// The serialized form matches the `auth.json` written by the login tool:
/// `{"cookies": {...}, "csrf_token": "...", "session_id": "...", "extracted_at": 1.7e9}`.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Cookie name to value.
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,

    /// CSRF token sent as the `at` form field.
    #[serde(default)]
    pub csrf_token: String,

    /// Session id sent as the `f.sid` query parameter.
    #[serde(default)]
    pub session_id: String,

    /// When the cookies were extracted from the browser.
    #[serde(default, with = "unix_seconds")]
    pub extracted_at: DateTime<Utc>,
}

impl Credential {
    /// Creates a credential extracted now.
    pub fn new(
        cookies: BTreeMap<String, String>,
        csrf_token: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            cookies,
            csrf_token: csrf_token.into(),
            session_id: session_id.into(),
            extracted_at: Utc::now(),
        }
    }

    /// Creates a credential from cookies only. Tokens are derived later.
    pub fn from_cookies(cookies: BTreeMap<String, String>) -> Self {
        Self::new(cookies, "", "")
    }

    /// Returns a copy with fresh CSRF/session values.
    ///
    /// Cookies and `extracted_at` are untouched: the cookies did not change.
    /// An empty `session_id` keeps the current one.
    #[must_use]
    pub fn with_tokens(&self, csrf_token: impl Into<String>, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        Self {
            cookies: self.cookies.clone(),
            csrf_token: csrf_token.into(),
            session_id: if session_id.is_empty() {
                self.session_id.clone()
            } else {
                session_id
            },
            extracted_at: self.extracted_at,
        }
    }

    /// Renders the `Cookie` header value.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Returns true if any cookies are present.
    pub fn has_cookies(&self) -> bool {
        !self.cookies.is_empty()
    }

    /// Required cookies that are absent or empty.
    pub fn missing_cookies(&self) -> Vec<&'static str> {
        REQUIRED_COOKIES
            .iter()
            .copied()
            .filter(|name| self.cookies.get(*name).is_none_or(String::is_empty))
            .collect()
    }

    /// Returns true if cookies and tokens are identical.
    ///
    /// Ignores `extracted_at` so a re-save of the same material compares equal.
    pub fn same_material(&self, other: &Credential) -> bool {
        self.cookies == other.cookies
            && self.csrf_token == other.csrf_token
            && self.session_id == other.session_id
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .field("csrf_token", &redacted(&self.csrf_token))
            .field("session_id", &self.session_id)
            .field("extracted_at", &self.extracted_at)
            .finish()
    }
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() { "<empty>" } else { "<redacted>" }
}

// ============================================================================
// Cookie Header Parsing
// ============================================================================

/// Parses a `Cookie` header (`"a=1; b=2"`) into a map.
///
/// Splits on `;`, then on the first `=`. Segments without `=` are skipped.
pub fn parse_cookie_header(header: &str) -> BTreeMap<String, String> {
    header
        .split(';')
        .filter_map(|part| {
            let (name, value) = part.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Keeps only the cookies in [`ESSENTIAL_COOKIES`].
pub fn filter_essential(cookies: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    cookies
        .iter()
        .filter(|(name, _)| ESSENTIAL_COOKIES.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

// ============================================================================
// Timestamp Serde
// ============================================================================

/// Unix seconds as a float, as written by the login tool.
mod unix_seconds {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_precision_loss)]
    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        let secs = value.timestamp() as f64 + f64::from(value.timestamp_subsec_micros()) / 1e6;
        serializer.serialize_f64(secs)
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let secs = Option::<f64>::deserialize(deserializer)?.unwrap_or_default();
        if !secs.is_finite() || secs < 0.0 {
            return Ok(DateTime::default());
        }
        let whole = secs.trunc() as i64;
        let nanos = ((secs - secs.trunc()) * 1e9) as u32;
        Ok(DateTime::from_timestamp(whole, nanos).unwrap_or_default())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn full_cookies() -> BTreeMap<String, String> {
        REQUIRED_COOKIES
            .iter()
            .map(|name| ((*name).to_string(), format!("{name}-value")))
            .collect()
    }

    #[test]
    fn test_parse_cookie_header() {
        let cookies = parse_cookie_header("SID=abc; HSID=def==; junk; =nope;  SSID = ghi ");

        assert_eq!(cookies.len(), 3);
        assert_eq!(cookies["SID"], "abc");
        // Only the first '=' splits
        assert_eq!(cookies["HSID"], "def==");
        assert_eq!(cookies["SSID"], "ghi");
    }

    #[test]
    fn test_cookie_header_rendering() {
        let mut cookies = BTreeMap::new();
        cookies.insert("SID".to_string(), "1".to_string());
        cookies.insert("APISID".to_string(), "2".to_string());
        let cred = Credential::from_cookies(cookies);

        assert_eq!(cred.cookie_header(), "APISID=2; SID=1");
    }

    #[test]
    fn test_filter_essential() {
        let parsed = parse_cookie_header("SID=1; NID=2; __Secure-1PSIDTS=3; _ga=4");
        let kept = filter_essential(&parsed);

        assert_eq!(kept.len(), 2);
        assert!(kept.contains_key("SID"));
        assert!(kept.contains_key("__Secure-1PSIDTS"));
    }

    #[test]
    fn test_missing_cookies() {
        let mut cookies = full_cookies();
        cookies.remove("HSID");
        cookies.insert("SSID".to_string(), String::new());
        let cred = Credential::from_cookies(cookies);

        assert_eq!(cred.missing_cookies(), vec!["HSID", "SSID"]);
    }

    #[test]
    fn test_with_tokens_keeps_cookies() {
        let cred = Credential::new(full_cookies(), "old-csrf", "old-sid");
        let refreshed = cred.with_tokens("new-csrf", "");

        assert_eq!(refreshed.cookies, cred.cookies);
        assert_eq!(refreshed.extracted_at, cred.extracted_at);
        assert_eq!(refreshed.csrf_token, "new-csrf");
        assert_eq!(refreshed.session_id, "old-sid");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let cred = Credential::new(full_cookies(), "super-secret", "sid");
        let debug = format!("{cred:?}");

        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("SID-value"));
    }
}
