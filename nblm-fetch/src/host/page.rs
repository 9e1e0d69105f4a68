//! Token extraction from the service landing page.
//!
//! The landing page embeds a `WIZ_global_data` object carrying the CSRF
//! token (`SNlM0e`), the session id (`FdrFJe`) and the frontend build label
//! (`cfb2h`).

use regex::Regex;
use std::sync::LazyLock;

/// Host of the Google sign-in flow.
pub const SIGN_IN_HOST: &str = "accounts.google.com";

/// `"SNlM0e":"<csrf>"`
static CSRF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""SNlM0e"\s*:\s*"([^"]+)""#).expect("Invalid regex"));

/// `"FdrFJe":"<session id>"`
static SESSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""FdrFJe"\s*:\s*"([^"]+)""#).expect("Invalid regex"));

/// `"cfb2h":"<build label>"`
static BUILD_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""cfb2h"\s*:\s*"([^"]+)""#).expect("Invalid regex"));

/// Tokens embedded in the landing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTokens {
    /// CSRF token sent as `at`.
    pub csrf_token: String,
    /// Session id sent as `f.sid`, when the page carries one.
    pub session_id: Option<String>,
    /// Frontend build label sent as `bl`, when the page carries one.
    pub build_label: Option<String>,
}

impl PageTokens {
    /// Extracts tokens, or `None` if the page has no CSRF token.
    pub fn extract(html: &str) -> Option<Self> {
        let csrf_token = capture(&CSRF_RE, html)?;
        Some(Self {
            csrf_token,
            session_id: capture(&SESSION_RE, html),
            build_label: capture(&BUILD_LABEL_RE, html),
        })
    }
}

fn capture(re: &Regex, html: &str) -> Option<String> {
    re.captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.is_empty())
}

/// Returns true if a page fetch ended on the sign-in flow.
pub fn is_sign_in_redirect(final_url: &str) -> bool {
    url::Url::parse(final_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h == SIGN_IN_HOST))
        .unwrap_or_else(|| final_url.contains(SIGN_IN_HOST))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<script>window.WIZ_global_data = {"FdrFJe":"-7361390473216837432","SNlM0e":"AF1_QpN-xyz:1736000000000","cfb2h":"boq_labs-tailwind-frontend_20260108.06_p0","qwAQke":"LabsTailwindUi"};</script>"#;

    #[test]
    fn test_extract_all_tokens() {
        let tokens = PageTokens::extract(PAGE).unwrap();
        assert_eq!(tokens.csrf_token, "AF1_QpN-xyz:1736000000000");
        assert_eq!(tokens.session_id.as_deref(), Some("-7361390473216837432"));
        assert_eq!(
            tokens.build_label.as_deref(),
            Some("boq_labs-tailwind-frontend_20260108.06_p0")
        );
    }

    #[test]
    fn test_extract_without_csrf() {
        assert!(PageTokens::extract(r#"{"FdrFJe":"123"}"#).is_none());
        assert!(PageTokens::extract(r#"{"SNlM0e":""}"#).is_none());
    }

    #[test]
    fn test_extract_csrf_only() {
        let tokens = PageTokens::extract(r#"{"SNlM0e": "tok"}"#).unwrap();
        assert_eq!(tokens.csrf_token, "tok");
        assert_eq!(tokens.session_id, None);
        assert_eq!(tokens.build_label, None);
    }

    #[test]
    fn test_sign_in_redirect() {
        assert!(is_sign_in_redirect(
            "https://accounts.google.com/v3/signin/identifier?continue=https%3A%2F%2Fnotebooklm.google.com%2F"
        ));
        assert!(!is_sign_in_redirect("https://notebooklm.google.com/"));
        assert!(!is_sign_in_redirect(
            "https://notebooklm.google.com/?next=accounts.google.com"
        ));
    }
}
