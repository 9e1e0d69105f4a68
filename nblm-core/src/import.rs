//! Manual credential import.
//!
//! Builds a credential from values copied out of browser devtools: the
//! `Cookie` request header, and optionally a captured `batchexecute` request
//! body (for the `at=` CSRF field) and URL (for `f.sid=`).

use std::collections::BTreeMap;

use url::Url;

use crate::error::CoreError;
use crate::models::{Credential, filter_essential, parse_cookie_header};

/// Builder for a manually imported credential.
#[derive(Debug, Clone, Default)]
pub struct CredentialImport {
    cookies: BTreeMap<String, String>,
    csrf_token: Option<String>,
    session_id: Option<String>,
}

impl CredentialImport {
    /// Starts an import from a copied `Cookie` header.
    ///
    /// Only the essential Google account cookies are kept.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidCredential`] if no essential cookie survives the filter.
    pub fn from_cookie_header(header: &str) -> Result<Self, CoreError> {
        let cookies = filter_essential(&parse_cookie_header(header));
        if cookies.is_empty() {
            return Err(CoreError::InvalidCredential(
                "cookie header contains no Google account cookies".to_string(),
            ));
        }
        Ok(Self {
            cookies,
            ..Self::default()
        })
    }

    /// Sets the CSRF token directly.
    #[must_use]
    pub fn csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    /// Sets the session id directly.
    #[must_use]
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Takes the CSRF token from a captured form body (`...&at=<token>&...`).
    #[must_use]
    pub fn request_body(mut self, body: &str) -> Self {
        if let Some(token) = csrf_from_body(body) {
            self.csrf_token = Some(token);
        }
        self
    }

    /// Takes the session id from a captured request URL (`...?f.sid=<id>&...`).
    #[must_use]
    pub fn request_url(mut self, url: &str) -> Self {
        if let Some(sid) = session_from_url(url) {
            self.session_id = Some(sid);
        }
        self
    }

    /// Finishes the import.
    ///
    /// Missing tokens stay empty and are derived from the landing page on first use.
    pub fn build(self) -> Credential {
        Credential::new(
            self.cookies,
            self.csrf_token.unwrap_or_default(),
            self.session_id.unwrap_or_default(),
        )
    }
}

/// Extracts the percent-decoded `at` field of a form body.
pub fn csrf_from_body(body: &str) -> Option<String> {
    body.split('&').find_map(|pair| {
        let value = pair.strip_prefix("at=")?;
        let decoded = urlencoding::decode(value).ok()?;
        (!decoded.is_empty()).then(|| decoded.into_owned())
    })
}

/// Extracts the `f.sid` query parameter of a URL.
pub fn session_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == "f.sid")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}
