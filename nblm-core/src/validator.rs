//! Pure credential checks.

use chrono::{DateTime, Duration, Utc};

use crate::models::{Credential, REQUIRED_COOKIES};

/// Default cookie age after which a credential is considered stale.
pub const DEFAULT_MAX_COOKIE_AGE_HOURS: i64 = 168;

/// Structural and age checks for credentials. No I/O.
#[derive(Debug, Clone)]
pub struct CredentialValidator {
    required_cookies: &'static [&'static str],
    max_cookie_age: Duration,
}

impl CredentialValidator {
    /// Creates a validator with the default required set and a 168 hour age limit.
    pub fn new() -> Self {
        Self {
            required_cookies: REQUIRED_COOKIES,
            max_cookie_age: Duration::hours(DEFAULT_MAX_COOKIE_AGE_HOURS),
        }
    }

    /// Sets the cookie age limit.
    #[must_use]
    pub fn with_max_cookie_age(mut self, age: Duration) -> Self {
        self.max_cookie_age = age;
        self
    }

    /// All required cookies present and non-empty, CSRF token and session id non-empty.
    pub fn is_structurally_valid(&self, credential: &Credential) -> bool {
        self.has_required_cookies(credential)
            && !credential.csrf_token.is_empty()
            && !credential.session_id.is_empty()
    }

    /// All required cookies present and non-empty.
    pub fn has_required_cookies(&self, credential: &Credential) -> bool {
        self.required_cookies.iter().all(|name| {
            credential
                .cookies
                .get(*name)
                .is_some_and(|value| !value.is_empty())
        })
    }

    /// Cookie age heuristic only.
    ///
    /// CSRF token and session id have no age check: they are revalidated
    /// when a call is rejected.
    pub fn is_stale(&self, credential: &Credential, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(credential.extracted_at) > self.max_cookie_age
    }
}

impl Default for CredentialValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn usable() -> Credential {
        let cookies: BTreeMap<String, String> = REQUIRED_COOKIES
            .iter()
            .map(|name| ((*name).to_string(), "v".to_string()))
            .collect();
        Credential::new(cookies, "csrf", "sid")
    }

    #[test]
    fn test_usable_credential_is_valid() {
        assert!(CredentialValidator::new().is_structurally_valid(&usable()));
    }

    #[test]
    fn test_empty_csrf_is_invalid() {
        let mut cred = usable();
        cred.csrf_token.clear();

        let validator = CredentialValidator::new();
        assert!(validator.has_required_cookies(&cred));
        assert!(!validator.is_structurally_valid(&cred));
    }

    #[test]
    fn test_empty_session_is_invalid() {
        let mut cred = usable();
        cred.session_id.clear();

        assert!(!CredentialValidator::new().is_structurally_valid(&cred));
    }

    #[test]
    fn test_missing_cookie_is_invalid() {
        let mut cred = usable();
        cred.cookies.remove("SAPISID");

        assert!(!CredentialValidator::new().is_structurally_valid(&cred));
    }

    #[test]
    fn test_staleness() {
        let validator = CredentialValidator::new();
        let mut cred = usable();
        let now = Utc::now();

        cred.extracted_at = now - Duration::hours(167);
        assert!(!validator.is_stale(&cred, now));

        cred.extracted_at = now - Duration::hours(169);
        assert!(validator.is_stale(&cred, now));
    }

    #[test]
    fn test_custom_age_limit() {
        let validator = CredentialValidator::new().with_max_cookie_age(Duration::minutes(5));
        let mut cred = usable();
        let now = Utc::now();
        cred.extracted_at = now - Duration::minutes(6);

        assert!(validator.is_stale(&cred, now));
    }
}
