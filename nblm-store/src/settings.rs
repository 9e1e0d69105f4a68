//! Client settings.
//!
//! Settings are read from `settings.json` (all fields optional) and then
//! overlaid with `NOTEBOOKLM_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::persistence::{default_credential_path, default_settings_path, load_json, save_json};

// ============================================================================
// Constants
// ============================================================================

/// Default service origin.
pub const DEFAULT_BASE_URL: &str = "https://notebooklm.google.com";

/// Frontend build label sent as `bl` when none is known.
pub const DEFAULT_BUILD_LABEL: &str = "boq_labs-tailwind-frontend_20260108.06_p0";

/// Default external login command.
pub const DEFAULT_LOGIN_COMMAND: &str = "notebooklm-mcp-auth";

/// Environment variable names.
pub mod env {
    /// Full `Cookie` header to use instead of the store.
    pub const COOKIES: &str = "NOTEBOOKLM_COOKIES";
    /// CSRF token override.
    pub const CSRF_TOKEN: &str = "NOTEBOOKLM_CSRF_TOKEN";
    /// Session id override.
    pub const SESSION_ID: &str = "NOTEBOOKLM_SESSION_ID";
    /// Build label override.
    pub const BUILD_LABEL: &str = "NOTEBOOKLM_BL";
    /// Streaming query timeout in seconds.
    pub const QUERY_TIMEOUT: &str = "NOTEBOOKLM_QUERY_TIMEOUT";
}

// ============================================================================
// Timeouts
// ============================================================================

/// Per-class request timeouts, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Metadata calls.
    pub default_secs: u64,
    /// Source ingestion and generation calls.
    pub long_running_secs: u64,
    /// Streaming query.
    pub query_secs: u64,
    /// Landing page fetch during CSRF refresh.
    pub page_fetch_secs: u64,
    /// Headless login command.
    pub login_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            default_secs: 30,
            long_running_secs: 120,
            query_secs: 120,
            page_fetch_secs: 15,
            login_secs: 120,
        }
    }
}

impl TimeoutSettings {
    /// Metadata call timeout.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_secs)
    }

    /// Long-running call timeout.
    pub fn long_running(&self) -> Duration {
        Duration::from_secs(self.long_running_secs)
    }

    /// Streaming query timeout.
    pub fn query(&self) -> Duration {
        Duration::from_secs(self.query_secs)
    }

    /// Landing page fetch timeout.
    pub fn page_fetch(&self) -> Duration {
        Duration::from_secs(self.page_fetch_secs)
    }

    /// Headless login timeout.
    pub fn login(&self) -> Duration {
        Duration::from_secs(self.login_secs)
    }
}

// ============================================================================
// Client Settings
// ============================================================================

/// Settings consumed by the RPC client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Service origin.
    pub base_url: String,

    /// Explicit build label. When unset, the label scraped from the landing
    /// page is used, then [`DEFAULT_BUILD_LABEL`].
    pub build_label: Option<String>,

    /// `hl` language code.
    pub language: String,

    /// Cookie header supplied directly instead of via the store.
    #[serde(skip_serializing)]
    pub cookie_header: Option<String>,

    /// CSRF token override.
    #[serde(skip_serializing)]
    pub csrf_token: Option<String>,

    /// Session id override.
    #[serde(skip_serializing)]
    pub session_id: Option<String>,

    /// Credential file. `None` means `~/.notebooklm-mcp/auth.json`.
    pub credential_path: Option<PathBuf>,

    /// Request timeouts.
    pub timeouts: TimeoutSettings,

    /// Recovery layers a single call may consume.
    pub max_recovery_layers: usize,

    /// Attempts for transport-level failures (including the first).
    pub max_transient_attempts: u32,

    /// Base backoff delay for transport retries, in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Headless login command, program then arguments.
    pub login_command: Vec<String>,

    /// Write the landing page to disk when token extraction fails.
    pub debug_dump_html: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            build_label: None,
            language: "en".to_string(),
            cookie_header: None,
            csrf_token: None,
            session_id: None,
            credential_path: None,
            timeouts: TimeoutSettings::default(),
            max_recovery_layers: 3,
            max_transient_attempts: 3,
            retry_base_delay_ms: 500,
            login_command: vec![DEFAULT_LOGIN_COMMAND.to_string(), "--headless".to_string()],
            debug_dump_html: false,
        }
    }
}

impl ClientSettings {
    /// Loads settings from a file.
    pub async fn load_from(path: &Path) -> Result<Self, StoreError> {
        load_json(path).await
    }

    /// Loads settings from the default file, falling back to defaults.
    pub async fn load_default() -> Self {
        let path = default_settings_path();
        match Self::load_from(&path).await {
            Ok(settings) => settings,
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No settings file, using defaults");
                Self::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load settings, using defaults");
                Self::default()
            }
        }
    }

    /// Saves settings to a file. Credential overrides are never written.
    pub async fn save_to(&self, path: &Path) -> Result<(), StoreError> {
        save_json(path, self).await
    }

    /// Overlays process environment variables.
    #[must_use]
    pub fn apply_env(self) -> Self {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlays variables from a lookup function.
    #[must_use]
    pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(cookies) = non_empty(env::COOKIES) {
            debug!("Using cookies from environment");
            self.cookie_header = Some(cookies);
        }
        if let Some(csrf) = non_empty(env::CSRF_TOKEN) {
            self.csrf_token = Some(csrf);
        }
        if let Some(sid) = non_empty(env::SESSION_ID) {
            self.session_id = Some(sid);
        }
        if let Some(label) = non_empty(env::BUILD_LABEL) {
            self.build_label = Some(label);
        }
        if let Some(raw) = non_empty(env::QUERY_TIMEOUT) {
            match parse_seconds(&raw) {
                Some(secs) => self.timeouts.query_secs = secs,
                None => warn!(value = %raw, "Ignoring invalid {}", env::QUERY_TIMEOUT),
            }
        }
        self
    }

    /// Effective credential file path.
    pub fn credential_path(&self) -> PathBuf {
        self.credential_path
            .clone()
            .unwrap_or_else(default_credential_path)
    }

    /// Explicit build label, or the default when none is configured.
    pub fn build_label_or_default(&self) -> &str {
        self.build_label.as_deref().unwrap_or(DEFAULT_BUILD_LABEL)
    }

    /// Backoff base delay.
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Validates values that would make the client unusable.
    pub fn validate(&self) -> Result<(), StoreError> {
        if !self.base_url.starts_with("https://") && !self.base_url.starts_with("http://") {
            return Err(StoreError::Config(format!(
                "base_url must be an http(s) URL: {}",
                self.base_url
            )));
        }
        if self.max_transient_attempts == 0 {
            return Err(StoreError::Config(
                "max_transient_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parses whole or fractional seconds, rounding up.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_seconds(raw: &str) -> Option<u64> {
    let secs: f64 = raw.trim().parse().ok()?;
    (secs.is_finite() && secs > 0.0).then(|| secs.ceil() as u64)
}

// ============================================================================
// Tests
// ============================================================================
