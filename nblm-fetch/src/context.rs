//! Shared session state and the context handed to recovery layers.
//!
//! The session is the one mutable credential the client sends with every
//! call. Each replacement bumps a generation counter so a caller that
//! waited on recovery can tell whether someone else already refreshed it.

use nblm_core::Credential;
use nblm_store::{ClientSettings, CredentialStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::host::http::Transport;
use crate::recovery::interactive::HeadlessLogin;

/// File written next to the credential file when page dumps are enabled.
pub const DEBUG_PAGE_FILE: &str = "debug_page.html";

// ============================================================================
// Session
// ============================================================================

/// Where the live credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// The credential store.
    Store,
    /// Cookies supplied through configuration.
    Environment,
}

/// The credential and build label in use.
#[derive(Debug, Clone)]
pub struct Session {
    /// Current credential.
    pub credential: Credential,
    /// Build label sent as `bl`.
    pub build_label: String,
    /// Origin of the credential.
    pub source: CredentialSource,
}

/// Process-wide session with a generation counter.
#[derive(Debug, Default)]
pub struct SessionState {
    current: RwLock<Option<Session>>,
    generation: AtomicU64,
}

impl SessionState {
    /// Creates an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation. Starts at 0 and grows with every install.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// The session and the generation it belongs to.
    pub async fn snapshot(&self) -> Option<(u64, Session)> {
        let current = self.current.read().await;
        current
            .as_ref()
            .map(|session| (self.generation(), session.clone()))
    }

    /// Replaces the session and returns the new generation.
    pub async fn install(&self, session: Session) -> u64 {
        let mut current = self.current.write().await;
        *current = Some(session);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(generation, "Installed session");
        generation
    }

    /// Replaces the credential, keeping the source. A `build_label` of
    /// `None` keeps the current label.
    pub async fn replace_credential(
        &self,
        credential: Credential,
        build_label: Option<String>,
        source: Option<CredentialSource>,
        default_label: &str,
    ) -> u64 {
        let mut current = self.current.write().await;
        let previous = current.take();
        let session = Session {
            credential,
            build_label: build_label
                .or_else(|| previous.as_ref().map(|s| s.build_label.clone()))
                .unwrap_or_else(|| default_label.to_string()),
            source: source
                .or_else(|| previous.as_ref().map(|s| s.source))
                .unwrap_or(CredentialSource::Store),
        };
        *current = Some(session);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(generation, "Replaced credential");
        generation
    }
}

// ============================================================================
// Recovery Settings
// ============================================================================

/// Settings the recovery layers read.
#[derive(Debug, Clone)]
pub struct RecoverySettings {
    /// Service origin.
    pub base_url: String,
    /// Explicit build label. Page-derived labels never replace it.
    pub build_label_override: Option<String>,
    /// Label used when neither the override nor a page provides one.
    pub default_build_label: String,
    /// Timeout of the landing page fetch.
    pub page_fetch_timeout: Duration,
    /// Where to write the landing page when token extraction fails.
    pub debug_dump_path: Option<PathBuf>,
}

impl RecoverySettings {
    /// Derives recovery settings from client settings.
    pub fn from_client_settings(settings: &ClientSettings) -> Self {
        let debug_dump_path = if settings.debug_dump_html {
            warn!(
                "HTML debug dumping enabled - landing pages may be written to disk. \
                 Do not use in production."
            );
            settings
                .credential_path()
                .parent()
                .map(|dir| dir.join(DEBUG_PAGE_FILE))
        } else {
            None
        };

        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            build_label_override: settings.build_label.clone(),
            default_build_label: settings.build_label_or_default().to_string(),
            page_fetch_timeout: settings.timeouts.page_fetch(),
            debug_dump_path,
        }
    }

    /// Landing page URL.
    pub fn landing_url(&self) -> String {
        format!("{}/", self.base_url)
    }
}

// ============================================================================
// Recovery Context
// ============================================================================

/// Everything a recovery layer may touch.
#[derive(Clone)]
pub struct RecoveryContext {
    /// Network access.
    pub transport: Arc<dyn Transport>,
    /// Durable credential storage.
    pub store: Arc<dyn CredentialStore>,
    /// The live session.
    pub session: Arc<SessionState>,
    /// Headless login collaborator, when configured.
    pub login: Option<Arc<dyn HeadlessLogin>>,
    /// Layer settings.
    pub settings: RecoverySettings,
}

impl RecoveryContext {
    /// Creates a context without a login collaborator.
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        session: Arc<SessionState>,
        settings: RecoverySettings,
    ) -> Self {
        Self {
            transport,
            store,
            session,
            login: None,
            settings,
        }
    }

    /// Sets the login collaborator.
    #[must_use]
    pub fn with_login(mut self, login: Arc<dyn HeadlessLogin>) -> Self {
        self.login = Some(login);
        self
    }

    /// Installs a recovered credential as the live session.
    ///
    /// A page-derived build label is applied only when no override is set.
    pub async fn install_credential(
        &self,
        credential: Credential,
        page_build_label: Option<String>,
        source: Option<CredentialSource>,
    ) -> u64 {
        let build_label = match &self.settings.build_label_override {
            Some(label) => Some(label.clone()),
            None => page_build_label,
        };
        self.session
            .replace_credential(
                credential,
                build_label,
                source,
                &self.settings.default_build_label,
            )
            .await
    }
}

impl std::fmt::Debug for RecoveryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryContext")
            .field("settings", &self.settings)
            .field("has_login", &self.login.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn credential(csrf: &str) -> Credential {
        let mut cookies = BTreeMap::new();
        cookies.insert("SID".to_string(), "a".to_string());
        Credential::new(cookies, csrf, "sess")
    }

    #[tokio::test]
    async fn test_install_bumps_generation() {
        let state = SessionState::new();
        assert_eq!(state.generation(), 0);
        assert!(state.snapshot().await.is_none());

        let generation = state
            .install(Session {
                credential: credential("one"),
                build_label: "bl".to_string(),
                source: CredentialSource::Environment,
            })
            .await;
        assert_eq!(generation, 1);

        let (observed, session) = state.snapshot().await.unwrap();
        assert_eq!(observed, 1);
        assert_eq!(session.credential.csrf_token, "one");
    }

    #[tokio::test]
    async fn test_replace_keeps_label_and_source() {
        let state = SessionState::new();
        state
            .install(Session {
                credential: credential("one"),
                build_label: "bl-1".to_string(),
                source: CredentialSource::Environment,
            })
            .await;

        let generation = state
            .replace_credential(credential("two"), None, None, "default")
            .await;
        let (_, session) = state.snapshot().await.unwrap();

        assert_eq!(generation, 2);
        assert_eq!(session.credential.csrf_token, "two");
        assert_eq!(session.build_label, "bl-1");
        assert_eq!(session.source, CredentialSource::Environment);
    }

    #[test]
    fn test_recovery_settings_from_client_settings() {
        let mut settings = ClientSettings::default();
        settings.base_url = "https://notebooklm.google.com/".to_string();
        settings.credential_path = Some(PathBuf::from("/tmp/nblm/auth.json"));
        settings.debug_dump_html = true;

        let recovery = RecoverySettings::from_client_settings(&settings);

        assert_eq!(recovery.landing_url(), "https://notebooklm.google.com/");
        assert_eq!(
            recovery.debug_dump_path,
            Some(PathBuf::from("/tmp/nblm/debug_page.html"))
        );
        assert!(recovery.build_label_override.is_none());
    }
}
