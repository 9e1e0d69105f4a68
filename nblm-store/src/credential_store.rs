//! Credential storage.
//!
//! The credential file is shared with the external login tool, which may
//! rewrite it at any time. The store remembers the mtime it last observed
//! (after its own loads and saves) so a newer file on disk is recognised as
//! an external write regardless of how fresh the in-memory copy looks.

use async_trait::async_trait;
use nblm_core::Credential;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::error::StoreError;
use crate::persistence::{default_credential_path, file_modified, load_json, save_json_stamped};

// ============================================================================
// Credential Store Trait
// ============================================================================

/// Durable credential persistence.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Reads the persisted credential.
    ///
    /// Returns [`StoreError::NotFound`] if nothing is persisted.
    async fn load(&self) -> Result<Credential, StoreError>;

    /// Persists the credential atomically.
    async fn save(&self, credential: &Credential) -> Result<(), StoreError>;

    /// Removes persisted state. Only for explicit logout.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Modification time of the persisted state, if any.
    async fn modified_at(&self) -> Result<Option<SystemTime>, StoreError>;

    /// Returns true if the persisted state changed since this store last
    /// loaded or saved it.
    async fn has_external_change(&self) -> bool;

    /// Location of the persisted state, when it is a file.
    fn location(&self) -> Option<&Path> {
        None
    }
}

// ============================================================================
// File Credential Store
// ============================================================================

/// Credential store backed by a JSON file (`~/.notebooklm-mcp/auth.json`).
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    /// Mtime observed after our last load or save.
    last_seen: Mutex<Option<SystemTime>>,
}

impl FileCredentialStore {
    /// Creates a store for the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_seen: Mutex::new(None),
        }
    }

    /// Creates a store for the default credential file.
    pub fn default_location() -> Self {
        Self::new(default_credential_path())
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn record_mtime(&self, mtime: Option<SystemTime>) {
        *self.last_seen.lock().await = mtime;
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> Result<Credential, StoreError> {
        // Stat before reading: a write landing in between shows up as a change.
        let seen = file_modified(&self.path).await.ok().flatten();
        let credential: Credential = match load_json(&self.path).await {
            Ok(credential) => credential,
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(self.path.clone()));
            }
            Err(e) => return Err(e),
        };

        self.record_mtime(seen).await;
        debug!(cookies = credential.cookies.len(), "Loaded credential");
        Ok(credential)
    }

    #[instrument(skip(self, credential), fields(path = %self.path.display()))]
    async fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        let written = save_json_stamped(&self.path, credential).await?;
        self.record_mtime(written).await;
        debug!("Saved credential");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn clear(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => info!("Cleared stored credential"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        *self.last_seen.lock().await = None;
        Ok(())
    }

    async fn modified_at(&self) -> Result<Option<SystemTime>, StoreError> {
        file_modified(&self.path).await
    }

    async fn has_external_change(&self) -> bool {
        let Ok(Some(current)) = file_modified(&self.path).await else {
            return false;
        };
        match *self.last_seen.lock().await {
            Some(seen) => current > seen,
            None => true,
        }
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::TempDir;

    fn credential(csrf: &str) -> Credential {
        let mut cookies = BTreeMap::new();
        cookies.insert("SID".to_string(), "sid-cookie".to_string());
        Credential::new(cookies, csrf, "session")
    }

    /// Writes the file as another process would and moves its mtime forward.
    fn external_write(path: &Path, credential: &Credential, ahead: Duration) {
        let json = serde_json::to_string(credential).unwrap();
        std::fs::write(path, json).unwrap();
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + ahead).unwrap();
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().join("auth.json"));

        let err = store.load().await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().join("auth.json"));

        store.save(&credential("csrf-1")).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded.csrf_token, "csrf-1");
        assert_eq!(loaded.cookies["SID"], "sid-cookie");
    }

    #[tokio::test]
    async fn test_own_save_is_not_external_change() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().join("auth.json"));

        store.save(&credential("csrf-1")).await.unwrap();

        assert!(!store.has_external_change().await);
    }

    #[tokio::test]
    async fn test_external_write_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.json");
        let store = FileCredentialStore::new(&path);

        store.save(&credential("csrf-1")).await.unwrap();
        external_write(&path, &credential("csrf-2"), Duration::from_secs(5));

        assert!(store.has_external_change().await);

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.csrf_token, "csrf-2");
        assert!(!store.has_external_change().await);
    }

    #[tokio::test]
    async fn test_write_after_own_save_is_external_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.json");
        let store = FileCredentialStore::new(&path);

        store.save(&credential("csrf-1")).await.unwrap();
        let own = *store.last_seen.lock().await;
        external_write(&path, &credential("relogged"), Duration::from_secs(5));

        assert!(own.is_some());
        assert!(store.modified_at().await.unwrap() > own);
        assert!(store.has_external_change().await);
    }

    #[tokio::test]
    async fn test_load_keeps_mtime_seen_before_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.json");
        external_write(&path, &credential("csrf-1"), Duration::ZERO);
        let before = file_modified(&path).await.unwrap();

        let store = FileCredentialStore::new(&path);
        store.load().await.unwrap();

        assert_eq!(*store.last_seen.lock().await, before);
        assert!(!store.has_external_change().await);
    }

    #[tokio::test]
    async fn test_unseen_file_counts_as_external() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.json");
        external_write(&path, &credential("csrf-1"), Duration::ZERO);

        let store = FileCredentialStore::new(&path);
        assert!(store.has_external_change().await);
    }

    #[tokio::test]
    async fn test_clear_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.json");
        let store = FileCredentialStore::new(&path);

        store.save(&credential("csrf-1")).await.unwrap();
        store.clear().await.unwrap();

        assert!(!path.exists());
        assert!(store.modified_at().await.unwrap().is_none());
        // Clearing twice is fine
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_file_is_serialization_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileCredentialStore::new(&path);
        assert!(matches!(
            store.load().await,
            Err(StoreError::Serialization(_))
        ));
    }
}
