//! File persistence helpers.
//!
//! Credential files hold live session cookies, so every write is atomic
//! (temp file + rename) and owner-only.

use serde::{Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::{debug, warn};

use crate::error::StoreError;

/// Directory name under the home directory, shared with the login tool.
const STORE_DIR_NAME: &str = ".notebooklm-mcp";

/// Distinguishes temp files of concurrent writers within one process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

// ============================================================================
// Default Paths
// ============================================================================

/// Returns the default store directory (`~/.notebooklm-mcp`).
pub fn default_store_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(STORE_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(STORE_DIR_NAME))
}

/// Returns the default credential file path.
pub fn default_credential_path() -> PathBuf {
    default_store_dir().join("auth.json")
}

/// Returns the default settings file path.
pub fn default_settings_path() -> PathBuf {
    default_store_dir().join("settings.json")
}

// ============================================================================
// Security: File Permissions
// ============================================================================

/// Sets restrictive file permissions (0o600) on Unix systems.
#[cfg(unix)]
async fn set_restrictive_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = tokio::fs::metadata(path).await?;
    let mut perms = metadata.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;

    debug!(path = %path.display(), mode = "0600", "Set restrictive permissions");
    Ok(())
}

/// Sets restrictive directory permissions (0o700) on Unix systems.
#[cfg(unix)]
async fn set_restrictive_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = tokio::fs::metadata(path).await?;
    let mut perms = metadata.permissions();
    perms.set_mode(0o700);
    tokio::fs::set_permissions(path, perms).await?;

    debug!(path = %path.display(), mode = "0700", "Set restrictive directory permissions");
    Ok(())
}

/// No-op for non-Unix systems.
#[cfg(not(unix))]
async fn set_restrictive_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

/// No-op for non-Unix systems.
#[cfg(not(unix))]
async fn set_restrictive_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ============================================================================
// File Operations
// ============================================================================

/// Creates the parent directory if missing, owner-only.
///
/// Only the directory created here is restricted; pre-existing ancestors
/// keep their permissions.
async fn create_secure_parent_dir(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            debug!(path = %parent.display(), "Creating secure directory");
            tokio::fs::create_dir_all(parent).await?;
            set_restrictive_dir_permissions(parent).await?;
        }
    }
    Ok(())
}

/// Returns a sibling temp path unique to this process and write.
fn temp_path_for(path: &Path) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_extension(format!("json.{}.{n}.tmp", std::process::id()))
}

/// Saves data to a JSON file with secure permissions.
///
/// Creates the parent directory if needed, writes to a temp file, restricts
/// it, then renames over the target. A crash mid-write leaves the previous
/// file intact.
pub async fn save_json<T: Serialize>(path: &Path, data: &T) -> Result<(), StoreError> {
    save_json_stamped(path, data).await.map(|_| ())
}

/// Like [`save_json`], returning the modification time of the written file.
///
/// The time is read from the temp file before the rename, so a write by
/// another process that lands right after the rename is never mistaken for
/// this one.
pub async fn save_json_stamped<T: Serialize>(
    path: &Path,
    data: &T,
) -> Result<Option<SystemTime>, StoreError> {
    debug!(path = %path.display(), "Saving JSON file");

    create_secure_parent_dir(path).await?;

    let json = serde_json::to_string_pretty(data)?;

    let temp_path = temp_path_for(path);
    tokio::fs::write(&temp_path, &json).await?;
    if let Err(e) = set_restrictive_permissions(&temp_path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }
    let written = match file_modified(&temp_path).await {
        Ok(mtime) => mtime,
        Err(e) => {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }
    };
    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e.into());
    }

    debug!(path = %path.display(), "JSON file saved securely");
    Ok(written)
}

/// Loads data from a JSON file.
pub async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    debug!(path = %path.display(), "Loading JSON file");

    let content = tokio::fs::read_to_string(path).await?;
    let data = serde_json::from_str(&content)?;

    debug!(path = %path.display(), "JSON file loaded");
    Ok(data)
}

/// Loads data from a JSON file, returning default if not found.
pub async fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match load_json(path).await {
        Ok(data) => data,
        Err(e) => {
            if !matches!(e, StoreError::Io(_)) {
                warn!(path = %path.display(), error = %e, "Failed to load, using defaults");
            }
            T::default()
        }
    }
}

/// Ensures a directory exists with secure permissions.
pub async fn ensure_dir(path: &Path) -> Result<(), StoreError> {
    if !path.exists() {
        debug!(path = %path.display(), "Creating directory");
        tokio::fs::create_dir_all(path).await?;
        set_restrictive_dir_permissions(path).await?;
    }
    Ok(())
}

/// Returns the file's modification time, or `None` if it does not exist.
pub async fn file_modified(path: &Path) -> Result<Option<SystemTime>, StoreError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(Some(metadata.modified()?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_store_dir() {
        let path = default_store_dir();
        assert!(path.ends_with(".notebooklm-mcp"));
    }

    #[test]
    fn test_default_credential_path() {
        assert!(default_credential_path().ends_with("auth.json"));
        assert!(default_settings_path().ends_with("settings.json"));
    }

    #[test]
    fn test_temp_paths_are_unique() {
        let path = Path::new("/tmp/auth.json");
        assert_ne!(temp_path_for(path), temp_path_for(path));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("auth.json");

        save_json(&test_file, &serde_json::json!({"cookies": {}}))
            .await
            .unwrap();

        let metadata = tokio::fs::metadata(&test_file).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "File should have 0600 permissions");
    }

    #[tokio::test]
    async fn test_file_modified_missing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("nope.json");

        assert!(file_modified(&missing).await.unwrap().is_none());
    }
}
