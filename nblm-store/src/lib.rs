// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # nblm Store
//!
//! Durable state for the nblm RPC client.
//!
//! This crate provides:
//!
//! - **CredentialStore**: Load/save/clear of the shared `auth.json`, with
//!   mtime-based detection of writes made by other processes
//! - **ClientSettings**: Endpoint, timeouts, and recovery knobs with
//!   environment overrides
//! - **Persistence**: Atomic JSON file helpers with owner-only permissions
//!
//! ## Usage
//!
//! ```ignore
//! use nblm_store::{ClientSettings, CredentialStore, FileCredentialStore};
//!
//! let settings = ClientSettings::load_default().await.apply_env();
//! let store = FileCredentialStore::new(settings.credential_path());
//!
//! let credential = store.load().await?;
//! if store.has_external_change().await {
//!     // another process rewrote the file since we last read it
//! }
//! ```

pub mod credential_store;
pub mod error;
pub mod persistence;
pub mod settings;

pub use credential_store::{CredentialStore, FileCredentialStore};
pub use error::StoreError;
pub use persistence::{
    default_credential_path, default_settings_path, default_store_dir, ensure_dir, file_modified,
    load_json, load_json_or_default, save_json, save_json_stamped,
};
pub use settings::{ClientSettings, TimeoutSettings};
