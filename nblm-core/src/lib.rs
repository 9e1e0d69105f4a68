// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `nblm` Core
//!
//! Core types shared by every `nblm` crate.
//!
//! This crate has no I/O. It provides:
//!
//! - Credential model (cookie map, CSRF token, session id, extraction time)
//! - Cookie header parsing and manual import helpers
//! - The positional argument value type used on the wire
//! - The recovery state enum driven by the client
//! - Pure credential validation
//!
//! ## Key Types
//!
//! - [`Credential`] - Cookies plus the short-lived CSRF/session values
//! - [`CredentialImport`] - Builds a credential from copied browser data
//! - [`CredentialValidator`] - Structural and age checks
//! - [`RpcValue`] - Null | Bool | Number | String | Sequence | Mapping
//! - [`RecoveryState`] - Where the recovery state machine currently stands

pub mod error;
pub mod import;
pub mod models;
pub mod validator;

// Re-export error types
pub use error::CoreError;

// Re-export model types
pub use import::CredentialImport;
pub use models::{
    // Credentials
    Credential,
    ESSENTIAL_COOKIES,
    REQUIRED_COOKIES,
    filter_essential,
    parse_cookie_header,
    // Values
    RpcNumber,
    RpcValue,
    // Recovery
    RecoveryState,
};
pub use validator::CredentialValidator;
