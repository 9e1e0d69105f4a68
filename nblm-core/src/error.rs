//! Core error types for `nblm`.

use thiserror::Error;

/// Core error type for `nblm` operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Call arguments cannot be represented on the wire.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Credential data is unusable.
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// Invalid data from a response or import.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
