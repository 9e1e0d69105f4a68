//! RPC error types.

use nblm_core::RecoveryState;
use std::time::Duration;
use thiserror::Error;

/// Manual remediation shown whenever authentication cannot be recovered.
pub const REMEDIATION: &str = "Run `notebooklm-mcp-auth` to re-authenticate";

// ============================================================================
// Main RPC Error
// ============================================================================

/// Error type for RPC operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Call arguments cannot be encoded. Not retried.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Response envelope did not match the length-framed layout.
    #[error("Framing error: {0}")]
    Framing(String),

    /// A frame was not valid JSON.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Transport failed and retries were exhausted.
    #[error("Network error after {attempts} attempt(s): {message}")]
    TransientNetwork {
        /// Attempts made, including the first.
        attempts: u32,
        /// Last transport error.
        message: String,
    },

    /// The call timed out after the request may have been delivered.
    #[error(
        "{call} timed out after {timeout:?}; the operation may have succeeded. \
         Check the notebook before retrying"
    )]
    OutcomeUnknown {
        /// Call id or name.
        call: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// Authentication could not be recovered.
    #[error(
        "Authentication expired ({reason}); layers attempted: [{}]. {}",
        format_layers(.layers_attempted),
        REMEDIATION
    )]
    AuthenticationExpired {
        /// Recovery layers run for this call, in order.
        layers_attempted: Vec<RecoveryState>,
        /// What the server or the last layer reported.
        reason: String,
    },

    /// Rate limited or quota exhausted. Never retried automatically.
    #[error(
        "Rate limited{}; wait before retrying, the account quota may be exhausted",
        format_retry_after(.retry_after)
    )]
    RateLimited {
        /// Seconds to wait, when the server said.
        retry_after: Option<u64>,
        /// RPC status code when the limit came from an error marker.
        code: Option<i64>,
    },

    /// A destructive call was issued without confirmation.
    #[error("Irreversible action not confirmed: {0}")]
    IrreversibleActionNotConfirmed(String),

    /// Non-success HTTP status that is neither auth nor rate limit.
    #[error("HTTP status {status}")]
    Http {
        /// Status code.
        status: u16,
    },

    /// The server returned an error marker for a call.
    #[error("RPC {call} failed with code {code}")]
    Rpc {
        /// Call id.
        call: String,
        /// Status code from the error marker.
        code: i64,
    },

    /// No result item matched a requested call.
    #[error("No result for {call} (tag {tag})")]
    MissingResult {
        /// Call id.
        call: String,
        /// Correlation tag.
        tag: String,
    },

    /// The server answered with a sign-in page instead of RPC data.
    #[error("Received a sign-in page instead of RPC data")]
    SignInRequired,

    /// Transport failed in a way retrying cannot fix.
    #[error("Transport error: {0}")]
    Transport(TransportError),

    /// No credentials in the environment or the store.
    #[error("No credentials available. {}", REMEDIATION)]
    NoCredentials,

    /// Core error.
    #[error("Core error: {0}")]
    Core(#[from] nblm_core::CoreError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] nblm_store::StoreError),

    /// Process error.
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),
}

impl RpcError {
    /// Returns true for errors that feed the recovery state machine.
    ///
    /// `AuthenticationExpired` itself is terminal and not included.
    pub fn is_auth_class(&self) -> bool {
        matches!(self, RpcError::Rpc { code, .. } if *code == RPC_CODE_UNAUTHENTICATED)
            || matches!(self, RpcError::Http { status } if *status == 401 || *status == 403)
            || matches!(self, RpcError::SignInRequired)
    }

    /// Returns true for wire-shape errors worth one retry.
    pub fn is_retryable_once(&self) -> bool {
        matches!(self, RpcError::Framing(_) | RpcError::Parse(_))
    }

    /// Returns true for transport-level failures.
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::TransientNetwork { .. })
    }

    /// Layers attempted, for errors that carry them.
    pub fn layers_attempted(&self) -> &[RecoveryState] {
        match self {
            RpcError::AuthenticationExpired {
                layers_attempted, ..
            } => layers_attempted,
            _ => &[],
        }
    }
}

/// UNAUTHENTICATED status in an error marker.
pub const RPC_CODE_UNAUTHENTICATED: i64 = 16;

/// `RESOURCE_EXHAUSTED` status in an error marker.
pub const RPC_CODE_RESOURCE_EXHAUSTED: i64 = 8;

fn format_layers(layers: &[RecoveryState]) -> String {
    layers
        .iter()
        .map(|l| l.display_name())
        .collect::<Vec<_>>()
        .join(", ")
}

#[allow(clippy::ref_option)]
fn format_retry_after(retry_after: &Option<u64>) -> String {
    retry_after
        .map(|secs| format!(" (retry after {secs}s)"))
        .unwrap_or_default()
}

// ============================================================================
// Transport Error
// ============================================================================

/// Error type for the HTTP transport.
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    /// Connection could not be established. The request was not sent.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Timed out. The request may have been delivered.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Response body failed mid-read. The request was delivered.
    #[error("Response body error: {0}")]
    Body(String),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Domain not allowed.
    #[error("Domain not allowed: {0}")]
    DomainNotAllowed(String),

    /// Any other request failure.
    #[error("Request error: {0}")]
    Other(String),
}

impl TransportError {
    /// Returns true if the request certainly never reached the server.
    pub fn definitely_not_sent(&self) -> bool {
        matches!(
            self,
            TransportError::Connect(_)
                | TransportError::InvalidUrl(_)
                | TransportError::DomainNotAllowed(_)
        )
    }

    /// Returns true if retrying may help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Connect(_) | TransportError::Timeout(_) | TransportError::Body(_)
        )
    }

    /// Maps a reqwest error, keeping the sent/not-sent distinction.
    pub fn from_reqwest(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_timeout() {
            TransportError::Timeout(timeout)
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(err.to_string())
        } else if err.is_builder() {
            TransportError::InvalidUrl(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

// ============================================================================
// Layer Error
// ============================================================================

/// Why a recovery layer did not produce usable credentials.
#[derive(Debug, Error)]
pub enum LayerError {
    /// The layer ran but its result was unusable.
    #[error("{0}")]
    Rejected(String),

    /// Network failure while the layer ran.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Credential store failure.
    #[error("Store error: {0}")]
    Store(#[from] nblm_store::StoreError),

    /// The headless login collaborator failed.
    #[error("Login failed: {0}")]
    Login(String),
}

// ============================================================================
// Process Error
// ============================================================================

/// Error type for process operations.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Command not found.
    #[error("Command not found: {0}")]
    NotFound(String),

    /// Command timed out.
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    /// Non-zero exit code.
    #[error("Command exited with code {code}: {stderr}")]
    NonZeroExit {
        /// Exit code from the process.
        code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
