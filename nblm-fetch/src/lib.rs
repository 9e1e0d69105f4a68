// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # nblm Fetch
//!
//! Wire codec, transport and credential recovery for the NotebookLM
//! batchexecute RPC protocol.
//!
//! ## Codec
//!
//! The [`codec`] module is pure and stateless:
//!
//! - [`codec::request`] - Batched and streaming request encoding
//! - [`codec::frames`] - Anti-XSSI prefix and `<length>\n<json>` framing
//! - [`codec::results`] - `wrb.fr` result items and batch correlation
//!
//! ## Host APIs
//!
//! - [`host::http`] - Transport trait and the reqwest implementation
//! - [`host::page`] - CSRF/session/build label extraction from the landing page
//! - [`host::process`] - Subprocess execution for the headless login tool
//!
//! ## Recovery
//!
//! Auth-class failures drive a layered state machine:
//!
//! - [`recovery::RecoveryLayer`] - Trait for recovery actions
//! - [`recovery::AuthRecoveryEngine`] - Single-flight escalation over the layers
//! - [`context::RecoveryContext`] - Session, store and transport shared by the layers
//!
//! ## Example
//!
//! ```ignore
//! use nblm_core::RpcValue;
//! use nblm_fetch::{CallOptions, RpcClient};
//! use nblm_store::ClientSettings;
//!
//! let settings = ClientSettings::load_default().await.apply_env();
//! let client = RpcClient::from_settings(settings)?;
//!
//! let response = client
//!     .call("wXbhsf", &[RpcValue::Null, 1.into(), RpcValue::Null, RpcValue::seq([2])], &CallOptions::new())
//!     .await?;
//! let notebooks = response.into_payload();
//! ```

// Core modules
pub mod client;
pub mod codec;
pub mod context;
pub mod error;
pub mod host;
pub mod recovery;
pub mod retry;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export key types at crate root

// Errors
pub use error::{LayerError, ProcessError, REMEDIATION, RpcError, TransportError};

// Codec
pub use codec::{
    BatchCall, CallKey, EncodedRequest, FrameDecoder, RequestContext, ResponseChunk, ResultItem,
    RpcResponse, decode_response, encode_batch, encode_batched, encode_streaming,
};

// Host APIs
pub use host::{
    PageResponse, PageTokens, ProcessOutput, ProcessRunner, ReqwestTransport, StreamingResponse,
    Transport, TransportRequest, TransportResponse,
};

// Recovery
pub use context::{CredentialSource, RecoveryContext, RecoverySettings, Session, SessionState};
pub use recovery::{
    AuthRecoveryEngine, CommandLogin, CsrfRefreshLayer, DiskReloadLayer, HeadlessLogin,
    InteractiveLoginLayer, LayerAttempt, LayerOutcome, RecoveryBudget, RecoveryLayer,
    RecoveryOutcome,
};

// Client
pub use client::{CallOptions, RpcClient};
pub use retry::RetryStrategy;
