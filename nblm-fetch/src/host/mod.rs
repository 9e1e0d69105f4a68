//! Host APIs used by the client and the recovery layers.
//!
//! - [`http`] - Transport trait and the reqwest implementation
//! - [`page`] - Token extraction from the landing page
//! - [`process`] - Subprocess execution for the login tool

pub mod http;
pub mod page;
pub mod process;

pub use http::{
    BROWSER_USER_AGENT, PageResponse, ReqwestTransport, StreamingResponse, Transport,
    TransportRequest, TransportResponse,
};
pub use page::{PageTokens, SIGN_IN_HOST, is_sign_in_redirect};
pub use process::{ProcessOutput, ProcessRunner};
