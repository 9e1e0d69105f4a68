//! Wire codec for the batchexecute protocol.
//!
//! Pure and stateless:
//!
//! - [`request`] - Form bodies and URLs for the batched and streaming transports
//! - [`frames`] - Anti-XSSI prefix stripping and `<length>\n<json>` framing
//! - [`results`] - `wrb.fr` result items, error markers, and batch correlation

pub mod frames;
pub mod request;
pub mod results;

pub use frames::{ANTI_XSSI_PREFIX, FrameDecoder, decode_response, looks_like_login_page};
pub use request::{
    BATCH_EXECUTE_PATH, BatchCall, CallKey, EncodedRequest, GENERIC_TAG, RequestContext,
    STREAM_QUERY_PATH, encode_batch, encode_batched, encode_streaming,
};
pub use results::{ResponseChunk, ResultItem, RpcResponse, correlate, result_items};

#[cfg(test)]
mod codec_tests;
