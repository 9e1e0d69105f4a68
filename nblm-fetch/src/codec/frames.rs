//! Response framing.
//!
//! A response body is `)]}'`, optional whitespace, then repeated
//! `<decimal length>\n<json>` frames. The JSON may itself contain newlines,
//! so frames are cut by length, never by line.
//!
//! The same decoder serves complete bodies and streamed bodies: bytes are
//! pushed as they arrive and complete frames come out in order.

use bytes::{Buf, BytesMut};
use serde_json::Value;
use tracing::debug;

use crate::error::RpcError;

/// Anti-XSSI prefix on every response body.
pub const ANTI_XSSI_PREFIX: &[u8] = b")]}'";

/// Largest shortfall tolerated when the final frame declares more bytes
/// than the body holds. The remaining bytes must still be one complete JSON
/// value.
pub const FRAME_LENGTH_SLACK: usize = 8;

/// Bytes of a body inspected when sniffing for an HTML login page.
const SNIFF_LEN: usize = 4096;

// ============================================================================
// Frame Decoder
// ============================================================================

/// Incremental decoder for length-framed response bodies.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    prefix_done: bool,
    frames: usize,
}

impl FrameDecoder {
    /// Creates a decoder expecting the anti-XSSI prefix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes and returns every frame they complete.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Value>, RpcError> {
        self.buf.extend_from_slice(data);
        self.drain(false)
    }

    /// Signals end of body and returns the remaining frames.
    ///
    /// Fails if the body ends inside a frame.
    pub fn finish(&mut self) -> Result<Vec<Value>, RpcError> {
        self.drain(true)
    }

    /// Number of frames decoded so far.
    pub fn frames_decoded(&self) -> usize {
        self.frames
    }

    fn drain(&mut self, eof: bool) -> Result<Vec<Value>, RpcError> {
        let mut out = Vec::new();
        while let Some(frame) = self.next_frame(eof)? {
            self.frames += 1;
            out.push(frame);
        }
        Ok(out)
    }

    fn next_frame(&mut self, eof: bool) -> Result<Option<Value>, RpcError> {
        if !self.prefix_done && !self.strip_prefix(eof)? {
            return Ok(None);
        }

        let ws = self.buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
        self.buf.advance(ws);
        if self.buf.is_empty() {
            return Ok(None);
        }

        let Some(newline) = self.buf.iter().position(|b| *b == b'\n') else {
            if eof || !is_partial_length_line(&self.buf) {
                return Err(RpcError::Framing(format!(
                    "expected frame length, found {:?}",
                    preview(&self.buf)
                )));
            }
            return Ok(None);
        };

        let line = std::str::from_utf8(&self.buf[..newline])
            .map(str::trim)
            .unwrap_or_default();
        let declared: usize = line.parse().map_err(|_| {
            RpcError::Framing(format!("invalid frame length {:?}", preview(&self.buf[..newline])))
        })?;

        let start = newline + 1;
        let available = self.buf.len() - start;

        if declared <= available {
            let chunk = self.buf[start..start + declared].trim_ascii();
            match serde_json::from_slice::<Value>(chunk) {
                Ok(value) => {
                    self.buf.advance(start + declared);
                    Ok(Some(value))
                }
                Err(err) => self.resync(start, declared, eof, &err),
            }
        } else if !eof {
            Ok(None)
        } else {
            self.short_final_frame(start, declared, available)
        }
    }

    /// Consumes the prefix. Returns false while more bytes are needed.
    fn strip_prefix(&mut self, eof: bool) -> Result<bool, RpcError> {
        if self.buf.len() < ANTI_XSSI_PREFIX.len() {
            if eof {
                return Err(RpcError::Framing(if self.buf.is_empty() {
                    "empty response body".to_string()
                } else {
                    format!("missing anti-XSSI prefix, found {:?}", preview(&self.buf))
                }));
            }
            if !ANTI_XSSI_PREFIX.starts_with(&self.buf) {
                return Err(RpcError::Framing(format!(
                    "missing anti-XSSI prefix, found {:?}",
                    preview(&self.buf)
                )));
            }
            return Ok(false);
        }
        if !self.buf.starts_with(ANTI_XSSI_PREFIX) {
            return Err(RpcError::Framing(format!(
                "missing anti-XSSI prefix, found {:?}",
                preview(&self.buf)
            )));
        }
        self.buf.advance(ANTI_XSSI_PREFIX.len());
        self.prefix_done = true;
        Ok(true)
    }

    /// The declared length did not cut a valid JSON value. Read exactly one
    /// value from the frame start instead, and accept it only if what follows
    /// is the end of the body or another length line.
    fn resync(
        &mut self,
        start: usize,
        declared: usize,
        eof: bool,
        original: &serde_json::Error,
    ) -> Result<Option<Value>, RpcError> {
        let (value, consumed) = {
            let payload = &self.buf[start..];
            let mut values = serde_json::Deserializer::from_slice(payload).into_iter::<Value>();
            match values.next() {
                Some(Ok(value)) => {
                    let consumed = values.byte_offset();
                    let rest = payload[consumed..].trim_ascii();
                    if !rest.is_empty() && !rest[0].is_ascii_digit() {
                        return Err(RpcError::Parse(original.to_string()));
                    }
                    (value, consumed)
                }
                Some(Err(err)) if err.is_eof() && !eof => return Ok(None),
                _ => return Err(RpcError::Parse(original.to_string())),
            }
        };
        debug!(declared, actual = consumed, "Frame length mismatch, resynchronized");
        self.buf.advance(start + consumed);
        Ok(Some(value))
    }

    /// The body ended before the declared length.
    fn short_final_frame(
        &mut self,
        start: usize,
        declared: usize,
        available: usize,
    ) -> Result<Option<Value>, RpcError> {
        let shortfall = declared - available;
        let rest = self.buf[start..].trim_ascii();
        if shortfall <= FRAME_LENGTH_SLACK {
            if let Ok(value) = serde_json::from_slice::<Value>(rest) {
                debug!(declared, available, "Final frame shorter than declared");
                self.buf.clear();
                return Ok(Some(value));
            }
        }
        Err(RpcError::Framing(format!(
            "frame declares {declared} bytes but only {available} remain"
        )))
    }
}

// ============================================================================
// Whole-Body Helpers
// ============================================================================

/// Decodes a complete response body into its frames.
///
/// Pure: the same bytes always decode to the same frames.
pub fn decode_response(raw: &[u8]) -> Result<Vec<Value>, RpcError> {
    let mut decoder = FrameDecoder::new();
    let mut frames = decoder.push(raw)?;
    frames.extend(decoder.finish()?);
    Ok(frames)
}

/// Returns true if the body is an HTML page or a Google sign-in redirect
/// rather than a framed payload.
pub fn looks_like_login_page(raw: &[u8]) -> bool {
    let head = &raw[..raw.len().min(SNIFF_LEN)];
    let text = String::from_utf8_lossy(head).to_ascii_lowercase();
    let trimmed = text.trim_start();
    trimmed.starts_with('<')
        || text.contains("accounts.google.com/servicelogin")
        || text.contains("accounts.google.com/signin")
        || text.contains("accounts.google.com/v3/signin")
}

/// Digits, possibly followed by the `\r` or blanks of a line whose newline
/// has not arrived yet.
fn is_partial_length_line(bytes: &[u8]) -> bool {
    let digits = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
    digits > 0
        && bytes[digits..]
            .iter()
            .all(|b| matches!(b, b'\r' | b' ' | b'\t'))
}

fn preview(bytes: &[u8]) -> String {
    String::from_utf8_lossy(&bytes[..bytes.len().min(40)]).into_owned()
}

// ============================================================================
// Tests
// ============================================================================
