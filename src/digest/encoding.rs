//! Transport Base64
//!
//! Identifiers and containers cross the wire as base64 text. The transport
//! form uses the URL-safe alphabet and `.` as the padding character so it can
//! be embedded in paths and query strings without escaping. The standard
//! alphabet is kept for display and for interoperating with peers that send it.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;

use crate::error::Result;

/// Padding character of the transport alphabet
pub const TRANSPORT_PAD: char = '.';

/// Encode bytes with the transport alphabet
pub fn encode(bytes: &[u8]) -> String {
    URL_SAFE.encode(bytes).replace('=', ".")
}

/// Decode text produced by [`encode`]
pub fn decode(text: &str) -> Result<Vec<u8>> {
    let restored = text.trim().replace(TRANSPORT_PAD, "=");
    Ok(URL_SAFE.decode(restored.as_bytes())?)
}

/// Encode bytes with the standard alphabet
pub fn encode_standard(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard-alphabet text
pub fn decode_standard(text: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(text.trim().as_bytes())?)
}

/// Decode text in either alphabet
///
/// Text containing any of `-`, `_` or `.` is treated as transport form.
pub fn decode_any(text: &str) -> Result<Vec<u8>> {
    if text.contains(['-', '_', TRANSPORT_PAD]) {
        decode(text)
    } else {
        decode_standard(text)
    }
}

// =============================================================================
// Tests
// =============================================================================
