//! Base64 helpers for attachment payloads

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Decode a base64 attachment payload.
pub fn from_base64(data: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(data)
        .map_err(|_| Error::bad_request("Attachment is not a valid base64 string"))
}

/// Encode attachment bytes as base64.
pub fn to_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}
