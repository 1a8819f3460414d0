// Transfer codec: binary image bytes <-> the base64 text carried in JSON
// request and response bodies.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

/// Transport text that is not valid standard base64. Whitespace and line
/// breaks count as malformed.
#[derive(Debug, Error)]
#[error("malformed transfer encoding: {0}")]
pub struct DecodeError(#[from] base64::DecodeError);

/// Encode raw bytes as a single line of standard, padded base64.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Inverse of [`encode`]. Fails rather than returning a truncated payload.
pub fn decode(text: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(STANDARD.decode(text)?)
}
