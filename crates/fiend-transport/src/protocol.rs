//! Wire encoding shared by the transports.

use fiend_core::{CommandRequest, CommandResponse};
use serde::{Deserialize, Serialize};

/// Largest accepted local-stream request payload.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// HTTP error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
}

impl ErrorBody {
    /// Create an error body.
    #[must_use]
    pub fn new<S: Into<String>>(status_code: u16, error: S) -> Self {
        Self {
            error: error.into(),
            status_code,
        }
    }
}

/// Decode a request payload.
///
/// Returns `Ok(None)` for an empty or whitespace-only payload.
///
/// # Errors
/// Returns error if the payload is not a valid request.
pub fn decode_request(payload: &[u8]) -> Result<Option<CommandRequest>, serde_json::Error> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(payload).map(Some)
}

/// Compact JSON encoding used on the local stream.
///
/// # Errors
/// Returns error if serialization fails.
pub fn encode_response(response: &CommandResponse) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(response)
}

/// Indented JSON encoding used over HTTP.
///
/// # Errors
/// Returns error if serialization fails.
pub fn encode_response_pretty(response: &CommandResponse) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec_pretty(response)
}
