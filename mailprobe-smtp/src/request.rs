//! Turning a raw request body into a validated configuration.

use mailprobe_common::{SmtpConfig, ValidationError, validate};
use serde_json::Value;
use thiserror::Error;

/// Why a request body could not become a probe.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Not JSON at all. Reported like any other unexpected failure.
    #[error("Invalid request body: {0}")]
    Malformed(String),

    /// JSON, but the configuration breaks field constraints.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Parses and validates a JSON request body.
///
/// # Errors
///
/// Returns `Malformed` if the body is not JSON and `Invalid` if the
/// configuration does not validate.
pub fn parse_request(body: &[u8]) -> Result<SmtpConfig, RequestError> {
    let raw: Value =
        serde_json::from_slice(body).map_err(|e| RequestError::Malformed(e.to_string()))?;
    Ok(validate(&raw)?)
}
