//! Web error types

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use mailprobe_smtp::{RequestError, unexpected_result};
use serde_json::json;
use thiserror::Error;

/// Errors that can occur while running the web server
#[derive(Debug, Error)]
pub enum WebError {
    /// Failed to bind to the specified address
    #[error("Failed to bind web server to {address}: {source}")]
    BindError {
        address: String,
        source: std::io::Error,
    },

    /// Web server encountered a runtime error
    #[error("Web server error: {0}")]
    ServerError(String),
}

/// A request body that never got as far as a probe.
///
/// Both shapes answer `400`. A body that is not JSON still carries a
/// well-formed `error` result; a config that breaks field constraints
/// carries only the message and the violations.
#[derive(Debug)]
pub struct Rejection(pub RequestError);

impl From<RequestError> for Rejection {
    fn from(error: RequestError) -> Self {
        Self(error)
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        let body = match self.0 {
            RequestError::Malformed(_) => json!({
                "success": false,
                "result": unexpected_result(&message),
                "error": message,
            }),
            RequestError::Invalid(error) => json!({
                "success": false,
                "error": message,
                "violations": error.violations,
            }),
        };

        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}
