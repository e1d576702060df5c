//! Typed errors for a probe run.
//!
//! Each network stage has its own variant so the final record says which
//! stage gave up. None of them are retried.

use core::fmt::{self, Display};

use mailprobe_common::ErrorInfo;
use thiserror::Error;

use crate::client::{ClientError, Response};

/// What went wrong in one stage, with the server's literal complaint when
/// there was one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub code: &'static str,
    pub message: String,
    /// The SMTP command that failed. Never carries AUTH payloads.
    pub command: Option<String>,
    /// Raw server reply.
    pub response: Option<String>,
}

impl Failure {
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            command: None,
            response: None,
        }
    }

    /// A transport-level failure, classified from the client error.
    #[must_use]
    pub fn transport(error: &ClientError) -> Self {
        Self::new(error.code(), error.to_string())
    }

    /// The server answered `command` with a refusal.
    #[must_use]
    pub fn rejected(code: &'static str, summary: &str, command: &str, response: &Response) -> Self {
        Self {
            code,
            message: format!("{summary}: {response}"),
            command: Some(command.to_string()),
            response: Some(response.to_string()),
        }
    }

    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    #[must_use]
    pub fn into_info(self) -> ErrorInfo {
        ErrorInfo {
            code: Some(self.code.to_string()),
            message: self.message,
            command: self.command,
            response: self.response,
        }
    }
}

impl Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Why a probe run ended in `error`.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// DNS, TCP, greeting, EHLO or TLS failure.
    #[error("Connection failed: {0}")]
    Connection(Failure),

    /// Credentials rejected, or no usable mechanism.
    #[error("Authentication failed: {0}")]
    Authentication(Failure),

    /// Envelope or DATA-phase rejection.
    #[error("Email sending failed: {0}")]
    Submission(Failure),

    /// Anything outside the modelled stages.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl ProbeError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(f) | Self::Authentication(f) | Self::Submission(f) => f.code,
            Self::Unexpected(_) => "EUNEXPECTED",
        }
    }

    #[must_use]
    pub const fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Connection(f) | Self::Authentication(f) | Self::Submission(f) => Some(f),
            Self::Unexpected(_) => None,
        }
    }

    #[must_use]
    pub fn into_info(self) -> ErrorInfo {
        match self {
            Self::Connection(f) | Self::Authentication(f) | Self::Submission(f) => f.into_info(),
            Self::Unexpected(message) => ErrorInfo {
                code: Some("EUNEXPECTED".to_string()),
                message,
                command: None,
                response: None,
            },
        }
    }
}
