//! Error types for the SMTP client.

use std::{io, time::Duration};

use thiserror::Error;

/// Errors raised by the transport and wire layer of the SMTP client.
///
/// Server replies with 4xx/5xx codes are *not* errors at this level; they
/// come back as a [`super::Response`] for the session driver to judge.
#[derive(Error, Debug)]
pub enum ClientError {
    /// IO error occurred during network operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The host name could not be resolved.
    #[error("Could not resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    /// Resolution succeeded but produced no usable address.
    #[error("No addresses found for {0}")]
    NoAddresses(String),

    /// A blocking step did not finish within the configured timeout.
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Failed to parse an SMTP response from the server.
    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    /// TLS/SSL error occurred.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// The message could not be assembled.
    #[error("Invalid message: {0}")]
    BuilderError(String),

    /// The SASL exchange could not be continued.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Connection was closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    /// UTF-8 decoding error.
    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

impl ClientError {
    /// Short classifier taken from the lowest-level signal available.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(e) => match e.kind() {
                io::ErrorKind::ConnectionRefused => "ECONNREFUSED",
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => "ECONNRESET",
                io::ErrorKind::TimedOut => "ETIMEDOUT",
                _ => "ECONNECTION",
            },
            Self::Resolve { .. } | Self::NoAddresses(_) => "EDNS",
            Self::Timeout { .. } => "ETIMEDOUT",
            Self::TlsError(_) => "ETLS",
            Self::Auth(_) => "EAUTH",
            Self::BuilderError(_) => "EMESSAGE",
            Self::ParseError(_) | Self::Utf8Error(_) => "EPROTOCOL",
            Self::ConnectionClosed => "ECONNECTION",
        }
    }
}

/// Specialized `Result` type for SMTP client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
