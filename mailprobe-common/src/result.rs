//! The test-result record and its parts.

use core::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    config::{Security, SmtpConfig},
    log::LogEntry,
};

/// Progress of a probe run.
///
/// `Idle` is the caller's pre-test default; the driver starts at `Connecting`
/// and finishes at one of the two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    #[default]
    Idle,
    Connecting,
    Authenticating,
    Sending,
    Success,
    Error,
}

impl TestStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Sending => "sending",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the server told us about itself after the greeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
    /// Hostname the server announced in its EHLO reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetails {
    pub host: String,
    pub port: u16,
    pub security: Security,
    pub connected: bool,
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
}

impl ConnectionDetails {
    /// Initial, not-yet-connected details for `config`.
    #[must_use]
    pub fn for_config(config: &SmtpConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            security: config.security,
            connected: false,
            authenticated: false,
            connection_time: None,
            auth_time: None,
            server_info: None,
        }
    }

    /// Placeholder used when a run failed before any config was known.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            host: String::new(),
            port: 0,
            security: Security::None,
            connected: false,
            authenticated: false,
            connection_time: None,
            auth_time: None,
            server_info: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub from: String,
    pub to: String,
    pub subject: String,
    /// UTF-8 byte length of the message body.
    pub size: usize,
    pub sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_time: Option<u64>,
    /// Raw final server reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

/// Enough context to reproduce the server's literal complaint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

/// The terminal record of a probe run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub status: TestStatus,
    pub success: bool,
    /// Wall-clock milliseconds from start to finalize.
    pub total_duration: u64,
    /// The config the run used, password removed. Absent when the run failed
    /// before a config could be established.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<SmtpConfig>,
    pub connection: ConnectionDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailDetails>,
    pub logs: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}
