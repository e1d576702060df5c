//! Probe configuration types.
//!
//! An [`SmtpConfig`] can only be obtained through [`crate::validate`] (or by
//! deserialising an already-validated record), so everything downstream of
//! the validator can rely on the field constraints holding.

use core::fmt::{self, Display};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lower bound for the per-operation timeout, in milliseconds.
pub const MIN_TIMEOUT_MS: u64 = 1_000;

/// Upper bound for the per-operation timeout, in milliseconds.
pub const MAX_TIMEOUT_MS: u64 = 60_000;

/// Timeout applied when the caller does not supply one, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Transport security requested for the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    /// Plaintext for the whole session. No implicit upgrade is ever attempted.
    #[default]
    None,

    /// Implicit TLS: the socket is encrypted before the greeting is read.
    Tls,

    /// Alias of [`Security::Tls`] kept because users know port 465 as "SSL".
    Ssl,

    /// Plaintext greeting and EHLO, then an explicit `STARTTLS` upgrade.
    Starttls,
}

impl Security {
    pub const ALL: [Self; 4] = [Self::None, Self::Tls, Self::Ssl, Self::Starttls];

    /// Returns `true` if the socket is encrypted before any SMTP dialogue.
    #[must_use]
    pub const fn is_implicit_tls(self) -> bool {
        matches!(self, Self::Tls | Self::Ssl)
    }

    /// Returns `true` if the session must end up encrypted.
    #[must_use]
    pub const fn is_encrypted(self) -> bool {
        !matches!(self, Self::None)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Tls => "tls",
            Self::Ssl => "ssl",
            Self::Starttls => "starttls",
        }
    }

    /// Parses the wire name of a security mode (case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|security| security.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated probe configuration.
///
/// The password is accepted on input but never serialised, so a config can be
/// echoed back in a [`crate::TestResult`] without leaking credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub security: Security,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    pub from_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_name: Option<String>,
    pub to_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_name: Option<String>,
    pub subject: String,
    pub message: String,
    #[serde(default)]
    pub is_html: bool,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub require_auth: bool,
    #[serde(default = "default_reject_unauthorized")]
    pub reject_unauthorized: bool,
}

const fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

const fn default_reject_unauthorized() -> bool {
    true
}

impl SmtpConfig {
    /// The per-operation timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// A copy of this config with the password removed.
    #[must_use]
    pub fn redacted(&self) -> Self {
        Self {
            password: None,
            ..self.clone()
        }
    }

    /// `host:port`, bracketing IPv6 literals.
    #[must_use]
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("from_email", &self.from_email)
            .field("from_name", &self.from_name)
            .field("to_email", &self.to_email)
            .field("to_name", &self.to_name)
            .field("subject", &self.subject)
            .field("is_html", &self.is_html)
            .field("timeout", &self.timeout)
            .field("require_auth", &self.require_auth)
            .field("reject_unauthorized", &self.reject_unauthorized)
            .finish_non_exhaustive()
    }
}
