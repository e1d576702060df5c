//! The closed set of options a probe session runs with.

use std::time::Duration;

use mailprobe_common::{Security, SmtpConfig};

use crate::client::{Credentials, Mailbox};

/// Name sent in EHLO/HELO when the caller does not choose one.
pub const DEFAULT_HELO_NAME: &str = "mailprobe.localhost";

/// How the transport gets encrypted, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// Plaintext for the whole session.
    None,
    /// Handshake before the greeting.
    Implicit,
    /// Upgrade after EHLO via the `STARTTLS` command.
    StartTls,
}

impl From<Security> for TlsMode {
    fn from(security: Security) -> Self {
        match security {
            Security::None => Self::None,
            Security::Tls | Security::Ssl => Self::Implicit,
            Security::Starttls => Self::StartTls,
        }
    }
}

/// Everything the session driver needs, derived from a validated config.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub host: String,
    pub port: u16,
    pub tls: TlsMode,
    pub accept_invalid_certs: bool,
    /// Ceiling reapplied to every blocking step.
    pub timeout: Duration,
    /// Present only when authentication was requested.
    pub credentials: Option<Credentials>,
    pub helo_name: String,
    pub from: Mailbox,
    pub to: Mailbox,
}

impl SessionOptions {
    #[must_use]
    pub fn from_config(config: &SmtpConfig, helo_name: &str) -> Self {
        let credentials = if config.require_auth {
            config
                .username
                .as_deref()
                .zip(config.password.as_deref())
                .map(|(username, password)| Credentials::new(username, password))
        } else {
            None
        };

        Self {
            host: config.host.clone(),
            port: config.port,
            tls: config.security.into(),
            accept_invalid_certs: !config.reject_unauthorized,
            timeout: config.timeout(),
            credentials,
            helo_name: helo_name.to_string(),
            from: Mailbox::new(config.from_name.as_deref(), config.from_email.as_str()),
            to: Mailbox::new(config.to_name.as_deref(), config.to_email.as_str()),
        }
    }
}
