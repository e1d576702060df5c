//! SASL mechanisms the probe can authenticate with.

use core::fmt::{self, Debug, Display, Formatter};

use base64::{Engine, engine::general_purpose::STANDARD};

use super::error::{ClientError, Result};

/// Preference order when the server offers several mechanisms.
///
/// LOGIN is tried last as it is deprecated.
pub const DEFAULT_MECHANISMS: &[Mechanism] = &[Mechanism::Plain, Mechanism::Login];

/// Username and password for one run.
///
/// `Debug` never prints either value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mechanism {
    /// RFC 4616
    Plain,
    /// Obsolete, but some providers (office365) still want it.
    Login,
}

impl Display for Mechanism {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Mechanism {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }

    /// Parses a mechanism name as it appears in an EHLO `AUTH` line.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("PLAIN") {
            Some(Self::Plain)
        } else if name.eq_ignore_ascii_case("LOGIN") {
            Some(Self::Login)
        } else {
            None
        }
    }

    /// Picks the first preferred mechanism the server offers.
    #[must_use]
    pub fn negotiate(offered: &[Self]) -> Option<Self> {
        DEFAULT_MECHANISMS
            .iter()
            .copied()
            .find(|mechanism| offered.contains(mechanism))
    }

    /// The initial `AUTH` command, including the initial response when the
    /// mechanism supports one.
    #[must_use]
    pub fn initial_command(self, credentials: &Credentials) -> String {
        match self {
            Self::Plain => format!(
                "AUTH PLAIN {}",
                STANDARD.encode(format!("\0{}\0{}", credentials.username, credentials.password))
            ),
            Self::Login => "AUTH LOGIN".to_string(),
        }
    }

    /// Answers a base64 server challenge with a base64 response.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Auth` if the challenge is unexpected for this
    /// mechanism or cannot be decoded.
    pub fn respond(self, credentials: &Credentials, challenge: &str) -> Result<String> {
        match self {
            // The initial response already carried everything.
            Self::Plain => {
                if challenge.trim().is_empty() {
                    Ok(String::new())
                } else {
                    Err(ClientError::Auth(
                        "PLAIN does not expect a challenge".to_string(),
                    ))
                }
            }
            Self::Login => {
                let decoded = STANDARD
                    .decode(challenge.trim())
                    .map_err(|e| ClientError::Auth(format!("Undecodable challenge: {e}")))?;
                let decoded = String::from_utf8_lossy(&decoded);
                let decoded = decoded.trim();

                if ["User Name", "Username:", "Username"].contains(&decoded) {
                    return Ok(STANDARD.encode(&credentials.username));
                }
                if ["Password", "Password:"].contains(&decoded) {
                    return Ok(STANDARD.encode(&credentials.password));
                }

                Err(ClientError::Auth(format!(
                    "Unrecognized challenge: '{decoded}'"
                )))
            }
        }
    }
}
