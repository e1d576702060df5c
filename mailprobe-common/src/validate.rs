//! Config validation.
//!
//! Turns raw, untyped JSON into an [`SmtpConfig`]. Every field is checked so
//! the caller gets the full list of problems in one [`ValidationError`].

use email_address::{EmailAddress, Options};
use serde_json::{Map, Value};

use crate::{
    config::{DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS, MIN_TIMEOUT_MS, Security, SmtpConfig},
    error::{FieldViolation, ValidationError},
};

/// Validates raw input and produces a normalised [`SmtpConfig`].
///
/// Pure: performs no I/O and never logs.
///
/// # Errors
///
/// Returns a [`ValidationError`] listing every violated constraint.
pub fn validate(raw: &Value) -> Result<SmtpConfig, ValidationError> {
    let Some(fields) = raw.as_object() else {
        return Err(ValidationError {
            violations: vec![FieldViolation::new(
                "body",
                "Configuration must be a JSON object",
            )],
        });
    };

    Fields::new(fields).validate()
}

struct Fields<'a> {
    raw: &'a Map<String, Value>,
    violations: Vec<FieldViolation>,
}

impl<'a> Fields<'a> {
    const fn new(raw: &'a Map<String, Value>) -> Self {
        Self {
            raw,
            violations: Vec::new(),
        }
    }

    fn violation(&mut self, field: &'static str, message: impl Into<String>) {
        self.violations.push(FieldViolation::new(field, message));
    }

    /// Value of `field`, treating JSON `null` as absent.
    fn get(&self, field: &str) -> Option<&'a Value> {
        self.raw.get(field).filter(|value| !value.is_null())
    }

    fn required_string(&mut self, field: &'static str, missing: &str) -> String {
        match self.get(field) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(Value::String(_)) | None => {
                self.violation(field, missing);
                String::new()
            }
            Some(_) => {
                self.violation(field, "Expected a string");
                String::new()
            }
        }
    }

    /// Optional strings normalise blank values to `None`.
    fn optional_string(&mut self, field: &'static str) -> Option<String> {
        match self.get(field) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            Some(Value::String(_)) | None => None,
            Some(_) => {
                self.violation(field, "Expected a string");
                None
            }
        }
    }

    fn boolean(&mut self, field: &'static str, default: bool) -> bool {
        match self.get(field) {
            Some(Value::Bool(b)) => *b,
            None => default,
            Some(_) => {
                self.violation(field, "Expected a boolean");
                default
            }
        }
    }

    fn email(&mut self, field: &'static str, label: &str) -> String {
        let value = self.required_string(field, &format!("{label} is required"));
        let value = value.trim().to_string();
        if !value.is_empty() && !is_bare_address(&value) {
            self.violation(field, format!("Invalid {} address", label.to_lowercase()));
        }
        value
    }

    fn port(&mut self) -> u16 {
        match self.get("port") {
            Some(Value::Number(n)) => match n.as_u64() {
                Some(port) if (1..=65535).contains(&port) => {
                    u16::try_from(port).unwrap_or_default()
                }
                Some(_) => {
                    self.violation("port", "Port must be between 1 and 65535");
                    0
                }
                None if n.as_i64().is_some() => {
                    self.violation("port", "Port must be between 1 and 65535");
                    0
                }
                None => {
                    self.violation("port", "Port must be an integer");
                    0
                }
            },
            None => {
                self.violation("port", "Port is required");
                0
            }
            Some(_) => {
                self.violation("port", "Port must be an integer");
                0
            }
        }
    }

    fn security(&mut self) -> Security {
        match self.get("security") {
            Some(Value::String(name)) => Security::from_name(name).unwrap_or_else(|| {
                self.violation(
                    "security",
                    format!("Security must be one of none, tls, ssl, starttls (got '{name}')"),
                );
                Security::None
            }),
            None => {
                self.violation("security", "Security is required");
                Security::None
            }
            Some(_) => {
                self.violation("security", "Expected a string");
                Security::None
            }
        }
    }

    /// Out-of-range timeouts are clamped rather than rejected.
    fn timeout(&mut self) -> u64 {
        match self.get("timeout") {
            None => DEFAULT_TIMEOUT_MS,
            Some(Value::Number(n)) => {
                if let Some(ms) = n.as_u64() {
                    ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS)
                } else if n.as_i64().is_some() {
                    MIN_TIMEOUT_MS
                } else {
                    self.violation("timeout", "Timeout must be an integer number of milliseconds");
                    DEFAULT_TIMEOUT_MS
                }
            }
            Some(_) => {
                self.violation("timeout", "Timeout must be an integer number of milliseconds");
                DEFAULT_TIMEOUT_MS
            }
        }
    }

    fn validate(mut self) -> Result<SmtpConfig, ValidationError> {
        let host = self.required_string("host", "Host is required").trim().to_string();
        let port = self.port();
        let security = self.security();
        let username = self.optional_string("username");
        let password = self.optional_string("password");
        let from_email = self.email("fromEmail", "From email");
        let from_name = self.optional_string("fromName");
        let to_email = self.email("toEmail", "To email");
        let to_name = self.optional_string("toName");
        let subject = self.required_string("subject", "Subject is required");
        let message = self.required_string("message", "Message is required");
        let is_html = self.boolean("isHtml", false);
        let timeout = self.timeout();
        let require_auth = self.boolean("requireAuth", false);
        let reject_unauthorized = self.boolean("rejectUnauthorized", true);

        // Cross-field rule: credentials come as a pair when auth is requested.
        if require_auth {
            if username.is_none() {
                self.violation("username", "Username is required when authentication is enabled");
            }
            if password.is_none() {
                self.violation("password", "Password is required when authentication is enabled");
            }
        }

        if !self.violations.is_empty() {
            return Err(ValidationError {
                violations: self.violations,
            });
        }

        Ok(SmtpConfig {
            host,
            port,
            security,
            username,
            password,
            from_email,
            from_name,
            to_email,
            to_name,
            subject,
            message,
            is_html,
            timeout,
            require_auth,
            reject_unauthorized,
        })
    }
}

/// A bare `local@domain.tld` address. Display names, control characters and
/// dotless domains are refused since the value goes straight onto the wire.
fn is_bare_address(value: &str) -> bool {
    let options = Options::default()
        .without_display_text()
        .with_required_tld();

    !value.chars().any(char::is_control)
        && EmailAddress::parse_with_options(value, options)
            .is_ok_and(|address| address.email() == value)
}

/// Converts a validated config back into the raw wire form, password included.
///
/// `validate(&to_raw(&config)) == Ok(config)` holds for every validated config.
#[must_use]
pub fn to_raw(config: &SmtpConfig) -> Value {
    let mut raw = Map::new();
    raw.insert("host".into(), config.host.clone().into());
    raw.insert("port".into(), config.port.into());
    raw.insert("security".into(), config.security.as_str().into());
    if let Some(username) = &config.username {
        raw.insert("username".into(), username.clone().into());
    }
    if let Some(password) = &config.password {
        raw.insert("password".into(), password.clone().into());
    }
    raw.insert("fromEmail".into(), config.from_email.clone().into());
    if let Some(name) = &config.from_name {
        raw.insert("fromName".into(), name.clone().into());
    }
    raw.insert("toEmail".into(), config.to_email.clone().into());
    if let Some(name) = &config.to_name {
        raw.insert("toName".into(), name.clone().into());
    }
    raw.insert("subject".into(), config.subject.clone().into());
    raw.insert("message".into(), config.message.clone().into());
    raw.insert("isHtml".into(), config.is_html.into());
    raw.insert("timeout".into(), config.timeout.into());
    raw.insert("requireAuth".into(), config.require_auth.into());
    raw.insert("rejectUnauthorized".into(), config.reject_unauthorized.into());
    Value::Object(raw)
}
