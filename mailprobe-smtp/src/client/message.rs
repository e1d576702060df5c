//! Builds the single test message a probe submits.

use core::fmt::{self, Display};
use std::io::Write;

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use ulid::Ulid;

use super::error::{ClientError, Result};

/// Characters that force a display name into a quoted string.
const SPECIALS: &[char] = &['(', ')', '<', '>', '[', ']', ':', ';', '@', '\\', ',', '.', '"'];

/// Base64 lines are wrapped at this many characters.
const LINE_LENGTH: usize = 76;

/// An address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub name: Option<String>,
    pub email: String,
}

impl Mailbox {
    #[must_use]
    pub fn new(name: Option<&str>, email: impl Into<String>) -> Self {
        Self {
            name: name.map(sanitize).filter(|name| !name.trim().is_empty()),
            email: sanitize(&email.into()),
        }
    }

    /// The domain part of the address, if it has one.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.email
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .filter(|domain| !domain.is_empty())
    }
}

/// Header form: `Name <email>` or the bare address.
impl Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            None => f.write_str(&self.email),
            Some(name) if !name.is_ascii() => {
                write!(f, "{} <{}>", encode_word(name), self.email)
            }
            Some(name) if name.contains(SPECIALS) => {
                let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "\"{escaped}\" <{}>", self.email)
            }
            Some(name) => write!(f, "{name} <{}>", self.email),
        }
    }
}

/// A fresh `<ulid@domain>` identifier for a message sent by `from`.
#[must_use]
pub fn generate_message_id(from: &Mailbox) -> String {
    format!(
        "<{}@{}>",
        Ulid::new().to_string().to_ascii_lowercase(),
        from.domain().unwrap_or("localhost")
    )
}

/// Builder for a single-part text or HTML message.
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<Mailbox>,
    to: Vec<Mailbox>,
    subject: Option<String>,
    body: Option<String>,
    html: bool,
    message_id: Option<String>,
    date: Option<DateTime<Utc>>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from(mut self, mailbox: Mailbox) -> Self {
        self.from = Some(mailbox);
        self
    }

    #[must_use]
    pub fn to(mut self, mailbox: Mailbox) -> Self {
        self.to.push(mailbox);
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    #[must_use]
    pub fn body(mut self, content: impl Into<String>) -> Self {
        self.body = Some(content.into());
        self
    }

    /// Marks the body as HTML rather than plain text.
    #[must_use]
    pub const fn html(mut self, html: bool) -> Self {
        self.html = html;
        self
    }

    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    #[must_use]
    pub const fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Renders the message with CRLF line endings, ready for `DATA`.
    ///
    /// Dot-stuffing is left to the transport.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::BuilderError` if there is no sender or no
    /// recipient.
    pub fn build(self) -> Result<String> {
        let from = self
            .from
            .ok_or_else(|| ClientError::BuilderError("Missing sender".to_string()))?;
        if self.to.is_empty() {
            return Err(ClientError::BuilderError("Missing recipient".to_string()));
        }

        let message_id = self.message_id.unwrap_or_else(|| generate_message_id(&from));
        let date = self.date.unwrap_or_else(Utc::now);
        let body = self.body.unwrap_or_default();

        let mut message = Vec::with_capacity(1024 + body.len());

        write!(&mut message, "Date: {}\r\n", date.to_rfc2822())?;
        write!(&mut message, "From: {from}\r\n")?;
        let to: Vec<String> = self.to.iter().map(ToString::to_string).collect();
        write!(&mut message, "To: {}\r\n", to.join(", "))?;
        if let Some(subject) = &self.subject {
            write!(&mut message, "Subject: {}\r\n", header_text(subject))?;
        }
        write!(&mut message, "Message-ID: {}\r\n", sanitize(&message_id))?;
        write!(&mut message, "MIME-Version: 1.0\r\n")?;
        write!(
            &mut message,
            "Content-Type: text/{}; charset=utf-8\r\n",
            if self.html { "html" } else { "plain" }
        )?;

        if body.is_ascii() {
            write!(&mut message, "Content-Transfer-Encoding: 7bit\r\n\r\n")?;
            write!(&mut message, "{}", normalize_line_endings(&body))?;
        } else {
            write!(&mut message, "Content-Transfer-Encoding: base64\r\n\r\n")?;
            write!(&mut message, "{}", wrap_base64(body.as_bytes()))?;
        }

        String::from_utf8(message).map_err(|e| ClientError::Utf8Error(e.utf8_error()))
    }
}

/// Header values may not carry line breaks.
fn sanitize(value: &str) -> String {
    value.chars().filter(|c| !matches!(c, '\r' | '\n')).collect()
}

fn header_text(value: &str) -> String {
    let value = sanitize(value);
    if value.is_ascii() {
        value
    } else {
        encode_word(&value)
    }
}

/// RFC 2047 `B` encoded word.
fn encode_word(value: &str) -> String {
    format!("=?utf-8?b?{}?=", STANDARD.encode(value))
}

fn normalize_line_endings(body: &str) -> String {
    let mut normalized = String::with_capacity(body.len() + 16);
    for line in body.split_inclusive('\n') {
        let content = line
            .strip_suffix('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l));
        match content {
            Some(content) => {
                normalized.push_str(content);
                normalized.push_str("\r\n");
            }
            None => normalized.push_str(line),
        }
    }
    normalized
}

fn wrap_base64(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / LINE_LENGTH * 2 + 2);
    for chunk in encoded.as_bytes().chunks(LINE_LENGTH) {
        // The alphabet is pure ASCII.
        wrapped.push_str(&String::from_utf8_lossy(chunk));
        wrapped.push_str("\r\n");
    }
    wrapped
}
