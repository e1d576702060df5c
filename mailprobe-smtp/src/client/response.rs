//! SMTP reply parsing and representation.

use core::fmt::{self, Display};

use super::error::{ClientError, Result};

/// A single line of an SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    /// The SMTP status code (e.g., 220, 250, 550).
    pub code: u16,
    /// Whether this is the last line in a multi-line reply.
    pub is_last: bool,
    /// The text following the status code.
    pub message: String,
}

/// A complete SMTP reply, which may span several lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// The reply text with lines joined by newlines, without codes.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// The first word of the first line; the server name in greetings and EHLO.
    #[must_use]
    pub fn first_word(&self) -> Option<&str> {
        self.lines.first()?.split_whitespace().next()
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// 3xx: the server wants more input (DATA, AUTH challenges).
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    #[must_use]
    pub const fn is_temporary_error(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    /// Parses a single reply line.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` if the line doesn't match SMTP format.
    pub fn parse_line(line: &str) -> Result<ResponseLine> {
        let code_str = line
            .get(..3)
            .ok_or_else(|| ClientError::ParseError(format!("Response line too short: '{line}'")))?;

        if !code_str.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ClientError::ParseError(format!(
                "Invalid status code: '{code_str}'"
            )));
        }
        let code = code_str
            .parse::<u16>()
            .map_err(|_| ClientError::ParseError(format!("Invalid status code: '{code_str}'")))?;

        let is_last = match line.as_bytes().get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(&c) => {
                return Err(ClientError::ParseError(format!(
                    "Invalid separator character: '{}'",
                    char::from(c)
                )));
            }
        };

        Ok(ResponseLine {
            code,
            is_last,
            message: line.get(4..).unwrap_or_default().to_string(),
        })
    }

    /// Parses one complete (possibly multi-line) reply from the front of
    /// `buffer`.
    ///
    /// Returns the reply and the number of bytes consumed, or `None` if the
    /// buffer does not yet hold a complete reply.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` if the reply is malformed.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(newline) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + newline];
            consumed += newline + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            let text = String::from_utf8_lossy(raw);
            let line = Self::parse_line(&text)?;

            match code {
                Some(expected) if expected != line.code => {
                    return Err(ClientError::ParseError(format!(
                        "Status code mismatch in multi-line response: expected {expected}, got {}",
                        line.code
                    )));
                }
                Some(_) => {}
                None => code = Some(line.code),
            }

            lines.push(line.message);

            if line.is_last {
                return Ok(code.map(|code| (Self::new(code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

/// Renders the reply as the server sent it, code prefix on every line.
impl Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lines.is_empty() {
            return write!(f, "{}", self.code);
        }

        let last = self.lines.len() - 1;
        for (i, line) in self.lines.iter().enumerate() {
            let separator = if i == last { ' ' } else { '-' };
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}{separator}{line}", self.code)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parse_single_line() {
        let line = ResponseLine {
            code: 220,
            is_last: true,
            message: "mail.example.com ESMTP".to_string(),
        };
        assert_eq!(
            Response::parse_line("220 mail.example.com ESMTP").unwrap(),
            line
        );
    }

    #[test]
    fn parse_bare_code() {
        let line = Response::parse_line("250").unwrap();
        assert!(line.is_last);
        assert_eq!(line.message, "");
    }

    #[test]
    fn reject_garbage() {
        assert!(Response::parse_line("hi").is_err());
        assert!(Response::parse_line("abc def").is_err());
        assert!(Response::parse_line("250_OK").is_err());
        assert!(Response::parse_line("+25 OK").is_err());
    }

    #[test]
    fn parse_multi_line_response() {
        let data = b"250-mail.example.com\r\n250-SIZE 10000000\r\n250 HELP\r\n";
        let (response, consumed) = Response::parse_response(data).unwrap().unwrap();
        assert_eq!(response.code, 250);
        assert_eq!(
            response.lines,
            vec!["mail.example.com", "SIZE 10000000", "HELP"]
        );
        assert_eq!(consumed, data.len());
        assert_eq!(response.first_word(), Some("mail.example.com"));
    }

    #[test]
    fn incomplete_response_needs_more_data() {
        assert!(
            Response::parse_response(b"250-mail.example.com\r\n250-SIZE")
                .unwrap()
                .is_none()
        );
        assert!(Response::parse_response(b"").unwrap().is_none());
    }

    #[test]
    fn only_the_first_reply_is_consumed() {
        let data = b"250 OK\r\n221 Bye\r\n";
        let (response, consumed) = Response::parse_response(data).unwrap().unwrap();
        assert_eq!(response.code, 250);
        assert_eq!(consumed, 8);
    }

    #[test]
    fn mismatched_codes_are_rejected() {
        assert!(Response::parse_response(b"250-one\r\n251 two\r\n").is_err());
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let (response, _) = Response::parse_response(b"250 caf\xe9\r\n").unwrap().unwrap();
        assert!(response.is_success());
        assert!(response.message().starts_with("caf"));
    }

    #[test]
    fn display_reproduces_the_wire_form() {
        let response = Response::new(250, vec!["mx.example.com".into(), "AUTH PLAIN".into()]);
        assert_eq!(response.to_string(), "250-mx.example.com\n250 AUTH PLAIN");

        let single = Response::new(535, vec!["5.7.8 Authentication failed".into()]);
        assert_eq!(single.to_string(), "535 5.7.8 Authentication failed");
    }

    #[test]
    fn classification() {
        assert!(Response::new(250, vec![]).is_success());
        assert!(Response::new(354, vec![]).is_intermediate());
        assert!(Response::new(421, vec![]).is_temporary_error());
        assert!(Response::new(550, vec![]).is_permanent_error());
    }
}
