//! What a server advertises in its EHLO reply.

use super::{auth::Mechanism, response::Response};

/// Parsed EHLO reply.
///
/// The first line carries the server name; every further line is one
/// extension keyword with optional parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Hostname the server announced.
    pub name: Option<String>,
    /// Extension lines verbatim, in the order the server sent them.
    pub raw: Vec<String>,
    pub starttls: bool,
    pub auth: Vec<Mechanism>,
    /// Maximum message size, if `SIZE` was advertised. Zero means no limit.
    pub size: Option<usize>,
}

impl Capabilities {
    /// Builds capabilities from a successful EHLO reply.
    #[must_use]
    pub fn from_ehlo(response: &Response) -> Self {
        let mut capabilities = Self {
            name: response.first_word().map(str::to_string),
            ..Self::default()
        };

        for line in response.lines.iter().skip(1) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            capabilities.raw.push(line.to_string());

            let mut words = line.split_whitespace();
            let Some(keyword) = words.next() else {
                continue;
            };

            match keyword.to_ascii_uppercase().as_str() {
                "STARTTLS" => capabilities.starttls = true,
                "SIZE" => {
                    let limit = words.next().and_then(|s| s.parse().ok());
                    capabilities.size = Some(limit.unwrap_or(0));
                }
                // Some old servers still send "AUTH=LOGIN PLAIN".
                keyword if keyword == "AUTH" || keyword.starts_with("AUTH=") => {
                    let inline = line.get(5..).filter(|_| keyword.starts_with("AUTH="));
                    let mechanisms = inline.map_or_else(
                        || words.collect::<Vec<_>>(),
                        |rest| rest.split_whitespace().collect(),
                    );
                    for mechanism in mechanisms.into_iter().filter_map(Mechanism::from_name) {
                        if !capabilities.auth.contains(&mechanism) {
                            capabilities.auth.push(mechanism);
                        }
                    }
                }
                _ => {}
            }
        }

        capabilities
    }

    /// HELO gives us a name and nothing else.
    #[must_use]
    pub fn from_helo(response: &Response) -> Self {
        Self {
            name: response.first_word().map(str::to_string),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn supports_auth(&self, mechanism: Mechanism) -> bool {
        self.auth.contains(&mechanism)
    }
}
