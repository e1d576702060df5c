//! Well-known provider settings.
//!
//! Pure data, consulted by callers to pre-fill a config before validation.

use phf::phf_ordered_map;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::Security;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub id: &'static str,
    pub name: &'static str,
    pub host: &'static str,
    pub port: u16,
    pub security: Security,
    pub require_auth: bool,
}

/// Presets in display order.
static PRESETS: phf::OrderedMap<&'static str, Preset> = phf_ordered_map! {
    "gmail" => Preset {
        id: "gmail",
        name: "Gmail",
        host: "smtp.gmail.com",
        port: 587,
        security: Security::Starttls,
        require_auth: true,
    },
    "outlook" => Preset {
        id: "outlook",
        name: "Outlook/Hotmail",
        host: "smtp-mail.outlook.com",
        port: 587,
        security: Security::Starttls,
        require_auth: true,
    },
    "yahoo" => Preset {
        id: "yahoo",
        name: "Yahoo",
        host: "smtp.mail.yahoo.com",
        port: 587,
        security: Security::Starttls,
        require_auth: true,
    },
    "sendgrid" => Preset {
        id: "sendgrid",
        name: "SendGrid",
        host: "smtp.sendgrid.net",
        port: 587,
        security: Security::Starttls,
        require_auth: true,
    },
    "mailgun" => Preset {
        id: "mailgun",
        name: "Mailgun",
        host: "smtp.mailgun.org",
        port: 587,
        security: Security::Starttls,
        require_auth: true,
    },
    "amazon_ses" => Preset {
        id: "amazon_ses",
        name: "Amazon SES",
        host: "email-smtp.us-east-1.amazonaws.com",
        port: 587,
        security: Security::Starttls,
        require_auth: true,
    },
    "custom" => Preset {
        id: "custom",
        name: "Custom SMTP",
        host: "",
        port: 587,
        security: Security::Starttls,
        require_auth: false,
    },
};

/// Looks up a preset by id. Case, `-` and spaces are ignored, so
/// `"Amazon-SES"` finds `amazon_ses`.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static Preset> {
    let key: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect();

    PRESETS.get(key.as_str())
}

/// Every preset, in display order.
pub fn all() -> impl Iterator<Item = &'static Preset> {
    PRESETS.values()
}

impl Preset {
    /// Fills the connection fields of a raw config from this preset.
    ///
    /// Fields the caller already set are left alone, as is the host when the
    /// preset has none.
    pub fn apply(&self, raw: &mut Map<String, Value>) {
        if !self.host.is_empty() {
            raw.entry("host").or_insert_with(|| self.host.into());
        }
        raw.entry("port").or_insert_with(|| self.port.into());
        raw.entry("security")
            .or_insert_with(|| self.security.as_str().into());
        raw.entry("requireAuth")
            .or_insert_with(|| self.require_auth.into());
    }
}
