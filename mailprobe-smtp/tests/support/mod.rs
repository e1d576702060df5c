//! Test support for driving probes against a local scripted server.

pub mod mock_server;

use mailprobe_common::SmtpConfig;
use serde_json::{Value, json};

pub use mock_server::{MockSmtpServer, SmtpCommand};

/// A valid plaintext config aimed at `server`, with `overrides` merged in.
pub fn config_for(server: &MockSmtpServer, overrides: &Value) -> SmtpConfig {
    let mut raw = json!({
        "host": "127.0.0.1",
        "port": server.port(),
        "security": "none",
        "fromEmail": "probe@example.com",
        "fromName": "Mail Probe",
        "toEmail": "inbox@example.org",
        "subject": "SMTP test",
        "message": "Hello from the probe.\n.leading dot line",
        "timeout": 5000,
    });

    if let (Some(raw), Some(overrides)) = (raw.as_object_mut(), overrides.as_object()) {
        for (key, value) in overrides {
            raw.insert(key.clone(), value.clone());
        }
    }

    mailprobe_common::validate(&raw).unwrap()
}
