//! The per-run log recorder.
//!
//! Every stage of a probe writes here; the recorded sequence is what ends up
//! in the final [`crate::TestResult`] and what a streaming caller sees live.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

/// Replacement written in place of any redacted value.
pub const REDACTED: &str = "[REDACTED]";

/// Ordered key/value details attached to a log entry.
pub type Details = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
    Debug,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Details>,
    /// Milliseconds spent in the step this entry reports on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

/// Builds [`Details`] from a `serde_json::json!` object literal.
///
/// Anything other than an object yields `None`.
#[must_use]
pub fn details(value: Value) -> Option<Details> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Append-only, timestamped log shared by all stages of one probe run.
///
/// Clones share the same underlying sequence, so the invocation boundary can
/// keep a handle and still read what was recorded if the run itself dies.
#[derive(Debug, Clone)]
pub struct LogRecorder {
    probe_id: Arc<str>,
    entries: Arc<RwLock<Vec<LogEntry>>>,
}

impl LogRecorder {
    #[must_use]
    pub fn new(probe_id: impl Into<Arc<str>>) -> Self {
        Self {
            probe_id: probe_id.into(),
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn probe_id(&self) -> &str {
        &self.probe_id
    }

    /// Records an entry and returns a copy for forwarding.
    ///
    /// Any value stored under a key named `password` (case-insensitive, at any
    /// depth) is replaced before the entry is stored. Message text is not
    /// scanned.
    pub fn record(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        details: Option<Details>,
        duration: Option<u64>,
    ) -> LogEntry {
        let details = details.map(|mut details| {
            redact_map(&mut details);
            details
        });

        let entry = {
            let mut entries = self.entries.write();

            // Wall clocks can step backwards; the log must not.
            let now = Utc::now();
            let timestamp = entries
                .last()
                .map_or(now, |last| last.timestamp.max(now));

            let entry = LogEntry {
                id: Ulid::new().to_string(),
                timestamp,
                level,
                message: message.into(),
                details,
                duration,
            };
            entries.push(entry.clone());
            entry
        };

        self.mirror(&entry);
        entry
    }

    pub fn info(&self, message: impl Into<String>, details: Option<Details>) -> LogEntry {
        self.record(LogLevel::Info, message, details, None)
    }

    pub fn debug(&self, message: impl Into<String>, details: Option<Details>) -> LogEntry {
        self.record(LogLevel::Debug, message, details, None)
    }

    pub fn warning(&self, message: impl Into<String>, details: Option<Details>) -> LogEntry {
        self.record(LogLevel::Warning, message, details, None)
    }

    /// A consistent snapshot of everything recorded so far.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn mirror(&self, entry: &LogEntry) {
        let probe = &*self.probe_id;
        let message = entry.message.as_str();
        let details = entry
            .details
            .as_ref()
            .map(|d| Value::Object(d.clone()).to_string())
            .unwrap_or_default();

        match entry.level {
            LogLevel::Debug => tracing::debug!(probe = %probe, details = %details, "{message}"),
            LogLevel::Info | LogLevel::Success => {
                let level = entry.level;
                tracing::info!(probe = %probe, level = ?level, details = %details, "{message}");
            }
            LogLevel::Warning => tracing::warn!(probe = %probe, details = %details, "{message}"),
            LogLevel::Error => tracing::error!(probe = %probe, details = %details, "{message}"),
        }
    }
}

fn redact_map(map: &mut Details) {
    for (key, value) in map.iter_mut() {
        if key.eq_ignore_ascii_case("password") {
            *value = Value::String(REDACTED.to_string());
        } else {
            redact_value(value);
        }
    }
}

fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => redact_map(map),
        Value::Array(items) => items.iter_mut().for_each(redact_value),
        _ => {}
    }
}
