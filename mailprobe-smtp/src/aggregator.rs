//! Assembles the in-progress record of a run into a frozen [`TestResult`].

use std::time::Instant;

use chrono::{DateTime, Utc};
use mailprobe_common::{
    ConnectionDetails, EmailDetails, ErrorInfo, LogEntry, SmtpConfig, TestResult, TestStatus,
};

use crate::error::ProbeError;

/// Milliseconds elapsed since `start`, saturating.
#[must_use]
pub fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// The mutable record the driver updates stage by stage.
#[derive(Debug, Clone)]
pub struct ResultBuilder {
    id: String,
    timestamp: DateTime<Utc>,
    started: Instant,
    status: TestStatus,
    config: Option<SmtpConfig>,
    connection: ConnectionDetails,
    email: Option<EmailDetails>,
    error: Option<ErrorInfo>,
}

impl ResultBuilder {
    /// A fresh record in `connecting` state. The password is dropped here.
    #[must_use]
    pub fn new(id: impl Into<String>, config: &SmtpConfig) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            started: Instant::now(),
            status: TestStatus::Connecting,
            config: Some(config.redacted()),
            connection: ConnectionDetails::for_config(config),
            email: None,
            error: None,
        }
    }

    /// A record for a run that failed before any config was established.
    #[must_use]
    pub fn unconfigured(id: impl Into<String>, started: Instant) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            started,
            status: TestStatus::Error,
            config: None,
            connection: ConnectionDetails::empty(),
            email: None,
            error: None,
        }
    }

    #[must_use]
    pub const fn status(&self) -> TestStatus {
        self.status
    }

    pub const fn set_status(&mut self, status: TestStatus) {
        self.status = status;
    }

    pub const fn connection_mut(&mut self) -> &mut ConnectionDetails {
        &mut self.connection
    }

    pub fn set_email(&mut self, email: EmailDetails) {
        self.email = Some(email);
    }

    /// Marks the run failed. Fields of stages that already succeeded stay.
    pub fn fail(&mut self, error: ProbeError) {
        self.status = TestStatus::Error;
        self.error = Some(error.into_info());
    }

    pub const fn succeed(&mut self) {
        self.status = TestStatus::Success;
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        elapsed_ms(self.started)
    }

    /// An intermediate view of the record, for status notifications.
    #[must_use]
    pub fn snapshot(&self, logs: Vec<LogEntry>) -> TestResult {
        self.clone().finish_with(logs, self.elapsed_ms())
    }

    /// Freezes the record.
    #[must_use]
    pub fn finish(self, logs: Vec<LogEntry>, total_duration: u64) -> TestResult {
        self.finish_with(logs, total_duration)
    }

    fn finish_with(self, logs: Vec<LogEntry>, total_duration: u64) -> TestResult {
        TestResult {
            id: self.id,
            timestamp: self.timestamp,
            success: self.status == TestStatus::Success,
            status: self.status,
            total_duration,
            config: self.config,
            connection: self.connection,
            email: self.email,
            logs,
            error: self.error,
        }
    }
}
