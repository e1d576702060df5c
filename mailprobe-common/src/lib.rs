//! Shared building blocks for the mailprobe SMTP probe: the configuration
//! model and its validator, the per-run log recorder, the test-result record,
//! provider presets and logging bootstrap.

pub mod config;
pub mod error;
pub mod log;
pub mod logging;
pub mod presets;
pub mod result;
pub mod validate;

pub use config::{Security, SmtpConfig};
pub use error::{FieldViolation, ValidationError};
pub use log::{Details, LogEntry, LogLevel, LogRecorder, details};
pub use result::{ConnectionDetails, EmailDetails, ErrorInfo, ServerInfo, TestResult, TestStatus};
pub use validate::validate;

pub use tracing;
