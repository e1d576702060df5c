//! Error types for the mailprobe-common crate.

use core::fmt::{self, Display};

use serde::Serialize;
use thiserror::Error;

/// A single violated field constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    /// The offending field, using its wire name (e.g. `fromEmail`).
    pub field: &'static str,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Raised by the config validator before any network activity.
///
/// Carries every violated constraint, not just the first one found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid configuration: {}", join(.violations))]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

fn join(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    /// Returns `true` if any violation concerns `field`.
    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }

    /// Names of the violated fields, in the order they were checked.
    #[must_use]
    pub fn fields(&self) -> Vec<&'static str> {
        self.violations.iter().map(|v| v.field).collect()
    }
}
