//! How progress reaches the caller.

use mailprobe_common::{LogEntry, TestResult, TestStatus, tracing};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One unit of an incremental probe stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProbeEvent {
    /// A log entry, fields inlined next to `type`.
    Log(LogEntry),
    Status {
        status: TestStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Box<TestResult>>,
    },
    Complete {
        success: bool,
        result: Box<TestResult>,
    },
}

impl ProbeEvent {
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

/// Receives progress from the session driver.
///
/// Calls arrive in recording order: every log entry of a stage is passed on
/// before the status notification of the next one.
pub trait ProgressEmitter: Send {
    fn log(&mut self, entry: &LogEntry);

    /// A stage boundary. `result` is the record as it stands.
    fn status(&mut self, status: TestStatus, result: &TestResult);

    /// The run is over; nothing follows.
    fn complete(&mut self, result: &TestResult);
}

/// Discards progress. The caller reads the result the run returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct Buffered;

impl Buffered {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ProgressEmitter for Buffered {
    fn log(&mut self, _entry: &LogEntry) {}

    fn status(&mut self, _status: TestStatus, _result: &TestResult) {}

    fn complete(&mut self, _result: &TestResult) {}
}

/// Forwards every event into a channel as it happens.
///
/// The driver is the only producer; a closed receiver means the caller went
/// away, and further events are dropped.
#[derive(Debug, Clone)]
pub struct Streaming {
    tx: mpsc::UnboundedSender<ProbeEvent>,
}

impl Streaming {
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProbeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the receiving side has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    fn send(&self, event: ProbeEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Probe event dropped, receiver is gone");
        }
    }
}

impl ProgressEmitter for Streaming {
    fn log(&mut self, entry: &LogEntry) {
        self.send(ProbeEvent::Log(entry.clone()));
    }

    fn status(&mut self, status: TestStatus, result: &TestResult) {
        self.send(ProbeEvent::Status {
            status,
            result: Some(Box::new(result.clone())),
        });
    }

    fn complete(&mut self, result: &TestResult) {
        self.send(ProbeEvent::Complete {
            success: result.success,
            result: Box::new(result.clone()),
        });
    }
}
