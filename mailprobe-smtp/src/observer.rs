use mailprobe_common::TestResult;

/// Notified once per finished run, after the result is frozen.
///
/// Observers are one-way: the driver never reads anything back from them.
pub trait ProbeObserver: Send + Sync {
    fn on_complete(&self, result: &TestResult);
}
