//! Usage counters fed by finished probe runs

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use mailprobe_common::{Security, TestResult, TestStatus};
use mailprobe_smtp::ProbeObserver;
use serde::Serialize;

/// Counts finished runs. Write-only from the probe's side.
#[derive(Debug, Default)]
pub struct ProbeStats {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    /// Indexed like [`Security::ALL`].
    by_security: [AtomicU64; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_tests: u64,
    pub successful_tests: u64,
    pub failed_tests: u64,
    /// Percentage of runs that delivered, to one decimal place.
    pub success_rate: f64,
    pub by_security: BTreeMap<&'static str, u64>,
}

impl ProbeStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let succeeded = self.succeeded.load(Ordering::Relaxed);

        #[allow(clippy::cast_precision_loss)]
        let success_rate = if total == 0 {
            0.0
        } else {
            (succeeded as f64 * 1000.0 / total as f64).round() / 10.0
        };

        StatsSnapshot {
            total_tests: total,
            successful_tests: succeeded,
            failed_tests: self.failed.load(Ordering::Relaxed),
            success_rate,
            by_security: Security::ALL
                .iter()
                .zip(&self.by_security)
                .map(|(security, count)| (security.as_str(), count.load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

impl ProbeObserver for ProbeStats {
    fn on_complete(&self, result: &TestResult) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if result.status == TestStatus::Success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(index) = result
            .config
            .as_ref()
            .and_then(|config| Security::ALL.iter().position(|s| *s == config.security))
        {
            self.by_security[index].fetch_add(1, Ordering::Relaxed);
        }

        tracing::debug!(
            probe = %result.id,
            status = %result.status,
            "Probe statistics updated"
        );
    }
}
