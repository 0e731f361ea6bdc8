//! Run statistics.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::DirectoryStatus;

/// Counters for one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    /// Records matching the filter.
    #[serde(default)]
    pub records_total: u64,
    /// Records read so far.
    #[serde(default)]
    pub records_processed: u64,
    #[serde(default)]
    pub pages_processed: u64,
    /// Records whose join key was found in the directory.
    #[serde(default)]
    pub present: u64,
    #[serde(default)]
    pub absent: u64,
    /// Records whose flag was set by this run.
    #[serde(default)]
    pub mutated: u64,
    #[serde(default)]
    pub rows_emitted: u64,
    #[serde(default)]
    pub duration_ms: u64,
}

impl RunStatistics {
    /// Create new empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one matched record.
    pub fn record_status(&mut self, status: DirectoryStatus) {
        match status {
            DirectoryStatus::Present => self.present += 1,
            DirectoryStatus::Absent => self.absent += 1,
        }
    }

    /// Count a finished page.
    pub fn record_page(&mut self, records: usize) {
        self.pages_processed += 1;
        self.records_processed += records as u64;
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    }

    /// Calculate progress percentage.
    pub fn progress_percentage(&self) -> f64 {
        if self.records_total == 0 {
            0.0
        } else {
            (self.records_processed as f64 / self.records_total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut stats = RunStatistics::new();
        stats.records_total = 4;
        stats.record_page(2);
        stats.record_status(DirectoryStatus::Present);
        stats.record_status(DirectoryStatus::Absent);

        assert_eq!(stats.pages_processed, 1);
        assert_eq!(stats.records_processed, 2);
        assert_eq!(stats.present, 1);
        assert_eq!(stats.absent, 1);
        assert!((stats.progress_percentage() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_progress_without_total() {
        assert_eq!(RunStatistics::new().progress_percentage(), 0.0);
    }

    #[test]
    fn test_duration() {
        let mut stats = RunStatistics::new();
        stats.set_duration(Duration::from_millis(1500));
        assert_eq!(stats.duration_ms, 1500);
    }
}
