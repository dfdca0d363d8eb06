//! Lock-free acquisition counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters shared by the acquisition loop and the persistence workers.
#[derive(Debug)]
pub struct AcquisitionStats {
    /// Non-empty lines read from the device
    lines_read: AtomicU64,
    /// Reads that timed out without data
    read_timeouts: AtomicU64,
    /// Reads that failed with a device error other than a disconnect
    read_errors: AtomicU64,
    /// Samples appended to a window
    samples_appended: AtomicU64,
    /// Malformed lines replaced by a fallback value
    samples_substituted: AtomicU64,
    /// Malformed lines discarded
    samples_dropped: AtomicU64,
    /// Windows drained with at least one sample
    windows_completed: AtomicU64,
    /// Windows rejected because the persistence queue was full
    dispatches_rejected: AtomicU64,
    /// Files written by the codec
    files_written: AtomicU64,
    /// Failed directory creations or codec writes
    write_failures: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
}

impl AcquisitionStats {
    pub fn new() -> Self {
        Self {
            lines_read: AtomicU64::new(0),
            read_timeouts: AtomicU64::new(0),
            read_errors: AtomicU64::new(0),
            samples_appended: AtomicU64::new(0),
            samples_substituted: AtomicU64::new(0),
            samples_dropped: AtomicU64::new(0),
            windows_completed: AtomicU64::new(0),
            dispatches_rejected: AtomicU64::new(0),
            files_written: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            session_start: Utc::now(),
        }
    }

    pub fn record_line(&self) {
        self.lines_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.read_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample(&self) {
        self.samples_appended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_substitution(&self) {
        self.samples_substituted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window_completed(&self) {
        self.windows_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_rejected(&self) {
        self.dispatches_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_written(&self) {
        self.files_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            read_timeouts: self.read_timeouts.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            samples_appended: self.samples_appended.load(Ordering::Relaxed),
            samples_substituted: self.samples_substituted.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            windows_completed: self.windows_completed.load(Ordering::Relaxed),
            dispatches_rejected: self.dispatches_rejected.load(Ordering::Relaxed),
            files_written: self.files_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Session Statistics:\n\
             - Lines read: {}\n\
             - Read timeouts: {}\n\
             - Read errors: {}\n\
             - Samples stored: {} ({} substituted, {} dropped)\n\
             - Windows completed: {}\n\
             - Files written: {}\n\
             - Write failures: {}\n\
             - Windows rejected (queue full): {}\n\
             - Session duration: {} seconds",
            stats.lines_read,
            stats.read_timeouts,
            stats.read_errors,
            stats.samples_appended,
            stats.samples_substituted,
            stats.samples_dropped,
            stats.windows_completed,
            stats.files_written,
            stats.write_failures,
            stats.dispatches_rejected,
            stats.session_duration_secs
        )
    }
}

impl Default for AcquisitionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub lines_read: u64,
    pub read_timeouts: u64,
    pub read_errors: u64,
    pub samples_appended: u64,
    pub samples_substituted: u64,
    pub samples_dropped: u64,
    pub windows_completed: u64,
    pub dispatches_rejected: u64,
    pub files_written: u64,
    pub write_failures: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Thread-safe shared counters.
pub type SharedStats = Arc<AcquisitionStats>;

pub fn create_shared_stats() -> SharedStats {
    Arc::new(AcquisitionStats::new())
}
