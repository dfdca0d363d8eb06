//! Window buffering for collecting samples into fixed-duration windows.
//!
//! A [`WindowBuffer`] is open from its start time until the configured
//! interval has elapsed. Draining it hands out an owned [`WindowSnapshot`]
//! and immediately opens the next window.

use crate::core::sample::Sample;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The samples of one completed window.
///
/// Owned exclusively by whoever receives it from [`WindowBuffer::drain`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    /// Start time of the window
    pub start: DateTime<Utc>,
    /// Time the window was drained
    pub end: DateTime<Utc>,
    /// Samples in arrival order
    pub samples: Vec<Sample>,
}

impl WindowSnapshot {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample values in arrival order.
    pub fn values(&self) -> Vec<i32> {
        self.samples.iter().map(|s| s.value).collect()
    }

    /// Get the duration of this window in seconds.
    pub fn duration_secs(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 1000.0
    }
}

/// Accumulates samples for the window currently open.
#[derive(Debug)]
pub struct WindowBuffer {
    /// Duration of each window
    interval: Duration,
    /// Start time of the open window
    start: DateTime<Utc>,
    samples: Vec<Sample>,
    /// Sum of the open window's values, for the running mean
    sum: i64,
}

impl WindowBuffer {
    /// Create a buffer whose first window opens at `start`.
    pub fn new(interval: Duration, start: DateTime<Utc>) -> Self {
        Self {
            interval,
            start,
            samples: Vec::new(),
            sum: 0,
        }
    }

    /// Append a value to the open window.
    pub fn append(&mut self, value: i32) -> Sample {
        let sample = Sample {
            index: self.samples.len(),
            value,
        };
        self.samples.push(sample);
        self.sum += i64::from(value);
        sample
    }

    /// Whether the open window has reached its interval at `now`.
    ///
    /// Compares with millisecond-or-better precision, so a window opened at
    /// 12:00:00.700 with a 5 s interval completes at 12:00:05.700.
    pub fn is_complete(&self, now: DateTime<Utc>) -> bool {
        now - self.start >= self.interval
    }

    /// Hand out the open window and start a new empty one at `now`.
    pub fn drain(&mut self, now: DateTime<Utc>) -> WindowSnapshot {
        let samples = std::mem::take(&mut self.samples);
        let snapshot = WindowSnapshot {
            start: self.start,
            end: now,
            samples,
        };
        self.start = now;
        self.sum = 0;
        snapshot
    }

    /// Truncated mean of the open window, `None` while it is empty.
    pub fn running_mean(&self) -> Option<i32> {
        if self.samples.is_empty() {
            return None;
        }
        // The mean of i32 values always fits in i32.
        Some((self.sum / self.samples.len() as i64) as i32)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Number of samples in the open window.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_append_assigns_indices() {
        let mut buffer = WindowBuffer::new(Duration::seconds(5), t0());

        assert_eq!(buffer.append(7).index, 0);
        assert_eq!(buffer.append(9).index, 1);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_completion_honors_fractional_start() {
        let start = t0() + Duration::milliseconds(700);
        let buffer = WindowBuffer::new(Duration::seconds(5), start);

        assert!(!buffer.is_complete(t0() + Duration::seconds(5)));
        assert!(!buffer.is_complete(start + Duration::milliseconds(4999)));
        assert!(buffer.is_complete(start + Duration::seconds(5)));
    }

    #[test]
    fn test_ten_hz_rollover_at_five_seconds() {
        let mut buffer = WindowBuffer::new(Duration::seconds(5), t0());
        let mut snapshots = Vec::new();

        for i in 0..=50 {
            let now = t0() + Duration::milliseconds(i * 100);
            if buffer.is_complete(now) {
                snapshots.push(buffer.drain(now));
            }
            buffer.append(i as i32);
        }

        assert_eq!(snapshots.len(), 1);
        let first = &snapshots[0];
        assert_eq!(first.len(), 50);
        assert_eq!(first.values(), (0..50).collect::<Vec<_>>());
        assert_eq!(first.end, t0() + Duration::seconds(5));
        // The sample that observed completion opens the next window.
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.start(), t0() + Duration::seconds(5));
    }

    #[test]
    fn test_drain_resets_and_keeps_snapshot_independent() {
        let mut buffer = WindowBuffer::new(Duration::seconds(1), t0());
        buffer.append(1);
        buffer.append(2);

        let later = t0() + Duration::seconds(1);
        let snapshot = buffer.drain(later);
        buffer.append(100);

        assert_eq!(snapshot.values(), vec![1, 2]);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.running_mean(), Some(100));
        assert_eq!(snapshot.duration_secs(), 1.0);
    }

    #[test]
    fn test_running_mean() {
        let mut buffer = WindowBuffer::new(Duration::seconds(5), t0());
        assert_eq!(buffer.running_mean(), None);

        for v in [10, 20, 30] {
            buffer.append(v);
        }
        assert_eq!(buffer.running_mean(), Some(20));

        buffer.append(1);
        // 61 / 4 truncates to 15
        assert_eq!(buffer.running_mean(), Some(15));
    }
}
