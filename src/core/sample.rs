//! Sample parsing.
//!
//! The sensor emits one signed integer per line. Lines that fail to parse are
//! handled by a [`MalformedSamplePolicy`]: the daemon substitutes the running
//! mean of the current window, the calibration readout drops the line.

use serde::{Deserialize, Serialize};

/// A single reading and its position within the window it was appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub index: usize,
    pub value: i32,
}

/// Result of parsing one raw line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedSample {
    pub value: i32,
    /// The line was malformed and `value` came from the policy
    pub used_fallback: bool,
}

/// Decides what a malformed line turns into.
pub trait MalformedSamplePolicy: Send + Sync {
    /// Value to use instead of a malformed line, or `None` to drop it.
    ///
    /// `running_mean` is the truncated mean of the current window, `None` if
    /// the window is empty.
    fn substitute(&self, running_mean: Option<i32>) -> Option<i32>;
}

/// Replace malformed lines with the running mean of the window.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubstituteMean {
    /// Used when the window has no samples yet
    pub empty_window_value: i32,
}

impl SubstituteMean {
    pub fn new(empty_window_value: i32) -> Self {
        Self { empty_window_value }
    }
}

impl MalformedSamplePolicy for SubstituteMean {
    fn substitute(&self, running_mean: Option<i32>) -> Option<i32> {
        Some(running_mean.unwrap_or(self.empty_window_value))
    }
}

/// Discard malformed lines entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct DropMalformed;

impl MalformedSamplePolicy for DropMalformed {
    fn substitute(&self, _running_mean: Option<i32>) -> Option<i32> {
        None
    }
}

/// Converts raw device lines into samples.
pub struct SampleParser {
    policy: Box<dyn MalformedSamplePolicy>,
}

impl SampleParser {
    pub fn new(policy: impl MalformedSamplePolicy + 'static) -> Self {
        Self {
            policy: Box::new(policy),
        }
    }

    /// Parse a trimmed line as an integer, falling back to the policy.
    ///
    /// Returns `None` only when the line is malformed and the policy drops it.
    pub fn parse(&self, raw: &str, running_mean: Option<i32>) -> Option<ParsedSample> {
        match raw.trim().parse::<i32>() {
            Ok(value) => Some(ParsedSample {
                value,
                used_fallback: false,
            }),
            Err(_) => self.policy.substitute(running_mean).map(|value| ParsedSample {
                value,
                used_fallback: true,
            }),
        }
    }
}

impl std::fmt::Debug for SampleParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleParser").finish_non_exhaustive()
    }
}
