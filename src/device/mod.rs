//! Device access for the data logger.
//!
//! The sensor is read one text line at a time through [`LineSource`]. The
//! serial implementation blocks for at most the configured read timeout and
//! yields `None` when nothing arrived, so callers never spin.

pub mod mock;
pub mod serial;

use thiserror::Error;

pub use mock::ScriptedSource;
pub use serial::DeviceReader;

/// A lazy, non-restartable stream of raw text lines.
pub trait LineSource {
    /// Next complete line without its terminator, or `None` if the read
    /// timed out. A blank line from the device is `Some("")`.
    fn next_line(&mut self) -> Result<Option<String>, DeviceError>;
}

/// Errors that can occur while talking to the device.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device unavailable: cannot open {port}: {reason}")]
    Unavailable { port: String, reason: String },
    #[error("device disconnected")]
    Disconnected,
    #[error("device read failed: {0}")]
    Io(#[from] std::io::Error),
}
