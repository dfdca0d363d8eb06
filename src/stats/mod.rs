//! Operational counters for the data logger.
//!
//! Tracks what the acquisition loop and the writers have done so the daemon
//! can report it at shutdown.

pub mod counters;

// Re-export commonly used types
pub use counters::{create_shared_stats, AcquisitionStats, SharedStats, StatsSnapshot};
