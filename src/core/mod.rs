//! Core functionality for the data logger.
//!
//! This module contains:
//! - Sample parsing and the malformed-line policies
//! - Window buffering with time-based rollover
//! - Trace record construction (offset correction, output paths)

pub mod record;
pub mod sample;
pub mod windowing;

// Re-export commonly used types
pub use record::{offset_correction, output_path, StationMetadata, TraceRecord};
pub use sample::{
    DropMalformed, MalformedSamplePolicy, ParsedSample, Sample, SampleParser, SubstituteMean,
};
pub use windowing::{WindowBuffer, WindowSnapshot};
