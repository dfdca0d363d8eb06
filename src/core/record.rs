//! Trace records handed to the waveform codec.
//!
//! Each completed window becomes one [`TraceRecord`]: the station metadata,
//! the window's samples with their own mean removed, and the file the codec
//! should write.

use crate::core::windowing::WindowSnapshot;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::path::{Path, PathBuf};

/// Station identifiers loaded once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationMetadata {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    /// Nominal sample rate in Hz
    pub sampling_rate: f64,
    pub data_quality: char,
}

/// One window, corrected and ready for the codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    pub sampling_rate: f64,
    pub data_quality: char,
    pub starttime: DateTime<Utc>,
    pub endtime: DateTime<Utc>,
    pub npts: usize,
    /// Value subtracted from every raw sample
    pub offset_correction: i32,
    /// Corrected samples in arrival order
    pub data: Vec<i32>,
}

impl TraceRecord {
    /// Build a record from a snapshot, removing the snapshot's own mean.
    pub fn from_snapshot(metadata: &StationMetadata, snapshot: &WindowSnapshot) -> Self {
        let raw = snapshot.values();
        let correction = offset_correction(&raw);
        let data: Vec<i32> = raw.iter().map(|&v| v.saturating_sub(correction)).collect();

        Self {
            network: metadata.network.clone(),
            station: metadata.station.clone(),
            location: metadata.location.clone(),
            channel: metadata.channel.clone(),
            sampling_rate: metadata.sampling_rate,
            data_quality: metadata.data_quality,
            starttime: snapshot.start,
            endtime: snapshot.end,
            npts: data.len(),
            offset_correction: correction,
            data,
        }
    }
}

/// DC-offset correction for a window: its arithmetic mean, truncated toward zero.
///
/// An empty window has no offset.
pub fn offset_correction(values: &[i32]) -> i32 {
    if values.is_empty() {
        return 0;
    }
    values.iter().map(|&v| f64::from(v)).mean() as i32
}

/// Destination of a window starting at `start`.
///
/// `{root}/{year}/{day-of-year}/{NET}.{STA}.{DDMMYYYY}_{HHMMSS}.{CHA}.{ext}`
pub fn output_path(
    root: &Path,
    metadata: &StationMetadata,
    start: DateTime<Utc>,
    extension: &str,
) -> PathBuf {
    let file_name = format!(
        "{}.{}.{:02}{:02}{:04}_{:02}{:02}{:02}.{}.{}",
        metadata.network,
        metadata.station,
        start.day(),
        start.month(),
        start.year(),
        start.hour(),
        start.minute(),
        start.second(),
        metadata.channel,
        extension
    );
    day_directory(root, start).join(file_name)
}

/// Directory holding every window that starts on `start`'s day.
pub fn day_directory(root: &Path, start: DateTime<Utc>) -> PathBuf {
    root.join(start.year().to_string())
        .join(start.ordinal().to_string())
}
