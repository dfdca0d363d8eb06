//! Waveform codec seam.
//!
//! The binary waveform format is owned by an external codec; the logger only
//! hands it a [`TraceRecord`] and a path. [`JsonTraceCodec`] stores the record
//! as JSON so downstream tools can read start/end times and samples back.

use crate::core::record::TraceRecord;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Writes trace records to files.
pub trait WaveformCodec: Send + Sync {
    /// File extension, without the dot.
    fn extension(&self) -> &str;

    /// Write `record` to `path`. The parent directory already exists.
    fn write(&self, record: &TraceRecord, path: &Path) -> Result<(), CodecError>;
}

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// Stores each record as a JSON document.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTraceCodec;

impl JsonTraceCodec {
    pub const EXTENSION: &'static str = "json";

    /// Read a stored record back.
    pub fn read(path: &Path) -> Result<TraceRecord, CodecError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl WaveformCodec for JsonTraceCodec {
    fn extension(&self) -> &str {
        Self::EXTENSION
    }

    fn write(&self, record: &TraceRecord, path: &Path) -> Result<(), CodecError> {
        let json = serde_json::to_vec(record)?;

        // Readers never see a half-written file.
        let tmp = temp_path(path);
        std::fs::write(&tmp, json)?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record() -> TraceRecord {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        TraceRecord {
            network: "AM".to_string(),
            station: "SIO".to_string(),
            location: "00".to_string(),
            channel: "EHZ".to_string(),
            sampling_rate: 20.0,
            data_quality: 'D',
            starttime: start,
            endtime: start + chrono::Duration::seconds(60),
            npts: 3,
            offset_correction: 500,
            data: vec![-1, 0, 1],
        }
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("AM.SIO.01062024_000000.EHZ.json");

        JsonTraceCodec.write(&record(), &path).unwrap();

        assert_eq!(JsonTraceCodec::read(&path).unwrap(), record());
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("x.json");

        assert!(matches!(
            JsonTraceCodec.write(&record(), &path),
            Err(CodecError::Io(_))
        ));
    }
}
