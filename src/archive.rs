//! Lookup of stored windows by time range.
//!
//! Plotting and report tools find windows under
//! `{root}/{year}/{day-of-year}/` and recover each window's start time from
//! its file name.

use crate::core::record::day_directory;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A stored window identified from its file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedFile {
    pub path: PathBuf,
    pub network: String,
    pub station: String,
    pub channel: String,
    pub start: DateTime<Utc>,
}

/// Split `NET.STA.DDMMYYYY_HHMMSS.CHA.ext` into its parts.
pub fn parse_file_name(name: &str) -> Option<(String, String, DateTime<Utc>, String, String)> {
    let parts: Vec<&str> = name.split('.').collect();
    let [network, station, stamp, channel, ext] = parts.as_slice() else {
        return None;
    };
    let naive = NaiveDateTime::parse_from_str(stamp, "%d%m%Y_%H%M%S").ok()?;

    Some((
        network.to_string(),
        station.to_string(),
        Utc.from_utc_datetime(&naive),
        channel.to_string(),
        ext.to_string(),
    ))
}

/// Stored windows with extension `extension` whose start lies in `[start, end)`,
/// ordered by start time.
pub fn files_in_range(
    root: &Path,
    extension: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> std::io::Result<Vec<ArchivedFile>> {
    let mut files = Vec::new();
    if end <= start {
        return Ok(files);
    }

    let mut day = start;
    let last_day = end.date_naive();
    while day.date_naive() <= last_day {
        let dir = day_directory(root, day);
        match std::fs::read_dir(&dir) {
            Ok(entries) => {
                for entry in entries {
                    let path = entry?.path();
                    if let Some(file) = archived_file(&path, extension) {
                        if file.start >= start && file.start < end {
                            files.push(file);
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "no data for day");
            }
            Err(e) => return Err(e),
        }
        day += Duration::days(1);
    }

    files.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.path.cmp(&b.path)));
    Ok(files)
}

fn archived_file(path: &Path, extension: &str) -> Option<ArchivedFile> {
    let name = path.file_name()?.to_str()?;
    let (network, station, start, channel, ext) = parse_file_name(name)?;
    if ext != extension {
        return None;
    }
    Some(ArchivedFile {
        path: path.to_path_buf(),
        network,
        station,
        channel,
        start,
    })
}
