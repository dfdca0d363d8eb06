//! End-to-end tests of the daemon lifecycle with a scripted device.

use chrono::{DateTime, Duration, TimeZone, Utc};
use seis_logger::archive::files_in_range;
use seis_logger::config::Config;
use seis_logger::daemon::{run_with, LoggerContext};
use seis_logger::device::ScriptedSource;
use seis_logger::instance::{InstanceGuard, MarkerExists, MarkerInfo};
use seis_logger::{Clock, DeviceError, Error, JsonTraceCodec, RunOutcome};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.file.datapath = dir.join("data");
    config.daemon.pidfile = dir.join("run").join("logger.pid");
    config.data.interval = 5;
    config.device.network = "AM".to_string();
    config.device.station = "R0E05".to_string();
    config.device.channel = "EHZ".to_string();
    config.device.samplerate = 10.0;
    config
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Window start at `start`, then one read every 100 ms.
fn stepping_clock(start: DateTime<Utc>) -> Box<dyn Clock> {
    let calls = AtomicI64::new(0);
    Box::new(move || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        start + Duration::milliseconds(100 * (n - 1).max(0))
    })
}

#[test]
fn test_windows_land_in_day_directories() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let marker = config.daemon.pidfile.clone();
    let datapath = config.file.datapath.clone();
    let context = LoggerContext::new(config).unwrap();

    let source = ScriptedSource::from_lines((0..120).map(|i| (2000 + i).to_string()));
    let mut marker_held_at_open = false;

    let outcome = run_with(
        &context,
        || {
            marker_held_at_open = marker.exists();
            Ok(source)
        },
        Arc::new(JsonTraceCodec),
        Some(stepping_clock(t0())),
        &AtomicBool::new(false),
    )
    .unwrap();

    assert_eq!(outcome, RunOutcome::Disconnected);
    assert!(marker_held_at_open);
    assert!(!marker.exists());

    // 2024-06-01 is day 153 of a leap year
    let day_dir = datapath.join("2024").join("153");
    assert_eq!(std::fs::read_dir(&day_dir).unwrap().count(), 3);

    let files = files_in_range(&datapath, "json", t0(), t0() + Duration::hours(1)).unwrap();
    let starts: Vec<_> = files.iter().map(|f| f.start).collect();
    assert_eq!(
        starts,
        vec![t0(), t0() + Duration::seconds(5), t0() + Duration::seconds(10)]
    );
    assert!(files.iter().all(|f| f.network == "AM" && f.channel == "EHZ"));

    let records: Vec<_> = files
        .iter()
        .map(|f| JsonTraceCodec::read(&f.path).unwrap())
        .collect();
    let lens: Vec<usize> = records.iter().map(|r| r.npts).collect();
    assert_eq!(lens, vec![50, 50, 20]);

    // Every sample survives in arrival order
    let raw: Vec<i32> = records
        .iter()
        .flat_map(|r| r.data.iter().map(move |v| v + r.offset_correction))
        .collect();
    assert_eq!(raw, (2000..2120).collect::<Vec<i32>>());

    let stats = context.stats.snapshot();
    assert_eq!(stats.files_written, 3);
    assert_eq!(stats.write_failures, 0);
}

#[test]
fn test_stop_flushes_partial_window_on_every_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let marker = config.daemon.pidfile.clone();
    let datapath = config.file.datapath.clone();
    let context = LoggerContext::new(config).unwrap();

    // Each run stops at a different point inside its first 5 s window
    for (run, samples) in [4, 17, 33, 49].into_iter().enumerate() {
        let start = t0() + Duration::minutes(run as i64);
        let stop = Arc::new(AtomicBool::new(false));
        let source = ScriptedSource::from_lines((0..samples).map(|i| (100 + i).to_string()))
            .stop_when_drained(stop.clone());

        let outcome = run_with(
            &context,
            || Ok(source),
            Arc::new(JsonTraceCodec),
            Some(stepping_clock(start)),
            &stop,
        )
        .unwrap();

        assert_eq!(outcome, RunOutcome::Stopped);
        assert!(!marker.exists());

        let end = start + Duration::minutes(1);
        let files = files_in_range(&datapath, "json", start, end).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].start, start);

        let record = JsonTraceCodec::read(&files[0].path).unwrap();
        assert_eq!(record.npts, samples as usize);
        let raw: Vec<i32> = record.data.iter().map(|v| v + record.offset_correction).collect();
        assert_eq!(raw, (100..100 + samples).collect::<Vec<i32>>());
    }

    let all = files_in_range(&datapath, "json", t0(), t0() + Duration::hours(1)).unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(context.stats.snapshot().files_written, 4);
}

#[test]
fn test_invalid_configuration_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.data.interval = 0;
    let marker = config.daemon.pidfile.clone();

    let err = LoggerContext::new(config.clone()).unwrap_err();
    assert!(matches!(err, Error::ConfigurationInvalid(_)));

    config.data.interval = u64::MAX / 2;
    let err = LoggerContext::new(config).unwrap_err();
    assert!(matches!(err, Error::ConfigurationInvalid(_)));

    assert!(!marker.exists());
}

#[test]
fn test_already_running_leaves_device_and_marker_alone() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let marker = config.daemon.pidfile.clone();
    let context = LoggerContext::new(config).unwrap();

    let guard = InstanceGuard::acquire(&marker, &MarkerExists).unwrap();
    let mut opened = false;

    let result = run_with(
        &context,
        || {
            opened = true;
            Ok(ScriptedSource::from_lines(["1"]))
        },
        Arc::new(JsonTraceCodec),
        None,
        &AtomicBool::new(false),
    );

    let err = result.unwrap_err();
    assert!(err.is_already_running());
    assert!(!opened);

    let info = MarkerInfo::read(&marker).unwrap().unwrap();
    assert_eq!(info.pid, Some(guard.pid()));
    guard.release().unwrap();
    assert!(!marker.exists());
}

#[test]
fn test_unavailable_device_releases_marker() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let marker = config.daemon.pidfile.clone();
    let context = LoggerContext::new(config).unwrap();

    let result = run_with(
        &context,
        || -> Result<ScriptedSource, DeviceError> {
            Err(DeviceError::Unavailable {
                port: "/dev/ttyUSB0".to_string(),
                reason: "No such file or directory".to_string(),
            })
        },
        Arc::new(JsonTraceCodec),
        None,
        &AtomicBool::new(false),
    );

    assert!(result.unwrap_err().is_device_unavailable());
    assert!(!marker.exists());
}
