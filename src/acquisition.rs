//! The acquisition loop.
//!
//! One thread reads lines, parses them and fills the open window. When a
//! window's interval has elapsed it is drained and handed to the
//! [`PersistenceDispatcher`]; the loop carries on with the next window at once.
//!
//! The loop only suspends inside the device read, which is bounded by the
//! read timeout, so a stop request is seen within one timeout.

use crate::core::record::StationMetadata;
use crate::core::sample::SampleParser;
use crate::core::windowing::WindowBuffer;
use crate::device::{DeviceError, LineSource};
use crate::persistence::PersistenceDispatcher;
use crate::stats::SharedStats;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Source of wall-clock time for window boundaries.
pub trait Clock: Send {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<F> Clock for F
where
    F: Fn() -> DateTime<Utc> + Send,
{
    fn now(&self) -> DateTime<Utc> {
        self()
    }
}

/// Why [`Acquisition::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The stop flag was raised
    Stopped,
    /// The device reported end of stream
    Disconnected,
}

/// Drives samples from a line source into windows.
pub struct Acquisition {
    parser: SampleParser,
    interval: Duration,
    metadata: Arc<StationMetadata>,
    dispatcher: PersistenceDispatcher,
    stats: SharedStats,
    clock: Box<dyn Clock>,
    /// Pause after a failed read before trying again
    retry_delay: std::time::Duration,
}

impl Acquisition {
    pub fn new(
        parser: SampleParser,
        interval: Duration,
        metadata: Arc<StationMetadata>,
        dispatcher: PersistenceDispatcher,
        stats: SharedStats,
    ) -> Self {
        Self {
            parser,
            interval,
            metadata,
            dispatcher,
            stats,
            clock: Box::new(SystemClock),
            retry_delay: std::time::Duration::from_secs(1),
        }
    }

    /// Use `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry_delay(mut self, delay: std::time::Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Read from `source` until `stop` is raised or the device disconnects.
    ///
    /// Every read, including a timeout or a failed read, is followed by the
    /// rollover check. The window in progress when the loop ends is flushed
    /// like a completed one, as long as it holds at least one sample. Read
    /// errors other than a disconnect are retried after the retry delay.
    pub fn run(&mut self, source: &mut dyn LineSource, stop: &AtomicBool) -> RunOutcome {
        let mut buffer = WindowBuffer::new(self.interval, self.clock.now());
        info!(start = %buffer.start(), "listening for incoming data");

        // Consecutive failed reads; only the first of a run is logged at warn.
        let mut failures: u64 = 0;

        let outcome = loop {
            if stop.load(Ordering::SeqCst) {
                break RunOutcome::Stopped;
            }

            let read = source.next_line();

            let now = self.clock.now();
            if buffer.is_complete(now) {
                self.roll_over(&mut buffer, now);
            }

            match read {
                Ok(read) => {
                    if failures > 0 {
                        info!(failures, "device reads recovered");
                        failures = 0;
                    }
                    match read {
                        Some(line) => {
                            self.stats.record_line();
                            self.ingest(&mut buffer, &line);
                        }
                        None => self.stats.record_timeout(),
                    }
                }
                Err(DeviceError::Disconnected) => {
                    warn!("device disconnected");
                    break RunOutcome::Disconnected;
                }
                Err(e) => {
                    self.stats.record_read_error();
                    if failures == 0 {
                        warn!(error = %e, "device read failed, retrying");
                    } else {
                        debug!(error = %e, failures, "device read failed");
                    }
                    failures += 1;
                    std::thread::sleep(self.retry_delay);
                }
            }
        };

        let now = self.clock.now();
        self.roll_over(&mut buffer, now);
        info!(?outcome, "acquisition stopped");
        outcome
    }

    fn ingest(&self, buffer: &mut WindowBuffer, line: &str) {
        match self.parser.parse(line, buffer.running_mean()) {
            Some(parsed) => {
                if parsed.used_fallback {
                    debug!(line, value = parsed.value, "bad value received, substituted");
                    self.stats.record_substitution();
                }
                buffer.append(parsed.value);
                self.stats.record_sample();
            }
            None => {
                debug!(line, "bad value received, dropped");
                self.stats.record_dropped();
            }
        }
    }

    fn roll_over(&self, buffer: &mut WindowBuffer, now: DateTime<Utc>) {
        let snapshot = buffer.drain(now);
        if snapshot.is_empty() {
            debug!(start = %snapshot.start, "empty window skipped");
            return;
        }

        self.stats.record_window_completed();
        debug!(start = %snapshot.start, samples = snapshot.len(), "window complete");
        self.dispatcher.dispatch(snapshot, self.metadata.clone());
    }

    /// Stop the writers once every queued window is stored.
    pub fn shutdown(&mut self) {
        info!(pending = self.dispatcher.pending(), "waiting for queued writes");
        self.dispatcher.shutdown();
    }

    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::TraceRecord;
    use crate::core::sample::{DropMalformed, SubstituteMean};
    use crate::device::mock::{ScriptedRead, ScriptedSource};
    use crate::persistence::{CodecError, DispatcherConfig, WaveformCodec};
    use crate::stats::create_shared_stats;
    use chrono::TimeZone;
    use std::io::ErrorKind;
    use std::path::Path;
    use std::sync::atomic::AtomicI64;
    use std::sync::Mutex;

    /// Keeps written records in memory.
    #[derive(Default)]
    struct MemoryCodec {
        records: Mutex<Vec<TraceRecord>>,
    }

    impl WaveformCodec for MemoryCodec {
        fn extension(&self) -> &str {
            "mem"
        }

        fn write(&self, record: &TraceRecord, _path: &Path) -> Result<(), CodecError> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn metadata() -> Arc<StationMetadata> {
        Arc::new(StationMetadata {
            network: "AM".to_string(),
            station: "TEST".to_string(),
            location: "00".to_string(),
            channel: "EHZ".to_string(),
            sampling_rate: 10.0,
            data_quality: 'D',
        })
    }

    /// First call is the window start, then each call is one read 100 ms later.
    fn stepping_clock() -> impl Clock {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let calls = AtomicI64::new(0);
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            t0 + Duration::milliseconds(100 * (n - 1).max(0))
        }
    }

    fn acquisition(parser: SampleParser, codec: Arc<MemoryCodec>, root: &Path) -> Acquisition {
        let stats = create_shared_stats();
        let dispatcher = PersistenceDispatcher::new(
            DispatcherConfig {
                root: root.to_path_buf(),
                workers: 2,
                queue_capacity: 16,
            },
            codec,
            stats.clone(),
        )
        .unwrap();

        Acquisition::new(parser, Duration::seconds(5), metadata(), dispatcher, stats)
            .with_clock(Box::new(stepping_clock()))
            .with_retry_delay(std::time::Duration::ZERO)
    }

    fn sorted(codec: &MemoryCodec) -> Vec<TraceRecord> {
        let mut records = codec.records.lock().unwrap().clone();
        records.sort_by_key(|r| r.starttime);
        records
    }

    #[test]
    fn test_windows_split_at_interval() {
        let dir = tempfile::tempdir().unwrap();
        let codec = Arc::new(MemoryCodec::default());
        let parser = SampleParser::new(SubstituteMean::default());
        let mut acq = acquisition(parser, codec.clone(), dir.path());

        let mut source = ScriptedSource::from_lines((0..120).map(|i| (1000 + i).to_string()));
        let stop = AtomicBool::new(false);

        assert_eq!(acq.run(&mut source, &stop), RunOutcome::Disconnected);
        acq.shutdown();

        let records = sorted(&codec);
        let lens: Vec<usize> = records.iter().map(|r| r.npts).collect();
        assert_eq!(lens, vec![50, 50, 20]);
        // 1000..1049 has mean 1024 after truncation
        assert_eq!(records[0].offset_correction, 1024);
        assert_eq!(records[0].data.first(), Some(&-24));
        assert_eq!(acq.stats().snapshot().windows_completed, 3);
    }

    #[test]
    fn test_malformed_line_takes_running_mean() {
        let dir = tempfile::tempdir().unwrap();
        let codec = Arc::new(MemoryCodec::default());
        let parser = SampleParser::new(SubstituteMean::new(7));
        let mut acq = acquisition(parser, codec.clone(), dir.path());

        let mut source = ScriptedSource::from_lines(["oops", "10", "20", "30", "#?", "40"]);
        acq.run(&mut source, &AtomicBool::new(false));
        acq.shutdown();

        let records = sorted(&codec);
        assert_eq!(records.len(), 1);
        // raw values: 7 (empty-window default), 10, 20, 30, 16 (mean of 7..30), 40
        let raw: Vec<i32> = records[0]
            .data
            .iter()
            .map(|v| v + records[0].offset_correction)
            .collect();
        assert_eq!(raw, vec![7, 10, 20, 30, 16, 40]);
        assert_eq!(acq.stats().snapshot().samples_substituted, 2);
    }

    #[test]
    fn test_drop_policy_skips_lines() {
        let dir = tempfile::tempdir().unwrap();
        let codec = Arc::new(MemoryCodec::default());
        let mut acq = acquisition(SampleParser::new(DropMalformed), codec.clone(), dir.path());

        let mut source = ScriptedSource::from_lines(["5", "x", "7"]);
        acq.run(&mut source, &AtomicBool::new(false));
        acq.shutdown();

        assert_eq!(sorted(&codec)[0].npts, 2);
        assert_eq!(acq.stats().snapshot().samples_dropped, 1);
    }

    #[test]
    fn test_timeouts_still_roll_windows() {
        let dir = tempfile::tempdir().unwrap();
        let codec = Arc::new(MemoryCodec::default());
        let mut acq = acquisition(SampleParser::new(DropMalformed), codec.clone(), dir.path());

        let mut reads = vec![ScriptedRead::Line("1".to_string())];
        reads.extend(std::iter::repeat(ScriptedRead::Timeout).take(60));
        reads.push(ScriptedRead::Line("2".to_string()));
        let mut source = ScriptedSource::new(reads);

        acq.run(&mut source, &AtomicBool::new(false));
        acq.shutdown();

        let records = sorted(&codec);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].npts, 1);
        assert_eq!(records[1].npts, 1);
        assert_eq!(acq.stats().snapshot().read_timeouts, 60);
    }

    #[test]
    fn test_read_errors_still_roll_windows() {
        let dir = tempfile::tempdir().unwrap();
        let codec = Arc::new(MemoryCodec::default());
        let mut acq = acquisition(SampleParser::new(DropMalformed), codec.clone(), dir.path());

        // 10 samples, a 10 s outage, then one more sample
        let mut reads: Vec<_> = (0..10).map(|i| ScriptedRead::Line(i.to_string())).collect();
        reads.extend(std::iter::repeat(ScriptedRead::Failure(ErrorKind::BrokenPipe)).take(100));
        reads.push(ScriptedRead::Line("99".to_string()));
        let mut source = ScriptedSource::new(reads);

        assert_eq!(acq.run(&mut source, &AtomicBool::new(false)), RunOutcome::Disconnected);
        acq.shutdown();

        let records = sorted(&codec);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].npts, 10);
        for record in &records {
            assert!(record.endtime - record.starttime <= Duration::seconds(5));
        }
        assert_eq!(records[1].data.len(), 1);
        assert_eq!(acq.stats().snapshot().read_errors, 100);
    }

    #[test]
    fn test_blank_line_takes_malformed_path() {
        let dir = tempfile::tempdir().unwrap();
        let codec = Arc::new(MemoryCodec::default());
        let parser = SampleParser::new(SubstituteMean::default());
        let mut acq = acquisition(parser, codec.clone(), dir.path());

        let mut source = ScriptedSource::new(vec![
            ScriptedRead::Line("10".to_string()),
            ScriptedRead::Line(String::new()),
            ScriptedRead::Timeout,
            ScriptedRead::Line("30".to_string()),
        ]);
        acq.run(&mut source, &AtomicBool::new(false));
        acq.shutdown();

        let record = &sorted(&codec)[0];
        let raw: Vec<i32> = record.data.iter().map(|v| v + record.offset_correction).collect();
        assert_eq!(raw, vec![10, 10, 30]);
        let counts = acq.stats().snapshot();
        assert_eq!(counts.samples_substituted, 1);
        assert_eq!(counts.read_timeouts, 1);
    }

    #[test]
    fn test_stop_flag_flushes_partial_window() {
        let dir = tempfile::tempdir().unwrap();
        let codec = Arc::new(MemoryCodec::default());
        let mut acq = acquisition(SampleParser::new(DropMalformed), codec.clone(), dir.path());

        let stop = Arc::new(AtomicBool::new(false));
        let mut source = ScriptedSource::from_lines((0..12).map(|i| i.to_string()))
            .stop_when_drained(stop.clone());

        assert_eq!(acq.run(&mut source, &stop), RunOutcome::Stopped);
        acq.shutdown();

        let records = sorted(&codec);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].npts, 12);
    }
}
