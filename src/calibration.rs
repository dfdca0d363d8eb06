//! Interactive calibration readout.
//!
//! Reads the sensor directly and prints each valid sample next to its value
//! after subtracting the configured sensor offset. It shares the serial
//! device with the daemon, so it refuses to start while the daemon's marker
//! is held. Malformed lines are dropped rather than substituted.

use crate::config::Config;
use crate::core::sample::{DropMalformed, SampleParser};
use crate::device::{DeviceError, DeviceReader, LineSource};
use crate::instance::{is_held, liveness_for, GuardError, MarkerInfo};
use crate::Error;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Table header printed before the readings.
pub const HEADER: &str =
    " Sample Count | Sample Rate | Original Value | Adjusted Value | Current Mean ";

/// One printed reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub count: u64,
    /// Valid samples per second since the readout started
    pub rate: f64,
    pub raw: i32,
    pub adjusted: i32,
    pub running_mean: i32,
}

impl Reading {
    pub fn format_row(&self) -> String {
        format!(
            "{:^13} | {:^11.2} | {:^14} | {:^14} | {:^14}",
            self.count, self.rate, self.raw, self.adjusted, self.running_mean
        )
    }
}

/// Reads samples and tracks the running mean for display.
pub struct CalibrationReadout {
    parser: SampleParser,
    offset: i32,
    limit: u64,
    count: u64,
    total: i64,
}

impl CalibrationReadout {
    pub fn new(offset: i32, limit: u64) -> Self {
        Self {
            parser: SampleParser::new(DropMalformed),
            offset,
            limit,
            count: 0,
            total: 0,
        }
    }

    /// Feed one raw line. Returns the reading if the line held a valid sample.
    pub fn ingest(&mut self, line: &str, elapsed_secs: f64) -> Option<Reading> {
        let parsed = self.parser.parse(line, None)?;
        self.count += 1;
        self.total += i64::from(parsed.value);

        Some(Reading {
            count: self.count,
            rate: if elapsed_secs > 0.0 {
                self.count as f64 / elapsed_secs
            } else {
                0.0
            },
            raw: parsed.value,
            adjusted: parsed.value.saturating_sub(self.offset),
            running_mean: (self.total / self.count as i64) as i32,
        })
    }

    pub fn is_done(&self) -> bool {
        self.count >= self.limit
    }

    /// Read from `source` until the sample limit, a stop request or a
    /// disconnect, writing one row per sample to `out`. Returns the number of
    /// valid samples.
    pub fn run(
        &mut self,
        source: &mut dyn LineSource,
        stop: &AtomicBool,
        out: &mut dyn Write,
    ) -> Result<u64, DeviceError> {
        let started = Instant::now();
        writeln!(out, "{HEADER}")?;

        while !self.is_done() && !stop.load(Ordering::SeqCst) {
            let line = match source.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => continue,
                Err(DeviceError::Disconnected) => break,
                Err(e) => return Err(e),
            };
            if let Some(reading) = self.ingest(&line, started.elapsed().as_secs_f64()) {
                write!(out, "{}\r", reading.format_row())?;
                out.flush()?;
            }
        }

        writeln!(out)?;
        Ok(self.count)
    }
}

/// Run the readout on the configured device, refusing if the daemon owns it.
pub fn run_calibration(
    config: &Config,
    stop: &AtomicBool,
    out: &mut dyn Write,
) -> Result<u64, Error> {
    let marker = &config.daemon.pidfile;
    let liveness = liveness_for(config.daemon.liveness);
    if is_held(marker, liveness.as_ref())? {
        let pid = MarkerInfo::read(marker)?.and_then(|m| m.pid);
        return Err(GuardError::AlreadyRunning {
            marker: marker.clone(),
            pid,
        }
        .into());
    }

    let mut reader = DeviceReader::open(&config.connection)?;
    let mut readout =
        CalibrationReadout::new(config.calibration.offset, config.calibration.samplelimit);
    Ok(readout.run(&mut reader, stop, out)?)
}
