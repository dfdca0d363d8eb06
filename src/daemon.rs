//! Daemon lifecycle.
//!
//! Startup order: validate configuration, acquire the instance marker, start
//! the writers, open the device. Fatal errors can only happen in that prefix,
//! and the marker guard is dropped on every early return. Shutdown runs the
//! other way round: the loop exits, the device is closed, queued writes
//! finish, then the marker is released.

use crate::acquisition::{Acquisition, Clock, RunOutcome};
use crate::config::Config;
use crate::core::record::StationMetadata;
use crate::core::sample::{SampleParser, SubstituteMean};
use crate::device::{DeviceError, DeviceReader, LineSource};
use crate::instance::{liveness_for, InstanceGuard};
use crate::persistence::{DispatcherConfig, JsonTraceCodec, PersistenceDispatcher, WaveformCodec};
use crate::stats::{create_shared_stats, SharedStats};
use crate::Error;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

/// Everything a daemon run needs, built once at startup.
#[derive(Debug, Clone)]
pub struct LoggerContext {
    pub config: Config,
    pub metadata: Arc<StationMetadata>,
    pub stats: SharedStats,
}

impl LoggerContext {
    /// Validate `config` and derive the shared state.
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;
        let metadata = Arc::new(config.device.station_metadata());
        Ok(Self {
            config,
            metadata,
            stats: create_shared_stats(),
        })
    }

    fn dispatcher(&self, codec: Arc<dyn WaveformCodec>) -> Result<PersistenceDispatcher, Error> {
        let config = DispatcherConfig {
            root: self.config.file.datapath.clone(),
            workers: self.config.daemon.persistence_workers,
            queue_capacity: self.config.daemon.persistence_queue,
        };
        Ok(PersistenceDispatcher::new(config, codec, self.stats.clone())?)
    }
}

/// Run the daemon against the configured serial port until `stop` is raised.
pub fn run_daemon(context: &LoggerContext, stop: &AtomicBool) -> Result<RunOutcome, Error> {
    run_with(
        context,
        || DeviceReader::open(&context.config.connection),
        Arc::new(JsonTraceCodec),
        None,
        stop,
    )
}

/// Run the daemon with an arbitrary device and codec.
///
/// `open` is called only after the marker is held and the writers are up.
pub fn run_with<S, F>(
    context: &LoggerContext,
    open: F,
    codec: Arc<dyn WaveformCodec>,
    clock: Option<Box<dyn Clock>>,
    stop: &AtomicBool,
) -> Result<RunOutcome, Error>
where
    S: LineSource,
    F: FnOnce() -> Result<S, DeviceError>,
{
    let daemon = &context.config.daemon;
    let liveness = liveness_for(daemon.liveness);
    let guard = InstanceGuard::acquire(&daemon.pidfile, liveness.as_ref())?;

    let interval = context.config.data.window_duration()?;
    let dispatcher = context.dispatcher(codec)?;
    let parser = SampleParser::new(SubstituteMean::new(context.config.data.fallback_value));
    let mut acquisition = Acquisition::new(
        parser,
        interval,
        context.metadata.clone(),
        dispatcher,
        context.stats.clone(),
    )
    .with_retry_delay(context.config.connection.read_timeout());
    if let Some(clock) = clock {
        acquisition = acquisition.with_clock(clock);
    }

    let mut source = open()?;
    info!(
        port = %context.config.connection.port,
        interval = context.config.data.interval,
        datapath = %context.config.file.datapath.display(),
        "device open"
    );

    let outcome = acquisition.run(&mut source, stop);
    drop(source);

    acquisition.shutdown();
    info!("{}", context.stats.summary());

    guard.release()?;
    Ok(outcome)
}
