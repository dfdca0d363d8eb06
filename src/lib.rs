//! Seis Logger - unattended data logger for a serial-attached seismometer.
//!
//! This library reads integer samples from a sensor on a serial port,
//! buffers them into fixed-duration windows and stores each completed window
//! in the background, so acquisition never waits on storage.
//!
//! # Guarantees
//!
//! - **Order**: samples keep their arrival order from the device to the file
//! - **No stalls**: a window is handed off and the next one starts at once
//! - **Failures stay local**: bad lines and failed writes never stop ingestion
//! - **Single owner**: an instance marker keeps other tools off the device
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Seis Logger                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Device    │──▶│   Sample    │──▶│   Window    │       │
//! │  │  (serial)   │   │   Parser    │   │   Buffer    │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │                                             │ snapshot      │
//! │                                             ▼               │
//! │  ┌─────────────┐                     ┌─────────────┐       │
//! │  │  Instance   │                     │ Persistence │       │
//! │  │   Marker    │                     │ (writers)   │       │
//! │  └─────────────┘                     └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use seis_logger::{config::Config, daemon};
//! use std::sync::atomic::AtomicBool;
//!
//! let context = daemon::LoggerContext::new(Config::load()?)?;
//! let stop = AtomicBool::new(false);
//!
//! // Blocks until `stop` is raised or the device disconnects
//! daemon::run_daemon(&context, &stop)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod acquisition;
pub mod archive;
pub mod calibration;
pub mod config;
pub mod core;
pub mod daemon;
pub mod device;
pub mod instance;
pub mod persistence;
pub mod stats;

use thiserror::Error;

// Re-export key types at crate root for convenience
pub use acquisition::{Acquisition, Clock, RunOutcome, SystemClock};
pub use config::{Config, ConfigError};
pub use core::{
    DropMalformed, MalformedSamplePolicy, SampleParser, StationMetadata, SubstituteMean,
    TraceRecord, WindowBuffer, WindowSnapshot,
};
pub use daemon::{run_daemon, LoggerContext};
pub use device::{DeviceError, DeviceReader, LineSource};
pub use instance::{is_held, GuardError, InstanceGuard, Liveness, MarkerExists, ProcessAlive};
pub use persistence::{JsonTraceCodec, PersistenceDispatcher, PersistenceError, WaveformCodec};
pub use stats::{AcquisitionStats, SharedStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Errors that stop the daemon or a tool from starting.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration invalid: {0}")]
    ConfigurationInvalid(#[from] ConfigError),
    #[error(transparent)]
    Instance(#[from] GuardError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl Error {
    /// The device is owned by another process.
    pub fn is_already_running(&self) -> bool {
        matches!(self, Error::Instance(GuardError::AlreadyRunning { .. }))
    }

    /// The serial port could not be opened.
    pub fn is_device_unavailable(&self) -> bool {
        matches!(self, Error::Device(DeviceError::Unavailable { .. }))
    }
}
