//! Configuration for the seismometer data logger.
//!
//! The file is JSON with one object per section (`connection`, `data`,
//! `calibration`, `device`, `file`, `daemon`). Every field has a default so a
//! partial file is valid; [`Config::validate`] catches values the daemon
//! cannot run with.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::core::record::StationMetadata;

/// Main configuration for the data logger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub data: DataConfig,
    pub calibration: CalibrationConfig,
    pub device: DeviceConfig,
    pub file: FileConfig,
    pub daemon: DaemonConfig,
}

/// Serial connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Serial device path, e.g. `/dev/ttyUSB0`
    pub port: String,
    pub baudrate: u32,
    /// Read timeout in seconds
    pub timeout: f64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baudrate: 9600,
            timeout: 1.0,
        }
    }
}

impl ConnectionConfig {
    /// Read timeout as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout.max(0.0))
    }
}

/// Windowing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Window length in seconds
    pub interval: u64,
    /// Value substituted for a malformed line when the window is still empty
    pub fallback_value: i32,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            interval: 60,
            fallback_value: 0,
        }
    }
}

/// Longest accepted window, one day.
pub const MAX_INTERVAL_SECS: u64 = 86_400;

impl DataConfig {
    pub fn window_duration(&self) -> Result<chrono::Duration, ConfigError> {
        i64::try_from(self.interval)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| ConfigError::invalid("data.interval", "out of range"))
    }
}

/// Settings used only by the interactive calibration readout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Sensor offset subtracted from raw readings for display
    pub offset: i32,
    /// Number of valid samples to read before the readout ends
    pub samplelimit: u64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            offset: 0,
            samplelimit: 1000,
        }
    }
}

/// Station identifiers and nominal acquisition parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    /// Nominal sample rate in Hz
    pub samplerate: f64,
    /// miniSEED data quality indicator (D, R, Q or M)
    pub dataquality: String,
    /// Free-form sensor model, shown by the calibration readout
    pub model: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            network: "XX".to_string(),
            station: "STA01".to_string(),
            location: "00".to_string(),
            channel: "SHZ".to_string(),
            samplerate: 18.78,
            dataquality: "D".to_string(),
            model: "unknown".to_string(),
        }
    }
}

impl DeviceConfig {
    /// Build the immutable station metadata shared by acquisition and persistence.
    pub fn station_metadata(&self) -> StationMetadata {
        StationMetadata {
            network: self.network.clone(),
            station: self.station.clone(),
            location: self.location.clone(),
            channel: self.channel.clone(),
            sampling_rate: self.samplerate,
            data_quality: self.dataquality.chars().next().unwrap_or('D'),
        }
    }
}

/// Output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Root directory for stored windows
    pub datapath: PathBuf,
    /// Log file used when the daemon runs in the background
    pub logpath: Option<PathBuf>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            datapath: default_data_dir().join("data"),
            logpath: None,
        }
    }
}

/// Which liveness check decides whether an existing marker is still held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessMode {
    /// The marker file existing is enough
    Existence,
    /// The PID recorded in the marker must belong to a running process
    Process,
}

/// Daemon lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Instance marker path
    pub pidfile: PathBuf,
    /// Number of background writer threads
    pub persistence_workers: usize,
    /// Maximum number of windows waiting for a writer
    pub persistence_queue: usize,
    pub liveness: LivenessMode,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let run_dir = dirs::runtime_dir().unwrap_or_else(default_data_dir);
        Self {
            pidfile: run_dir.join("seis_data_logger.pid"),
            persistence_workers: 4,
            persistence_queue: 64,
            liveness: LivenessMode::Process,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("seis-logger")
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(ConfigError::Parse)
    }

    /// Save configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, content).map_err(io_err)
    }

    /// Get the path to the default configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("seis-logger")
            .join("config.json")
    }

    /// Check that every value is usable before anything touches the device.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.port.trim().is_empty() {
            return Err(ConfigError::invalid("connection.port", "must not be empty"));
        }
        if self.connection.baudrate == 0 {
            return Err(ConfigError::invalid("connection.baudrate", "must be positive"));
        }
        if !(self.connection.timeout.is_finite() && self.connection.timeout > 0.0) {
            return Err(ConfigError::invalid("connection.timeout", "must be positive"));
        }
        if self.data.interval == 0 {
            return Err(ConfigError::invalid("data.interval", "must be positive"));
        }
        if self.data.interval > MAX_INTERVAL_SECS {
            return Err(ConfigError::invalid(
                "data.interval",
                format!("must be at most {MAX_INTERVAL_SECS} seconds"),
            ));
        }
        for (field, value) in [
            ("device.network", &self.device.network),
            ("device.station", &self.device.station),
            ("device.channel", &self.device.channel),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(field, "must not be empty"));
            }
        }
        if !(self.device.samplerate.is_finite() && self.device.samplerate > 0.0) {
            return Err(ConfigError::invalid("device.samplerate", "must be positive"));
        }
        if !matches!(self.device.dataquality.as_str(), "D" | "R" | "Q" | "M") {
            return Err(ConfigError::invalid(
                "device.dataquality",
                "must be one of D, R, Q, M",
            ));
        }
        if self.daemon.persistence_workers == 0 {
            return Err(ConfigError::invalid(
                "daemon.persistence_workers",
                "must be at least 1",
            ));
        }
        if self.daemon.persistence_queue == 0 {
            return Err(ConfigError::invalid(
                "daemon.persistence_queue",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse error: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("serialize error: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
