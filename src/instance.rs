//! Single-instance marker for the shared serial device.
//!
//! The daemon holds an [`InstanceGuard`] for its whole lifetime. The marker
//! file records the owning PID; other tools call [`is_held`] before opening
//! the device. Whether an existing marker still counts as held is decided by
//! a [`Liveness`] strategy, so a marker left behind by a crashed daemon can be
//! recognised as stale.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::LivenessMode;

/// Errors from acquiring or inspecting the marker.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("already running (marker {} exists)", marker.display())]
    AlreadyRunning { marker: PathBuf, pid: Option<u32> },
    #[error("marker {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What an existing marker file says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerInfo {
    pub path: PathBuf,
    /// Owning PID, if the content could be parsed
    pub pid: Option<u32>,
}

impl MarkerInfo {
    /// Read the marker at `path`, `None` if there is none.
    pub fn read(path: &Path) -> Result<Option<Self>, GuardError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(Self {
                path: path.to_path_buf(),
                pid: content.trim().parse().ok(),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(GuardError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Decides whether an existing marker still belongs to a live daemon.
pub trait Liveness: Send + Sync {
    fn is_alive(&self, marker: &MarkerInfo) -> bool;
}

/// A marker is held as long as the file exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerExists;

impl Liveness for MarkerExists {
    fn is_alive(&self, _marker: &MarkerInfo) -> bool {
        true
    }
}

/// A marker is held while the recorded process is running.
///
/// Markers without a readable PID are treated as held.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessAlive;

impl Liveness for ProcessAlive {
    fn is_alive(&self, marker: &MarkerInfo) -> bool {
        match marker.pid {
            Some(pid) => process_alive(pid),
            None => true,
        }
    }
}

/// Whether a process with `pid` exists.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // Signal 0 only performs the permission and existence checks.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}

/// Build the strategy selected in the configuration.
pub fn liveness_for(mode: LivenessMode) -> Box<dyn Liveness> {
    match mode {
        LivenessMode::Existence => Box::new(MarkerExists),
        LivenessMode::Process => Box::new(ProcessAlive),
    }
}

/// Whether the device is currently owned by a daemon.
pub fn is_held(path: &Path, liveness: &dyn Liveness) -> Result<bool, GuardError> {
    Ok(MarkerInfo::read(path)?.is_some_and(|marker| liveness.is_alive(&marker)))
}

/// Ownership of the instance marker. Released on drop.
#[derive(Debug)]
pub struct InstanceGuard {
    path: PathBuf,
    pid: u32,
    released: bool,
}

impl InstanceGuard {
    /// Create the marker for the current process.
    ///
    /// Fails with [`GuardError::AlreadyRunning`] if a live marker exists. A
    /// stale marker is removed and creation retried once.
    pub fn acquire(path: &Path, liveness: &dyn Liveness) -> Result<Self, GuardError> {
        let pid = std::process::id();

        for attempt in 0..2 {
            match Self::create(path, pid) {
                Ok(()) => {
                    info!(marker = %path.display(), pid, "instance marker acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                        pid,
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let existing = MarkerInfo::read(path)?;
                    match existing {
                        // Removed between our create and read; try again.
                        None => continue,
                        Some(marker) if attempt == 0 && !liveness.is_alive(&marker) => {
                            warn!(
                                marker = %path.display(),
                                pid = ?marker.pid,
                                "removing stale instance marker"
                            );
                            remove_marker(path)?;
                        }
                        Some(marker) => {
                            return Err(GuardError::AlreadyRunning {
                                marker: path.to_path_buf(),
                                pid: marker.pid,
                            })
                        }
                    }
                }
                Err(source) => {
                    return Err(GuardError::Io {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }
        }

        Err(GuardError::AlreadyRunning {
            marker: path.to_path_buf(),
            pid: None,
        })
    }

    fn create(path: &Path, pid: u32) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // create_new fails atomically if another process won the race.
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(file, "{pid}")?;
        file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Remove the marker now instead of at drop.
    pub fn release(mut self) -> Result<(), GuardError> {
        self.released = true;
        self.remove_if_owned()
    }

    fn remove_if_owned(&self) -> Result<(), GuardError> {
        // Leave a marker that another process has since taken over.
        match MarkerInfo::read(&self.path)? {
            Some(marker) if marker.pid == Some(self.pid) => {
                remove_marker(&self.path)?;
                info!(marker = %self.path.display(), "instance marker released");
                Ok(())
            }
            Some(_) => {
                warn!(marker = %self.path.display(), "marker taken over by another process");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.remove_if_owned() {
            warn!(error = %e, "could not release instance marker");
        }
    }
}

/// Delete a marker, treating an already-missing file as success.
pub fn remove_marker(path: &Path) -> Result<(), GuardError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(GuardError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
