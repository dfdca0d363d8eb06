//! Bounded writer pool.

use crate::core::record::{output_path, StationMetadata, TraceRecord};
use crate::core::windowing::WindowSnapshot;
use crate::persistence::codec::WaveformCodec;
use crate::persistence::PersistenceError;
use crate::stats::SharedStats;
use crossbeam_channel::{bounded, Sender, TrySendError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Sizing of the writer pool.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Root directory for stored windows
    pub root: PathBuf,
    /// Number of writer threads
    pub workers: usize,
    /// Windows that may wait for a free writer
    pub queue_capacity: usize,
}

struct Job {
    snapshot: WindowSnapshot,
    metadata: Arc<StationMetadata>,
}

/// Hands completed windows to background writers without blocking.
///
/// Writes may finish in any order. Dropping the dispatcher (or calling
/// [`PersistenceDispatcher::shutdown`]) lets every queued write finish.
pub struct PersistenceDispatcher {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    stats: SharedStats,
}

impl PersistenceDispatcher {
    /// Start the writer threads.
    pub fn new(
        config: DispatcherConfig,
        codec: Arc<dyn WaveformCodec>,
        stats: SharedStats,
    ) -> Result<Self, PersistenceError> {
        let (sender, receiver) = bounded::<Job>(config.queue_capacity.max(1));
        let root = Arc::new(config.root);

        let mut workers = Vec::with_capacity(config.workers.max(1));
        for id in 0..config.workers.max(1) {
            let receiver = receiver.clone();
            let root = root.clone();
            let codec = codec.clone();
            let stats = stats.clone();

            let handle = thread::Builder::new()
                .name(format!("persist-{id}"))
                .spawn(move || {
                    for job in receiver.iter() {
                        let result =
                            persist_window(&root, codec.as_ref(), &job.metadata, &job.snapshot);
                        match result {
                            Ok(_) => stats.record_file_written(),
                            Err(e) => {
                                stats.record_write_failure();
                                error!(start = %job.snapshot.start, error = %e, "window not saved");
                            }
                        }
                    }
                    debug!(worker = id, "writer stopped");
                })
                .map_err(PersistenceError::Spawn)?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
            stats,
        })
    }

    /// Queue a window for writing. Returns `false` if it was rejected.
    pub fn dispatch(&self, snapshot: WindowSnapshot, metadata: Arc<StationMetadata>) -> bool {
        let Some(sender) = &self.sender else {
            warn!(start = %snapshot.start, "dispatcher stopped, window discarded");
            self.stats.record_dispatch_rejected();
            return false;
        };

        match sender.try_send(Job { snapshot, metadata }) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                warn!(
                    start = %job.snapshot.start,
                    samples = job.snapshot.len(),
                    "persistence queue full, window discarded"
                );
                self.stats.record_dispatch_rejected();
                false
            }
            Err(TrySendError::Disconnected(job)) => {
                error!(start = %job.snapshot.start, "all writers gone, window discarded");
                self.stats.record_dispatch_rejected();
                false
            }
        }
    }

    /// Number of windows waiting for a writer.
    pub fn pending(&self) -> usize {
        self.sender.as_ref().map_or(0, |s| s.len())
    }

    /// Stop accepting windows and wait for queued writes to finish.
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("writer thread panicked");
            }
        }
    }
}

impl Drop for PersistenceDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Correct one window and write it through `codec`.
///
/// Returns the written path.
pub fn persist_window(
    root: &Path,
    codec: &dyn WaveformCodec,
    metadata: &StationMetadata,
    snapshot: &WindowSnapshot,
) -> Result<PathBuf, PersistenceError> {
    let record = TraceRecord::from_snapshot(metadata, snapshot);
    let path = output_path(root, metadata, snapshot.start, codec.extension());

    if let Some(dir) = path.parent() {
        // create_dir_all treats an existing directory as success, including
        // one created concurrently by another writer.
        std::fs::create_dir_all(dir).map_err(|source| PersistenceError::CreateDirectory {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    info!(
        samples = record.npts,
        correction = record.offset_correction,
        path = %path.display(),
        "saving window"
    );

    codec
        .write(&record, &path)
        .map_err(|source| PersistenceError::Codec {
            path: path.clone(),
            source,
        })?;

    Ok(path)
}
