//! Background persistence of completed windows.
//!
//! Windows are handed to a fixed pool of writer threads through a bounded
//! queue. Writers compute the offset correction, derive the output path and
//! call the waveform codec; failures are logged and never reach the
//! acquisition loop.

pub mod codec;
pub mod dispatcher;

use std::path::PathBuf;
use thiserror::Error;

pub use codec::{CodecError, JsonTraceCodec, WaveformCodec};
pub use dispatcher::{persist_window, DispatcherConfig, PersistenceDispatcher};

/// Errors from a single persistence task.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("cannot create {}: {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write {}: {source}", path.display())]
    Codec {
        path: PathBuf,
        #[source]
        source: CodecError,
    },
    #[error("cannot start writer thread: {0}")]
    Spawn(#[source] std::io::Error),
}
