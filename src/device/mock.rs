//! Scripted line source.
//!
//! Replays a fixed sequence of lines without any hardware. Used by the test
//! suites and for dry runs of the acquisition loop.

use crate::device::{DeviceError, LineSource};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One scripted read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedRead {
    Line(String),
    /// A read that times out without data
    Timeout,
    /// A read that fails with an I/O error of this kind
    Failure(ErrorKind),
}

/// A source that replays scripted reads, then reports a disconnect.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    reads: VecDeque<ScriptedRead>,
    /// Raised once the script is exhausted, if set
    stop_when_drained: Option<Arc<AtomicBool>>,
}

impl ScriptedSource {
    pub fn new(reads: impl IntoIterator<Item = ScriptedRead>) -> Self {
        Self {
            reads: reads.into_iter().collect(),
            stop_when_drained: None,
        }
    }

    /// Build a source from plain lines.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(lines.into_iter().map(|l| ScriptedRead::Line(l.into())))
    }

    /// Instead of disconnecting at the end of the script, raise `flag` and
    /// keep timing out.
    pub fn stop_when_drained(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop_when_drained = Some(flag);
        self
    }

    /// Number of reads left in the script.
    pub fn remaining(&self) -> usize {
        self.reads.len()
    }
}

impl LineSource for ScriptedSource {
    fn next_line(&mut self) -> Result<Option<String>, DeviceError> {
        match self.reads.pop_front() {
            Some(ScriptedRead::Line(line)) => Ok(Some(line)),
            Some(ScriptedRead::Timeout) => Ok(None),
            Some(ScriptedRead::Failure(kind)) => Err(DeviceError::Io(kind.into())),
            None => match &self.stop_when_drained {
                Some(flag) => {
                    flag.store(true, Ordering::SeqCst);
                    Ok(None)
                }
                None => Err(DeviceError::Disconnected),
            },
        }
    }
}
