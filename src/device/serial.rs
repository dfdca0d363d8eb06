//! Serial-port line reader.

use crate::config::ConnectionConfig;
use crate::device::{DeviceError, LineSource};
use serialport::SerialPort;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use tracing::debug;

/// Reads newline-terminated lines from the sensor.
///
/// Generic over the byte source so it can run against in-memory readers;
/// [`DeviceReader::open`] builds one over a real serial port. Bytes of a line
/// interrupted by a timeout are kept and completed by the next call.
pub struct DeviceReader<R: Read> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl DeviceReader<Box<dyn SerialPort>> {
    /// Open the serial port for exclusive use.
    pub fn open(config: &ConnectionConfig) -> Result<Self, DeviceError> {
        debug!(port = %config.port, baud = config.baudrate, "connecting");

        let port = serialport::new(&config.port, config.baudrate)
            .timeout(config.read_timeout())
            .open()
            .map_err(|e| DeviceError::Unavailable {
                port: config.port.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self::new(port))
    }
}

impl<R: Read> DeviceReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            pending: Vec::new(),
        }
    }

    fn take_line(&mut self) -> String {
        let bytes = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&bytes)
            .trim_end_matches(['\r', '\n'])
            .to_string()
    }
}

impl<R: Read> LineSource for DeviceReader<R> {
    fn next_line(&mut self) -> Result<Option<String>, DeviceError> {
        match self.reader.read_until(b'\n', &mut self.pending) {
            Ok(0) => {
                if self.pending.is_empty() {
                    Err(DeviceError::Disconnected)
                } else {
                    Ok(Some(self.take_line()))
                }
            }
            // A line without terminator only comes back at end of stream.
            Ok(_) => Ok(Some(self.take_line())),
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                Ok(None)
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(DeviceError::Io(e)),
        }
    }
}

/// Lines in arrival order. Timeouts are skipped; the sequence ends at
/// disconnect.
impl<R: Read> Iterator for DeviceReader<R> {
    type Item = Result<String, DeviceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.next_line() {
                Ok(Some(line)) => return Some(Ok(line)),
                Ok(None) => continue,
                Err(DeviceError::Disconnected) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
