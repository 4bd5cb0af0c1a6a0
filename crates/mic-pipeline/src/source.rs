//! Byte sources.
//!
//! The driver only sees [`ByteStreamReader`] (a timed, possibly short read) and [`Connector`]
//! (something that can hand out a fresh reader). Closing a connection means dropping its reader.
//! The serial implementation sits on top of `serialport`.

use std::io::{self, Read};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort};

use crate::config::SerialConfig;
use crate::error::ConnectError;

/// Largest single read issued while collecting alignment data.
const COLLECT_BLOCK_BYTES: usize = 4096;
/// Per-read wait while collecting, so the overall deadline is honored closely.
const COLLECT_POLL: Duration = Duration::from_millis(100);

/// A blocking source of raw bytes.
pub trait ByteStreamReader {
    /// Fill up to `buf.len()` bytes, giving up once `timeout` elapses.
    ///
    /// Returns the number of bytes read; `0` means nothing arrived in time.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Drop everything the driver has buffered but we have not read yet.
    fn reset_input_buffer(&mut self) -> io::Result<()>;
}

/// Opens byte sources. Called once at startup and again on every reconnect.
pub trait Connector {
    type Reader: ByteStreamReader;

    fn connect(&mut self) -> Result<Self::Reader, ConnectError>;

    /// Human-readable name of the endpoint, for logs.
    fn describe(&self) -> String;
}

/// Opens the microphone's serial port.
#[derive(Clone, Debug)]
pub struct SerialConnector {
    config: SerialConfig,
}

impl SerialConnector {
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }
}

impl Connector for SerialConnector {
    type Reader = SerialReader;

    fn connect(&mut self) -> Result<SerialReader, ConnectError> {
        let port = serialport::new(&self.config.port, self.config.baud_rate)
            .timeout(self.config.read_timeout)
            .open()
            .map_err(|e| classify_open_error(&self.config.port, &e))?;
        tracing::info!(
            port = %self.config.port,
            baud = self.config.baud_rate,
            "serial port opened"
        );
        Ok(SerialReader {
            port,
            name: self.config.port.clone(),
        })
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.config.port, self.config.baud_rate)
    }
}

/// An open serial port. Dropping it closes the port.
pub struct SerialReader {
    port: Box<dyn SerialPort>,
    name: String,
}

impl ByteStreamReader for SerialReader {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut filled = 0;
        while filled < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.port.set_timeout(remaining).map_err(io::Error::from)?;
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn reset_input_buffer(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

impl Drop for SerialReader {
    fn drop(&mut self) {
        tracing::debug!(port = %self.name, "serial port closed");
    }
}

/// Map a `serialport` open failure onto the causes the operator can act on.
pub(crate) fn classify_open_error(port: &str, err: &serialport::Error) -> ConnectError {
    let port = port.to_string();
    match err.kind() {
        serialport::ErrorKind::NoDevice | serialport::ErrorKind::Io(io::ErrorKind::NotFound) => {
            ConnectError::DeviceAbsent { port }
        }
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            ConnectError::PermissionDenied { port }
        }
        serialport::ErrorKind::Io(io::ErrorKind::ResourceBusy) => ConnectError::DeviceBusy { port },
        // POSIX backends report EBUSY as an unknown error with the errno text.
        _ if err.description.to_lowercase().contains("busy") => ConnectError::DeviceBusy { port },
        _ => ConnectError::Other {
            port,
            message: err.description.clone(),
        },
    }
}

/// Collect about `want` bytes, giving up after `max_wait`.
pub fn collect_bytes<R: ByteStreamReader + ?Sized>(
    reader: &mut R,
    want: usize,
    max_wait: Duration,
) -> io::Result<Vec<u8>> {
    let deadline = Instant::now() + max_wait;
    let mut out = Vec::with_capacity(want);
    let mut block = vec![0u8; COLLECT_BLOCK_BYTES];
    while out.len() < want {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let n = (want - out.len()).min(block.len());
        let got = reader.read(&mut block[..n], remaining.min(COLLECT_POLL))?;
        out.extend_from_slice(&block[..got]);
    }
    Ok(out)
}

/// Consume exactly `count` bytes (or fewer if the source dries up before `timeout`).
pub fn discard<R: ByteStreamReader + ?Sized>(
    reader: &mut R,
    count: usize,
    timeout: Duration,
) -> io::Result<usize> {
    let mut scratch = [0u8; 2];
    let mut dropped = 0;
    while dropped < count {
        let n = (count - dropped).min(scratch.len());
        let got = reader.read(&mut scratch[..n], timeout)?;
        if got == 0 {
            break;
        }
        dropped += got;
    }
    Ok(dropped)
}
