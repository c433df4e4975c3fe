//! Serial port infrastructure.
//!
//! # Sub-modules
//!
//! - **`session`** – One open connection to a board: sends a command
//!   envelope, accumulates the reply bytes and extracts the reply frame on a
//!   deadline.
//!
//! - **`mock`** – In-memory links and an opener with scripted per-port
//!   behaviour, used by session, listener and discovery tests.
//!
//! # Testability
//!
//! Everything above this module talks to a [`SerialLink`] obtained from a
//! [`PortOpener`].  [`SystemPortOpener`] hands out real ports backed by the
//! `serialport` crate; tests swap in [`mock::MockPortOpener`].

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort, SerialPortType};
use thiserror::Error;
use tracing::debug;

pub mod mock;
pub mod session;

/// Baud rate every OpenIris board uses for its console.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Error type for serial transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The port could not be opened (missing, busy, or permission denied).
    #[error("failed to open serial port {port}: {source}")]
    Connection {
        port: String,
        #[source]
        source: serialport::Error,
    },

    /// Reading from or writing to an open port failed.
    #[error("serial I/O error: {0}")]
    Io(#[from] io::Error),

    /// The operating system could not list serial ports.
    #[error("failed to enumerate serial ports: {0}")]
    Enumeration(#[source] serialport::Error),
}

// ── Link abstraction ──────────────────────────────────────────────────────────

/// A byte pipe to one device.
///
/// Reads must not block for longer than the read timeout the link was opened
/// with.
pub trait SerialLink: Read + Write + Send {
    /// Number of bytes that can be read without blocking.
    fn bytes_to_read(&self) -> io::Result<u32>;

    /// Discards any bytes received but not yet read.
    fn clear_input(&self) -> io::Result<()>;
}

/// Opens serial links by path.
pub trait PortOpener: Send + Sync {
    /// Opens `path` with the given per-read timeout.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connection`] when the port cannot be opened.
    fn open(&self, path: &str, read_timeout: Duration) -> Result<Box<dyn SerialLink>, TransportError>;
}

/// A port opened through the operating system.
pub struct NativeLink {
    port: Box<dyn SerialPort>,
}

impl Read for NativeLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for NativeLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl SerialLink for NativeLink {
    fn bytes_to_read(&self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(io::Error::from)
    }

    fn clear_input(&self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// Opens real serial ports at a fixed baud rate.
#[derive(Debug, Clone)]
pub struct SystemPortOpener {
    baud_rate: u32,
}

impl SystemPortOpener {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl Default for SystemPortOpener {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

impl PortOpener for SystemPortOpener {
    fn open(&self, path: &str, read_timeout: Duration) -> Result<Box<dyn SerialLink>, TransportError> {
        let port = serialport::new(path, self.baud_rate)
            .timeout(read_timeout)
            .open()
            .map_err(|source| TransportError::Connection {
                port: path.to_string(),
                source,
            })?;
        debug!("opened {path} at {} baud", self.baud_rate);
        Ok(Box::new(NativeLink { port }))
    }
}

// ── Enumeration ───────────────────────────────────────────────────────────────

/// A port that may have a board attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePort {
    pub path: String,
    /// USB product and manufacturer strings, when the OS reports them.
    pub description: String,
}

impl CandidatePort {
    pub fn new(path: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            description: description.into(),
        }
    }
}

/// Lists the serial ports currently present.
///
/// # Errors
///
/// Returns [`TransportError::Enumeration`] if the OS query fails.
pub fn enumerate_ports() -> Result<Vec<CandidatePort>, TransportError> {
    let ports = serialport::available_ports().map_err(TransportError::Enumeration)?;
    Ok(ports
        .into_iter()
        .map(|info| {
            let description = match &info.port_type {
                SerialPortType::UsbPort(usb) => [usb.product.as_deref(), usb.manufacturer.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" "),
                SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                SerialPortType::PciPort | SerialPortType::Unknown => String::new(),
            };
            CandidatePort::new(info.port_name, description)
        })
        .collect())
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
pub fn is_timeout_error(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Reads whatever the link has buffered, without waiting for more.
///
/// A read timeout is reported as an empty result.
pub fn read_waiting(link: &mut dyn SerialLink) -> io::Result<Vec<u8>> {
    let waiting = link.bytes_to_read()? as usize;
    if waiting == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; waiting];
    match link.read(&mut buf) {
        Ok(n) => {
            buf.truncate(n);
            Ok(buf)
        }
        Err(e) if is_timeout_error(&e) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::serial::mock::{MockScript, MockSerialLink};

    #[test]
    fn test_is_timeout_error_recognises_timed_out() {
        // Arrange
        let e = io::Error::new(io::ErrorKind::TimedOut, "timed out");

        // Act / Assert
        assert!(is_timeout_error(&e));
    }

    #[test]
    fn test_is_timeout_error_recognises_would_block() {
        let e = io::Error::new(io::ErrorKind::WouldBlock, "would block");
        assert!(is_timeout_error(&e));
    }

    #[test]
    fn test_is_timeout_error_returns_false_for_other_errors() {
        let e = io::Error::new(io::ErrorKind::BrokenPipe, "unplugged");
        assert!(!is_timeout_error(&e));
    }

    #[test]
    fn test_read_waiting_returns_empty_when_nothing_buffered() {
        let (mut link, _handle) = MockSerialLink::new(MockScript::new());
        assert!(read_waiting(&mut link).expect("read").is_empty());
    }

    #[test]
    fn test_read_waiting_drains_buffered_bytes() {
        // Arrange
        let (mut link, _handle) =
            MockSerialLink::new(MockScript::new().emit_after(Duration::ZERO, "hello\n"));

        // Act
        let first = read_waiting(&mut link).expect("read");
        let second = read_waiting(&mut link).expect("read");

        // Assert
        assert_eq!(first, b"hello\n");
        assert!(second.is_empty());
    }

    #[test]
    fn test_candidate_port_keeps_description() {
        let port = CandidatePort::new("/dev/ttyUSB0", "CP2102 USB to UART Bridge Controller Silicon Labs");
        assert_eq!(port.path, "/dev/ttyUSB0");
        assert!(port.description.contains("CP2102"));
    }
}
