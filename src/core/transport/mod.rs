//! Transport layer: the serial side of the gateway
//!
//! The physical device is abstracted behind [`DeviceLink`] so the
//! correlation worker can be exercised against an in-memory device in tests.
//! [`SerialTransport`] owns the worker thread and the pending-write FIFO.

mod serial;

pub use serial::{
    list_ports, DrainTiming, SerialConfig, SerialFlowControl, SerialParity, SerialPortLink,
    SerialTransport,
};

use std::io;
use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

/// A byte link to the physical device.
///
/// Exactly one worker thread owns the link; no other component performs raw
/// reads or writes on it. A read that finds no data must return
/// `ErrorKind::TimedOut` or `ErrorKind::WouldBlock` within the link's own
/// read timeout rather than blocking indefinitely, so the worker's drain
/// discipline stays responsive.
pub trait DeviceLink: Send {
    /// Write the whole buffer to the device.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Read whatever bytes are available into `buf`.
    ///
    /// `Ok(0)` means the link is gone.
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}
