use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur on a device link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The device address could not be opened.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },

    /// Failed to bind a listening socket for an emulated device.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the link.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serial driver reported an error.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The deadline passed before the requested bytes arrived.
    #[error("timed out after {timeout:?} ({received} of {expected} bytes received)")]
    Timeout {
        expected: usize,
        received: usize,
        timeout: Duration,
    },

    /// The link was closed locally or by the remote end.
    #[error("link closed")]
    Closed,

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },
}

impl TransportError {
    /// True for deadline expiry, the one failure a caller can usually retry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
