//! Byte-stream links to HARP devices.
//!
//! This is the lowest layer of harpio. It knows nothing about frames:
//! - serial ports (USB CDC or UART bridges) via [`SerialTransport`]
//! - Unix-domain-socket virtual links via [`UdsTransport`]
//! - a scripted in-memory link for tests via [`ScriptedTransport`]
//!
//! Everything above talks to the [`Transport`] trait.

pub mod error;
pub mod mock;
pub mod serial;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use mock::ScriptedTransport;
pub use serial::{SerialConfig, SerialTransport};
pub use traits::{CancelFlag, Interrupter, Transport};

#[cfg(unix)]
pub use uds::{UdsTransport, UnixDomainSocket};

/// Address prefix selecting a Unix-domain-socket link.
pub const UNIX_PREFIX: &str = "unix:";

/// Open a link by address.
///
/// `unix:<path>` connects to a socket (device emulators, bridges); any other
/// address is opened as a serial port.
pub fn open(address: &str, serial: &SerialConfig) -> Result<Box<dyn Transport>> {
    if let Some(path) = address.strip_prefix(UNIX_PREFIX) {
        #[cfg(unix)]
        {
            return Ok(Box::new(UdsTransport::connect(path)?));
        }
        #[cfg(not(unix))]
        {
            return Err(TransportError::Connect {
                address: path.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "unix socket links require a unix platform",
                ),
            });
        }
    }
    Ok(Box::new(SerialTransport::open(address, serial)?))
}
