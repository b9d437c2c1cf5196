//! Host-side client for the HARP device protocol.
//!
//! harpio talks to HARP acquisition and control devices over a serial link:
//! it frames requests, matches replies, and wraps the common register bank
//! in a typed session API.
//!
//! # Crate Structure
//!
//! - [`transport`] - Byte-stream links (serial ports, Unix-socket virtual links)
//! - [`frame`] - Wire codec, typed payloads and request builders
//! - [`device`] - Device sessions, register maps and the device emulator

/// Re-export transport types.
pub mod transport {
    pub use harpio_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use harpio_frame::*;
}

/// Re-export device types.
pub mod device {
    pub use harpio_device::*;
}

pub use harpio_device::{Device, DeviceConfig, DeviceError, DeviceMode};
