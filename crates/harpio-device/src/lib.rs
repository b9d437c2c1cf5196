//! Sessions with HARP devices.
//!
//! This is the "just works" layer. Open a [`Device`], read and write
//! registers by address or by name, switch operating modes and dump the
//! register bank. Requests are correlated with their replies by the
//! [`Correlator`]; event frames the device streams in between are skipped.
//!
//! ```no_run
//! use harpio_device::{Device, DeviceConfig, DeviceMode};
//!
//! let device = Device::open(DeviceConfig::new("/dev/ttyACM0"))?;
//! println!("{}", device.info()?);
//! device.set_mode(DeviceMode::Active)?;
//! # Ok::<(), harpio_device::DeviceError>(())
//! ```
//!
//! The [`emulator`] module models the common register bank in software for
//! tests and for hardware-free development.

pub mod comm_log;
pub mod config;
pub mod correlator;
pub mod emulator;
pub mod error;
pub mod mode;
pub mod register_map;
pub mod report;
pub mod retry;
pub mod session;

pub use comm_log::{CommLog, Direction};
pub use config::DeviceConfig;
pub use correlator::{Correlator, Reply, DEFAULT_QUIET_INTERVAL, DEFAULT_TIMEOUT};
pub use emulator::{Emulator, Faults, Identity, Output};
pub use error::{DeviceError, Result};
pub use mode::{DeviceMode, DeviceState, OperationCtrl, ResetFlags};
pub use register_map::{Access, RegisterMap, RegisterSpec};
pub use report::{
    DeviceInfo, FailureKind, ReadOutcome, RegisterDump, RegisterFailure, RegisterReadout,
    RegisterValue,
};
pub use retry::RetryPolicy;
pub use session::Device;

#[cfg(unix)]
pub use emulator::{serve_stream, EmulatorListener};
