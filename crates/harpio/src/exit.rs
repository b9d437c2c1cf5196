use std::fmt;
use std::io;

use harpio_device::DeviceError;
use harpio_frame::FrameError;
use harpio_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Connect { address, source } => {
            io_error(&format!("{context}: cannot open {address}"), source)
        }
        TransportError::Bind { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::Timeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        TransportError::PathTooLong { .. } => CliError::usage(format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::ConnectionClosed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn device_error(context: &str, err: DeviceError) -> CliError {
    match err {
        DeviceError::Transport(err) => transport_error(context, err),
        DeviceError::Frame(err) => frame_error(context, err),
        DeviceError::NotConnected => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        DeviceError::CommLog { source, .. } => io_error(context, source),
        DeviceError::UnknownRegister(_) | DeviceError::Config(_) => {
            CliError::usage(format!("{context}: {err}"))
        }
        DeviceError::RegisterMap(_) | DeviceError::Json(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn timeouts_map_to_timeout_code() {
        let err = DeviceError::Transport(TransportError::Timeout {
            expected: 2,
            received: 0,
            timeout: Duration::from_millis(100),
        });
        assert_eq!(device_error("read failed", err).code, TIMEOUT);
    }

    #[test]
    fn missing_port_is_transport_error() {
        let err = DeviceError::Transport(TransportError::Connect {
            address: "/dev/ttyACM9".to_string(),
            source: io::Error::from(io::ErrorKind::NotFound),
        });
        let cli = device_error("connect failed", err);
        assert_eq!(cli.code, TRANSPORT_ERROR);
        assert!(cli.message.contains("/dev/ttyACM9"));
    }

    #[test]
    fn checksum_is_data_invalid() {
        let err = DeviceError::Frame(FrameError::Checksum {
            computed: 1,
            received: 2,
        });
        assert_eq!(device_error("read failed", err).code, DATA_INVALID);
    }

    #[test]
    fn unknown_register_is_usage() {
        let err = DeviceError::UnknownRegister("LED".to_string());
        assert_eq!(device_error("read failed", err).code, USAGE);
        assert_eq!(device_error("x", DeviceError::NotConnected).code, TRANSPORT_ERROR);
    }
}
