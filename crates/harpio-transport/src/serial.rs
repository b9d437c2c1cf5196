//! Serial port links.
//!
//! HARP devices enumerate as USB CDC virtual COM ports (`/dev/ttyACM0`,
//! `COM95`, ...). The baud rate is nominal for CDC but real UART bridges
//! honour it, so it stays configurable.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{fill_until_cancelled, is_disconnect, CancelFlag, Interrupter, Transport};

/// Longest single blocking wait in `read_exact`, which bounds how long an
/// abort from another thread takes to land.
const READ_SLICE: Duration = Duration::from_millis(10);

/// Serial line settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Baud rate. HARP devices run at 1 Mbaud.
    pub baud_rate: u32,
    /// Assert DTR after opening. TinyUSB CDC devices only transmit once the
    /// host raises DTR.
    pub assert_dtr: bool,
    /// Timeout applied to writes.
    pub write_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 1_000_000,
            assert_dtr: true,
            write_timeout: Duration::from_secs(1),
        }
    }
}

/// Serial port link, 8N1 without flow control.
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    name: String,
    config: SerialConfig,
    cancel: CancelFlag,
}

impl SerialTransport {
    /// Open the named port (`/dev/ttyACM0`, `COM95`, ...).
    pub fn open(name: &str, config: &SerialConfig) -> Result<Self> {
        let mut port = serialport::new(name, config.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .timeout(config.write_timeout)
            .open()
            .map_err(|err| TransportError::Connect {
                address: name.to_string(),
                source: err.into(),
            })?;

        if config.assert_dtr {
            port.write_data_terminal_ready(true)?;
        }
        port.clear(ClearBuffer::All)?;

        debug!(port = name, baud = config.baud_rate, "opened serial port");
        Ok(Self {
            port: Some(port),
            name: name.to_string(),
            config: config.clone(),
            cancel: CancelFlag::new(),
        })
    }

    /// The line settings this port was opened with.
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        if self.cancel.is_raised() && self.port.take().is_some() {
            debug!(port = %self.name, "serial port aborted");
        }
        self.port.as_mut().ok_or(TransportError::Closed)
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let write_timeout = self.config.write_timeout;
        let port = self.port()?;
        port.set_timeout(write_timeout)?;
        port.write_all(bytes)
            .and_then(|()| port.flush())
            .map_err(|err| match err.kind() {
                ErrorKind::TimedOut => TransportError::Timeout {
                    expected: bytes.len(),
                    received: 0,
                    timeout: write_timeout,
                },
                _ if is_disconnect(&err) => TransportError::Closed,
                _ => TransportError::Io(err),
            })
    }

    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<()> {
        let cancel = self.cancel.clone();
        let port = self.port()?;
        let result = fill_until_cancelled(buf, timeout, &cancel, READ_SLICE, |dst, wait| {
            port.set_timeout(wait)?;
            port.read(dst)
        });
        if cancel.is_raised() {
            self.port = None;
        }
        result
    }

    fn bytes_pending(&mut self) -> Result<usize> {
        Ok(self.port()?.bytes_to_read()? as usize)
    }

    fn discard_input(&mut self) -> Result<usize> {
        let port = self.port()?;
        let pending = port.bytes_to_read()? as usize;
        port.clear(ClearBuffer::Input)?;
        Ok(pending)
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            debug!(port = %self.name, "closed serial port");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn describe(&self) -> String {
        self.name.clone()
    }

    fn interrupter(&self) -> Option<Interrupter> {
        self.port.as_ref().map(|_| self.cancel.interrupter())
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("name", &self.name)
            .field("open", &self.port.is_some())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_harp_link() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 1_000_000);
        assert!(config.assert_dtr);
    }

    #[test]
    fn open_missing_port_is_connect_error() {
        let result = SerialTransport::open("/dev/harpio-no-such-port", &SerialConfig::default());
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }
}
