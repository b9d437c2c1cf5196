//! Deterministic in-memory transport for exercising protocol layers
//! without hardware.
//!
//! ```
//! use std::time::Duration;
//! use harpio_transport::{ScriptedTransport, Transport};
//!
//! let mut link = ScriptedTransport::new();
//! link.expect(&[0x01, 0x04, 0x0A, 0xFF, 0x01, 0x0F], &[0xAA]);
//! link.write_all(&[0x01, 0x04, 0x0A, 0xFF, 0x01, 0x0F]).unwrap();
//! let mut buf = [0u8; 1];
//! link.read_exact(&mut buf, Duration::from_millis(10)).unwrap();
//! assert_eq!(buf, [0xAA]);
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use crate::error::{Result, TransportError};
use crate::traits::Transport;

#[derive(Debug, Clone)]
struct Expectation {
    request: Vec<u8>,
    response: Vec<u8>,
}

/// Scripted transport: each write must match the next queued request, and
/// queues the paired response for reading.
///
/// Reads that run out of bytes fail with [`TransportError::Timeout`]
/// immediately instead of waiting out the deadline.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    expectations: VecDeque<Expectation>,
    rx: VecDeque<u8>,
    sent_log: Vec<Vec<u8>>,
    closed: bool,
    strict: bool,
}

impl ScriptedTransport {
    /// Create an open transport that checks every write against the script.
    pub fn new() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    /// Create an open transport that accepts any write without a script.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Queue an expected request and the bytes the "device" answers with.
    ///
    /// An empty `response` models a device that stays silent.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Make bytes readable right now, as if they arrived unsolicited.
    pub fn inject(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    /// Every buffer passed to `write_all`, in order.
    pub fn sent_data(&self) -> &[Vec<u8>] {
        &self.sent_log
    }

    /// Expectations not yet consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }
}

impl Transport for ScriptedTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.sent_log.push(bytes.to_vec());

        if !self.strict && self.expectations.is_empty() {
            return Ok(());
        }

        let Some(expectation) = self.expectations.pop_front() else {
            return Err(TransportError::Io(std::io::Error::other(
                "no more expectations in scripted transport",
            )));
        };
        if bytes != expectation.request.as_slice() {
            return Err(TransportError::Io(std::io::Error::other(format!(
                "unexpected write: expected {:02X?}, got {:02X?}",
                expectation.request, bytes
            ))));
        }
        self.rx.extend(expectation.response);
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let available = self.rx.len().min(buf.len());
        for slot in buf.iter_mut().take(available) {
            *slot = self.rx.pop_front().unwrap_or_default();
        }
        if available < buf.len() {
            return Err(TransportError::Timeout {
                expected: buf.len(),
                received: available,
                timeout,
            });
        }
        Ok(())
    }

    fn bytes_pending(&mut self) -> Result<usize> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        Ok(self.rx.len())
    }

    fn discard_input(&mut self) -> Result<usize> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let discarded = self.rx.len();
        self.rx.clear();
        Ok(discarded)
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.rx.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}
