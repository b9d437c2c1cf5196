//! Half-duplex request/reply correlation.
//!
//! One request is in flight at a time: [`Correlator::send`] takes `&mut
//! self`, writes the request and blocks until the matching reply frame
//! arrives or the deadline passes. There is no request id on the wire, so a
//! failed exchange can leave reply bytes in the pipe. The correlator then
//! refuses further requests with [`DeviceError::ProtocolDesync`] until
//! [`Correlator::resync`] has drained the link.
//!
//! Received bytes go through a small buffer and leave it one whole frame at
//! a time. Unsolicited traffic found before a request is consumed frame by
//! frame; a frame that has only partly arrived stays buffered and is
//! completed by the next read.

use std::time::{Duration, Instant};

use bytes::BytesMut;
use harpio_frame::{decode_frame, frame_len, Frame, MessageType, MAX_FRAME_LEN, PREFIX_LEN};
use harpio_transport::{Transport, TransportError};
use tracing::{debug, trace, warn};

use crate::comm_log::{CommLog, Direction};
use crate::error::{DeviceError, Result};

/// Default per-request reply deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default silence that ends a resync drain.
pub const DEFAULT_QUIET_INTERVAL: Duration = Duration::from_millis(20);

const MAX_RESYNC_ROUNDS: usize = 64;
const MAX_STRAY_FRAMES: usize = 64;
const STRAY_READ_TIMEOUT: Duration = Duration::from_millis(5);

/// A decoded reply and its local timing.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub frame: Frame,
    /// Monotonic instant just before the request was written, so the round
    /// trip includes transmit time.
    pub sent_at: Instant,
    /// Monotonic instant the last reply byte was read.
    pub received_at: Instant,
}

impl Reply {
    pub fn round_trip(&self) -> Duration {
        self.received_at.saturating_duration_since(self.sent_at)
    }
}

/// Sends one frame at a time over a [`Transport`] and pairs it with its reply.
#[derive(Debug)]
pub struct Correlator<T> {
    transport: T,
    timeout: Duration,
    quiet_interval: Duration,
    desync: Option<String>,
    comm_log: Option<CommLog>,
    events_skipped: u64,
    rx: BytesMut,
}

impl<T: Transport> Correlator<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            timeout: DEFAULT_TIMEOUT,
            quiet_interval: DEFAULT_QUIET_INTERVAL,
            desync: None,
            comm_log: None,
            events_skipped: 0,
            rx: BytesMut::with_capacity(MAX_FRAME_LEN),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_quiet_interval(mut self, quiet_interval: Duration) -> Self {
        self.quiet_interval = quiet_interval;
        self
    }

    pub fn with_comm_log(mut self, log: CommLog) -> Self {
        self.comm_log = Some(log);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Whether a failed exchange has left the link unusable.
    pub fn is_desynchronized(&self) -> bool {
        self.desync.is_some()
    }

    /// Event frames dropped while waiting for replies.
    pub fn events_skipped(&self) -> u64 {
        self.events_skipped
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Write `request` and wait for the frame that answers it.
    ///
    /// Event frames that arrive first are skipped. ReadError/WriteError
    /// replies are returned as replies; interpreting them is up to the
    /// caller. Checksum, format and timeout failures are returned unchanged
    /// and mark the link desynchronised.
    pub fn send(&mut self, request: &Frame) -> Result<Reply> {
        if !self.transport.is_open() {
            return Err(DeviceError::NotConnected);
        }
        if let Some(reason) = &self.desync {
            return Err(DeviceError::ProtocolDesync {
                reason: reason.clone(),
            });
        }

        self.drain_stray()?;

        let wire = request.encode()?;
        trace!(bytes = ?wire.as_ref(), "tx");
        self.log(Direction::Sent, &wire);
        let sent_at = Instant::now();
        self.transport.write_all(&wire)?;
        let deadline = Instant::now() + self.timeout;

        loop {
            let (frame, received_at) = match self.receive(deadline) {
                Ok(received) => received,
                Err(err) => {
                    if !matches!(err, DeviceError::Transport(TransportError::Closed)) {
                        self.mark_desync(format!("{request} failed: {err}"));
                    }
                    return Err(err);
                }
            };

            if frame.message_type == MessageType::Event {
                self.events_skipped += 1;
                trace!(%frame, "skipping event while awaiting reply");
                continue;
            }

            if !frame.answers(request) {
                let err = DeviceError::UnexpectedReply {
                    request: request.to_string(),
                    reply: frame.to_string(),
                };
                self.mark_desync(err.to_string());
                return Err(err);
            }

            let reply = Reply {
                frame,
                sent_at,
                received_at,
            };
            debug!(
                request = %request,
                reply = %reply.frame,
                round_trip_us = reply.round_trip().as_micros() as u64,
                "exchange complete"
            );
            return Ok(reply);
        }
    }

    /// Drain the link until it stays silent for the quiet interval.
    ///
    /// Clears the desynchronised state and returns the number of bytes
    /// dropped. Fails with [`DeviceError::ProtocolDesync`] if the device
    /// never goes quiet.
    pub fn resync(&mut self) -> Result<usize> {
        if !self.transport.is_open() {
            return Err(DeviceError::NotConnected);
        }

        let mut drained = self.rx.len();
        self.rx.clear();
        for _ in 0..MAX_RESYNC_ROUNDS {
            drained += self.transport.discard_input()?;
            std::thread::sleep(self.quiet_interval);
            if self.transport.bytes_pending()? == 0 {
                if drained > 0 {
                    warn!(drained, link = %self.transport.describe(), "resync discarded bytes");
                } else {
                    debug!(link = %self.transport.describe(), "resync found link quiet");
                }
                self.desync = None;
                return Ok(drained);
            }
        }

        Err(DeviceError::ProtocolDesync {
            reason: format!("link not quiet after draining {drained} bytes"),
        })
    }

    /// Close the link. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.desync = None;
        self.rx.clear();
        self.transport.close()?;
        Ok(())
    }

    fn receive(&mut self, deadline: Instant) -> Result<(Frame, Instant)> {
        loop {
            if let Some(frame) = self.next_frame()? {
                return Ok((frame, Instant::now()));
            }
            let wanted = missing_bytes(&self.rx)?;
            self.fill(wanted, remaining(deadline))?;
        }
    }

    /// Consume traffic that arrived while no request was outstanding.
    ///
    /// Whole frames are dropped (events are counted). A partial frame is
    /// left buffered for `receive`. Bytes that cannot start a frame
    /// desynchronise the link.
    fn drain_stray(&mut self) -> Result<()> {
        let mut dropped = 0usize;
        loop {
            loop {
                match self.next_frame() {
                    Ok(Some(frame)) if frame.message_type == MessageType::Event => {
                        self.events_skipped += 1;
                        trace!(%frame, "skipping event before request");
                    }
                    Ok(Some(frame)) => warn!(%frame, "discarding unsolicited frame"),
                    Ok(None) => break,
                    Err(err) => {
                        self.rx.clear();
                        let discarded = self.transport.discard_input()?;
                        let reason = format!("garbage on idle link ({err}), {discarded} more bytes discarded");
                        self.mark_desync(reason.clone());
                        return Err(DeviceError::ProtocolDesync { reason });
                    }
                }
                dropped += 1;
            }

            if dropped >= MAX_STRAY_FRAMES {
                return Ok(());
            }
            let pending = self.transport.bytes_pending()?;
            if pending == 0 {
                return Ok(());
            }
            self.fill(pending.min(MAX_FRAME_LEN), STRAY_READ_TIMEOUT)
                .or_else(|err| match err {
                    TransportError::Timeout { .. } => Ok(()),
                    err => Err(err),
                })?;
        }
    }

    /// Read up to `wanted` bytes into the receive buffer.
    fn fill(&mut self, wanted: usize, timeout: Duration) -> std::result::Result<(), TransportError> {
        let mut chunk = [0u8; MAX_FRAME_LEN];
        let wanted = wanted.min(MAX_FRAME_LEN);
        let result = self.transport.read_exact(&mut chunk[..wanted], timeout);
        let received = match &result {
            Ok(()) => wanted,
            Err(TransportError::Timeout { received, .. }) => *received,
            Err(_) => 0,
        };
        self.rx.extend_from_slice(&chunk[..received]);
        result
    }

    /// Take the next complete frame off the receive buffer.
    ///
    /// On a decode failure the offending bytes are dropped from the buffer.
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.rx.len() < PREFIX_LEN {
            return Ok(None);
        }
        let total = match frame_len([self.rx[0], self.rx[1]]) {
            Ok(total) if self.rx.len() < total => return Ok(None),
            Ok(total) => total,
            Err(err) => {
                let garbage = self.rx.split();
                self.log(Direction::Discarded, &garbage);
                return Err(err.into());
            }
        };

        let raw = self.rx.split_to(total);
        trace!(bytes = ?raw.as_ref(), "rx");
        self.log(Direction::Received, &raw);
        Ok(Some(decode_frame(&raw)?))
    }

    fn mark_desync(&mut self, reason: String) {
        warn!(%reason, "link desynchronised");
        self.desync = Some(reason);
    }

    fn log(&mut self, direction: Direction, bytes: &[u8]) {
        if let Some(log) = self.comm_log.as_mut() {
            log.record(direction, bytes);
        }
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Bytes still needed before the buffered frame is complete.
fn missing_bytes(rx: &BytesMut) -> Result<usize> {
    if rx.len() < PREFIX_LEN {
        return Ok(PREFIX_LEN - rx.len());
    }
    let total = frame_len([rx[0], rx[1]])?;
    Ok(total.saturating_sub(rx.len()).max(1))
}
