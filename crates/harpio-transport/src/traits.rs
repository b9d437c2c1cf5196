use std::fmt;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Result, TransportError};

/// A point-to-point byte pipe to one HARP device.
///
/// The link carries no framing knowledge. Implementations must be usable
/// from one caller at a time; sharing across threads is the job of the
/// owner (the device session serialises access behind a mutex).
pub trait Transport: Send {
    /// Write every byte of `bytes`, then flush.
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Block until `buf` is full or `timeout` elapses.
    ///
    /// Fails with [`TransportError::Timeout`] when the deadline passes with
    /// fewer bytes than requested. Bytes already received are consumed.
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<()>;

    /// Number of received bytes waiting to be read.
    fn bytes_pending(&mut self) -> Result<usize>;

    /// Drop every byte currently waiting in the receive path.
    ///
    /// Returns how many bytes were discarded.
    fn discard_input(&mut self) -> Result<usize>;

    /// Release the underlying handle. Calling it twice is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Whether the link is still open.
    fn is_open(&self) -> bool;

    /// Human-readable link description for logs.
    fn describe(&self) -> String;

    /// Handle that can tear the link down from another thread.
    ///
    /// `None` when the underlying handle cannot be shared; a pending read on
    /// such a link only ends at its own deadline.
    fn interrupter(&self) -> Option<Interrupter> {
        None
    }
}

impl Transport for Box<dyn Transport> {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write_all(bytes)
    }

    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<()> {
        (**self).read_exact(buf, timeout)
    }

    fn bytes_pending(&mut self) -> Result<usize> {
        (**self).bytes_pending()
    }

    fn discard_input(&mut self) -> Result<usize> {
        (**self).discard_input()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn interrupter(&self) -> Option<Interrupter> {
        (**self).interrupter()
    }
}

/// Cross-thread handle that closes a link, unblocking a pending read.
pub struct Interrupter {
    close: Box<dyn Fn() -> std::io::Result<()> + Send + Sync>,
}

impl Interrupter {
    pub fn new(close: impl Fn() -> std::io::Result<()> + Send + Sync + 'static) -> Self {
        Self {
            close: Box::new(close),
        }
    }

    /// Close the link. Errors from an already-closed handle are ignored.
    pub fn interrupt(&self) {
        if let Err(err) = (self.close)() {
            tracing::debug!(%err, "interrupt on closed link");
        }
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupter").finish_non_exhaustive()
    }
}

/// Stop flag for links whose blocking reads cannot be woken by closing a
/// handle from another thread.
///
/// Reads poll the flag between short waits; once raised the link reports
/// [`TransportError::Closed`].
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// An [`Interrupter`] that raises this flag.
    pub fn interrupter(&self) -> Interrupter {
        let flag = self.clone();
        Interrupter::new(move || {
            flag.raise();
            Ok(())
        })
    }
}

/// [`fill_before_deadline`] that waits at most `slice` per read and gives
/// up with [`TransportError::Closed`] once `cancel` is raised.
pub(crate) fn fill_until_cancelled<F>(
    buf: &mut [u8],
    timeout: Duration,
    cancel: &CancelFlag,
    slice: Duration,
    mut read_some: F,
) -> Result<()>
where
    F: FnMut(&mut [u8], Duration) -> std::io::Result<usize>,
{
    fill_before_deadline(buf, timeout, |dst, remaining| {
        if cancel.is_raised() {
            return Err(std::io::Error::from(ErrorKind::ConnectionAborted));
        }
        read_some(dst, remaining.min(slice))
    })
}

/// Deadline-bounded fill loop shared by the stream-backed transports.
///
/// `read_some` receives the unfilled tail and the time left before the
/// deadline; it returns `Ok(0)` only when the remote end has closed.
pub(crate) fn fill_before_deadline<F>(buf: &mut [u8], timeout: Duration, mut read_some: F) -> Result<()>
where
    F: FnMut(&mut [u8], Duration) -> std::io::Result<usize>,
{
    let deadline = Instant::now() + timeout;
    let mut filled = 0usize;

    while filled < buf.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(TransportError::Timeout {
                expected: buf.len(),
                received: filled,
                timeout,
            });
        }

        match read_some(&mut buf[filled..], remaining) {
            Ok(0) => return Err(TransportError::Closed),
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                continue
            }
            Err(err) if is_disconnect(&err) => return Err(TransportError::Closed),
            Err(err) => return Err(TransportError::Io(err)),
        }
    }

    Ok(())
}

/// True for errors that mean the peer hung up.
pub fn is_disconnect(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}
