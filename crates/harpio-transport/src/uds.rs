use std::io::{ErrorKind, Read, Write};
use std::net::Shutdown;
use std::os::fd::AsRawFd;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{fill_before_deadline, is_disconnect, Interrupter, Transport};

/// Listening Unix domain socket for serving emulated devices.
///
/// The socket file is removed on drop, but only if the path still refers to
/// the socket this listener created.
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

impl UnixDomainSocket {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on a filesystem-path Unix domain socket.
    ///
    /// A stale socket at `path` is removed first; any other kind of file is
    /// left alone and the bind fails.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        check_path_len(&path)?;
        let bind_err = |source: std::io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        match std::fs::symlink_metadata(&path) {
            Ok(meta) if meta.file_type().is_socket() => {
                debug!(?path, "removing stale socket");
                std::fs::remove_file(&path).map_err(bind_err)?;
            }
            Ok(_) => {
                return Err(bind_err(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(bind_err(err)),
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_err)?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, mode = %format!("{mode:o}"), "emulator socket ready");
        let created_inode = Some((created.dev(), created.ino()));
        Ok(Self {
            listener,
            path,
            created_inode,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted connection");
        Ok(stream)
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        let Some((expected_dev, expected_ino)) = self.created_inode else {
            return;
        };
        let ours = std::fs::symlink_metadata(&self.path).is_ok_and(|meta| {
            meta.file_type().is_socket()
                && (meta.dev(), meta.ino()) == (expected_dev, expected_ino)
        });
        if ours {
            let _ = std::fs::remove_file(&self.path);
        } else {
            debug!(path = ?self.path, "socket path replaced, leaving it in place");
        }
    }
}

/// Virtual serial link over a Unix domain socket stream.
///
/// Used for device emulators and serial bridges that expose a socket
/// instead of a tty.
#[derive(Debug)]
pub struct UdsTransport {
    stream: Option<UnixStream>,
    label: String,
}

impl UdsTransport {
    /// Connect to a listening socket.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        check_path_len(path).map_err(|_| TransportError::Connect {
            address: path.display().to_string(),
            source: std::io::Error::new(ErrorKind::InvalidInput, "socket path too long"),
        })?;
        let stream = UnixStream::connect(path).map_err(|e| TransportError::Connect {
            address: path.display().to_string(),
            source: e,
        })?;
        debug!(?path, "connected to unix domain socket");
        Ok(Self {
            stream: Some(stream),
            label: format!("unix:{}", path.display()),
        })
    }

    /// Wrap an already-connected stream, e.g. one half of `UnixStream::pair()`.
    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            stream: Some(stream),
            label: "unix:<stream>".to_string(),
        }
    }

    fn stream(&mut self) -> Result<&mut UnixStream> {
        self.stream.as_mut().ok_or(TransportError::Closed)
    }
}

impl Transport for UdsTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self.stream()?;
        stream
            .write_all(bytes)
            .and_then(|()| stream.flush())
            .map_err(|err| {
                if is_disconnect(&err) {
                    TransportError::Closed
                } else {
                    TransportError::Io(err)
                }
            })
    }

    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<()> {
        let stream = self.stream()?;
        fill_before_deadline(buf, timeout, |dst, remaining| {
            stream.set_read_timeout(Some(remaining))?;
            stream.read(dst)
        })
    }

    fn bytes_pending(&mut self) -> Result<usize> {
        let fd = self.stream()?.as_raw_fd();
        let mut pending: libc::c_int = 0;

        // SAFETY: `pending` is a valid writable c_int, which is what FIONREAD
        // stores through its argument, and `fd` belongs to the open stream
        // owned by `self`.
        let rc = unsafe { libc::ioctl(fd, libc::FIONREAD, &mut pending as *mut libc::c_int) };
        if rc < 0 {
            return Err(TransportError::Io(std::io::Error::last_os_error()));
        }
        Ok(usize::try_from(pending).unwrap_or(0))
    }

    fn discard_input(&mut self) -> Result<usize> {
        let stream = self.stream()?;
        let mut scratch = [0u8; 512];
        let mut discarded = 0usize;
        stream.set_nonblocking(true)?;
        let outcome = loop {
            match stream.read(&mut scratch) {
                Ok(0) => break Ok(()),
                Ok(n) => discarded += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(err) => break Err(TransportError::Io(err)),
            }
        };
        stream.set_nonblocking(false)?;
        outcome.map(|()| discarded)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!(link = %self.label, "closed unix link");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn describe(&self) -> String {
        self.label.clone()
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let clone = self.stream.as_ref()?.try_clone().ok()?;
        Some(Interrupter::new(move || clone.shutdown(Shutdown::Both)))
    }
}

fn check_path_len(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len >= UnixDomainSocket::MAX_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len,
            max: UnixDomainSocket::MAX_PATH_LEN,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("harpio-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn bound_socket_accepts_and_cleans_up() {
        let dir = temp_dir("uds-accept");
        let sock_path = dir.join("device.sock");

        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        assert!(sock_path.exists());

        let path_clone = sock_path.clone();
        let handle = std::thread::spawn(move || {
            let mut client = UdsTransport::connect(&path_clone).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.join().unwrap();

        drop(listener);
        assert!(!sock_path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn overlong_path_is_rejected() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = UnixDomainSocket::bind(&long_path);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn missing_socket_is_connect_error() {
        let dir = temp_dir("uds-missing");
        let result = UdsTransport::connect(dir.join("absent.sock"));
        assert!(matches!(result, Err(TransportError::Connect { .. })));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn socket_is_owner_only_by_default() {
        let dir = temp_dir("uds-perms");
        let sock_path = dir.join("perm.sock");

        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn bind_refuses_to_clobber_regular_file() {
        let dir = temp_dir("uds-bind-file");
        let sock_path = dir.join("not-a-socket.sock");
        std::fs::write(&sock_path, b"regular-file").unwrap();

        let result = UnixDomainSocket::bind(&sock_path);
        assert!(matches!(result, Err(TransportError::Bind { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn drop_leaves_replaced_path_alone() {
        let dir = temp_dir("uds-drop-race");
        let sock_path = dir.join("drop.sock");

        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        std::fs::remove_file(&sock_path).unwrap();
        std::fs::write(&sock_path, b"replacement-file").unwrap();

        drop(listener);
        assert_eq!(std::fs::read(&sock_path).unwrap(), b"replacement-file");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn read_exact_times_out_within_bound() {
        let (left, _right) = UnixStream::pair().unwrap();
        let mut link = UdsTransport::from_stream(left);
        let mut buf = [0u8; 6];

        let start = Instant::now();
        let err = link
            .read_exact(&mut buf, Duration::from_millis(50))
            .unwrap_err();
        let elapsed = start.elapsed();

        assert!(err.is_timeout());
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
    }

    #[test]
    fn read_exact_spans_multiple_writes() {
        let (left, mut right) = UnixStream::pair().unwrap();
        let mut link = UdsTransport::from_stream(left);

        let writer = std::thread::spawn(move || {
            right.write_all(&[1, 2]).unwrap();
            std::thread::sleep(Duration::from_millis(10));
            right.write_all(&[3, 4]).unwrap();
            right
        });

        let mut buf = [0u8; 4];
        link.read_exact(&mut buf, Duration::from_secs(1)).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        let _ = writer.join().unwrap();
    }

    #[test]
    fn pending_and_discard_report_stray_bytes() {
        let (left, mut right) = UnixStream::pair().unwrap();
        let mut link = UdsTransport::from_stream(left);

        assert_eq!(link.bytes_pending().unwrap(), 0);
        right.write_all(&[9, 9, 9]).unwrap();
        assert_eq!(link.bytes_pending().unwrap(), 3);
        assert_eq!(link.discard_input().unwrap(), 3);
        assert_eq!(link.bytes_pending().unwrap(), 0);
    }

    #[test]
    fn close_is_idempotent_and_blocks_io() {
        let (left, _right) = UnixStream::pair().unwrap();
        let mut link = UdsTransport::from_stream(left);

        link.close().unwrap();
        link.close().unwrap();
        assert!(!link.is_open());
        assert!(matches!(link.write_all(b"x"), Err(TransportError::Closed)));
    }

    #[test]
    fn remote_hangup_is_reported_as_closed() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut link = UdsTransport::from_stream(left);
        drop(right);

        let mut buf = [0u8; 1];
        let err = link
            .read_exact(&mut buf, Duration::from_millis(100))
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[test]
    fn interrupter_unblocks_pending_read() {
        let (left, _right) = UnixStream::pair().unwrap();
        let mut link = UdsTransport::from_stream(left);
        let interrupter = link.interrupter().expect("unix links can be interrupted");

        let killer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            interrupter.interrupt();
        });

        let start = Instant::now();
        let mut buf = [0u8; 1];
        let err = link.read_exact(&mut buf, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, TransportError::Closed));
        assert!(start.elapsed() < Duration::from_secs(2));
        killer.join().unwrap();
    }
}
