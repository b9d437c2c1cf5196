use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::error::{DeviceError, Result};

/// Direction tag of a logged byte run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
    Discarded,
}

impl Direction {
    fn tag(self) -> &'static str {
        match self {
            Direction::Sent => "TX",
            Direction::Received => "RX",
            Direction::Discarded => "XX",
        }
    }
}

/// Append-only record of raw link traffic, one hex line per frame.
///
/// ```text
///     0.000412 TX 01 04 0A FF 01 0F
///     0.000731 RX 01 0B 0A FF 11 ...
/// ```
#[derive(Debug)]
pub struct CommLog {
    out: BufWriter<File>,
    path: PathBuf,
    origin: Instant,
}

impl CommLog {
    /// Open `path` for appending, creating it if needed.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| DeviceError::CommLog {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            out: BufWriter::new(file),
            path,
            origin: Instant::now(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line. Write failures are traced, never returned.
    pub fn record(&mut self, direction: Direction, bytes: &[u8]) {
        let mut line = format!(
            "{:12.6} {}",
            self.origin.elapsed().as_secs_f64(),
            direction.tag()
        );
        for byte in bytes {
            let _ = write!(line, " {byte:02X}");
        }
        line.push('\n');

        let written = self
            .out
            .write_all(line.as_bytes())
            .and_then(|()| self.out.flush());
        if let Err(err) = written {
            tracing::warn!(path = %self.path.display(), %err, "communication log write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_tagged_hex() {
        let dir = std::env::temp_dir().join(format!("harpio-commlog-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("link.log");
        let _ = std::fs::remove_file(&path);

        let mut log = CommLog::create(&path).unwrap();
        log.record(Direction::Sent, &[0x01, 0x04, 0x0A]);
        log.record(Direction::Discarded, &[0xEE]);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("TX 01 04 0A"));
        assert!(lines[1].ends_with("XX EE"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unwritable_path_is_comm_log_error() {
        let err = CommLog::create("/nonexistent-harpio-dir/link.log").unwrap_err();
        assert!(matches!(err, DeviceError::CommLog { .. }));
    }
}
