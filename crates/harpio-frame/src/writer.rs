use std::io::{self, Write};

use bytes::BytesMut;

use crate::codec::{encode_frame, Frame, MAX_FRAME_LEN};
use crate::error::{FrameError, Result};

/// Encodes frames onto a blocking byte stream.
///
/// Every call writes whole frames and flushes, so a reply never sits in a
/// user-space buffer while the peer waits for it.
pub struct FrameWriter<T> {
    inner: T,
    scratch: BytesMut,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            scratch: BytesMut::with_capacity(MAX_FRAME_LEN),
        }
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.write_frames(std::slice::from_ref(frame))
    }

    /// Write several frames with a single flush at the end.
    pub fn write_frames(&mut self, frames: &[Frame]) -> Result<()> {
        self.scratch.clear();
        for frame in frames {
            encode_frame(frame, &mut self.scratch)?;
        }
        self.send_scratch()
    }

    /// Write `frame` with its checksum byte inverted, as a noisy link would
    /// deliver it.
    pub fn write_corrupted(&mut self, frame: &Frame) -> Result<()> {
        self.scratch.clear();
        encode_frame(frame, &mut self.scratch)?;
        if let Some(checksum) = self.scratch.last_mut() {
            *checksum = !*checksum;
        }
        self.send_scratch()
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn send_scratch(&mut self) -> Result<()> {
        self.inner
            .write_all(&self.scratch)
            .and_then(|()| self.inner.flush())
            .map_err(|err| match err.kind() {
                io::ErrorKind::WriteZero => FrameError::ConnectionClosed,
                _ => FrameError::Io(err),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::decode_frame;
    use crate::reader::FrameReader;
    use crate::request::{read_u8, write_u16, write_u32};

    #[test]
    fn frame_lands_on_the_wire_intact() {
        let mut writer = FrameWriter::new(Vec::new());
        writer.write_frame(&write_u32(8, 1234)).unwrap();

        assert_eq!(decode_frame(writer.get_ref()).unwrap(), write_u32(8, 1234));
    }

    #[test]
    fn batch_keeps_order() {
        let frames = [read_u8(1), write_u16(33, 9), read_u8(2)];
        let mut writer = FrameWriter::new(Vec::new());
        writer.write_frames(&frames).unwrap();

        let mut reader = FrameReader::new(Cursor::new(writer.into_inner()));
        for expected in &frames {
            assert_eq!(&reader.read_frame().unwrap(), expected);
        }
    }

    #[test]
    fn corrupted_frame_fails_only_the_checksum() {
        let mut writer = FrameWriter::new(Vec::new());
        writer.write_corrupted(&read_u8(10)).unwrap();

        let wire = writer.into_inner();
        assert_eq!(wire[..5], [0x01, 0x04, 0x0A, 0xFF, 0x01]);
        assert!(decode_frame(&wire).unwrap_err().is_checksum());
    }

    #[test]
    fn every_write_is_flushed() {
        let mut writer = FrameWriter::new(CountingSink::default());
        writer.write_frame(&read_u8(0)).unwrap();
        writer.write_frames(&[read_u8(1), read_u8(2)]).unwrap();

        assert_eq!(writer.get_ref().flushes, 2);
        assert_eq!(writer.get_ref().bytes, 18);
    }

    #[test]
    fn full_sink_is_connection_closed() {
        let mut writer = FrameWriter::new(Cursor::new([0u8; 4]));
        let err = writer.write_frame(&read_u8(1)).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[derive(Default)]
    struct CountingSink {
        bytes: usize,
        flushes: usize,
    }

    impl Write for CountingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.bytes += buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }
}
