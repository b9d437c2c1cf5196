use std::io::{ErrorKind, Read};

use crate::codec::{decode_frame, frame_len, Frame, MAX_FRAME_LEN, PREFIX_LEN};
use crate::error::{FrameError, Result};

/// Reads whole frames from a blocking byte stream.
///
/// Each call reads the 2-byte prefix, then exactly the announced remainder,
/// so nothing past the current frame is consumed. A frame that fails to
/// decode has still been consumed in full; the next call starts at the
/// following frame. An unknown message type in the prefix leaves the stream
/// position undefined and the caller should resynchronise.
pub struct FrameReader<T> {
    inner: T,
    frames: u64,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self { inner, frames: 0 }
    }

    /// Read the next frame.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` on end of stream, also when
    /// it cuts a frame short.
    pub fn read_frame(&mut self) -> Result<Frame> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        self.fill(&mut buf[..PREFIX_LEN])?;
        let total = frame_len([buf[0], buf[1]])?;
        self.fill(&mut buf[PREFIX_LEN..total])?;
        self.frames += 1;
        decode_frame(&buf[..total])
    }

    /// Frames read so far, valid or not.
    pub fn frames_read(&self) -> u64 {
        self.frames
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

    fn fill(&mut self, dst: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < dst.len() {
            match self.inner.read(&mut dst[filled..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::encode;
    use crate::message::MessageType;
    use crate::payload::PayloadType;
    use crate::request::{read_u16, write_array, write_s32};
    use crate::timestamp::HarpTimestamp;

    fn stream(frames: &[Frame]) -> Vec<u8> {
        frames
            .iter()
            .flat_map(|f| f.encode().unwrap().to_vec())
            .collect()
    }

    #[test]
    fn reads_back_to_back_frames() {
        let event = Frame::new(MessageType::Event, 35, crate::Payload::from_value(1u8))
            .with_timestamp(HarpTimestamp::new(9, 100));
        let frames = [read_u16(0), event, write_s32(36, -5), write_array(12, b"rig".as_slice())];
        let mut reader = FrameReader::new(Cursor::new(stream(&frames)));

        for expected in &frames {
            assert_eq!(&reader.read_frame().unwrap(), expected);
        }
        assert_eq!(reader.frames_read(), 4);
        assert!(matches!(reader.read_frame(), Err(FrameError::ConnectionClosed)));
    }

    #[test]
    fn does_not_read_past_the_frame() {
        let mut bytes = stream(&[read_u16(0)]);
        bytes.extend_from_slice(&[0xDE, 0xAD]);
        let mut reader = FrameReader::new(Cursor::new(bytes));

        reader.read_frame().unwrap();
        assert_eq!(reader.get_ref().position(), 6);
    }

    #[test]
    fn trickled_bytes_assemble() {
        let mut reader = FrameReader::new(Trickle {
            bytes: stream(&[write_s32(40, 123_456)]),
            pos: 0,
        });
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.payload_as_int().unwrap(), 123_456);
    }

    #[test]
    fn truncated_frame_is_connection_closed() {
        let mut bytes = stream(&[write_s32(40, 1)]);
        bytes.truncate(7);
        let mut reader = FrameReader::new(Cursor::new(bytes));
        assert!(matches!(reader.read_frame(), Err(FrameError::ConnectionClosed)));
    }

    #[test]
    fn bad_checksum_consumes_only_that_frame() {
        let mut bytes = encode(MessageType::Read, 1, PayloadType::U8, &[]).unwrap().to_vec();
        bytes[5] = bytes[5].wrapping_add(1);
        bytes.extend(stream(&[read_u16(0)]));

        let mut reader = FrameReader::new(Cursor::new(bytes));
        assert!(reader.read_frame().unwrap_err().is_checksum());
        assert_eq!(reader.read_frame().unwrap(), read_u16(0));
    }

    #[test]
    fn unknown_message_type_is_rejected_from_prefix() {
        let mut reader = FrameReader::new(Cursor::new(vec![0x07, 0x04, 0x00, 0xFF, 0x01, 0x0B]));
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::UnknownMessageType(0x07))
        ));
    }

    struct Trickle {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match (self.bytes.get(self.pos), buf.first_mut()) {
                (Some(byte), Some(slot)) => {
                    *slot = *byte;
                    self.pos += 1;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }
    }
}
