use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::message::MessageType;
use crate::payload::{Payload, PayloadElement, PayloadType, HAS_TIMESTAMP};
use crate::timestamp::HarpTimestamp;

/// Message type + length byte, read first to learn the frame size.
pub const PREFIX_LEN: usize = 2;

/// Prefix + address + port + payload type.
pub const HEADER_LEN: usize = 5;

/// Seconds (4) + ticks (2).
pub const TIMESTAMP_LEN: usize = 6;

pub const CHECKSUM_LEN: usize = 1;

/// Port value for direct host/device links.
pub const DEFAULT_PORT: u8 = 0xFF;

/// A read request: header and checksum with no payload.
pub const MIN_FRAME_LEN: usize = HEADER_LEN + CHECKSUM_LEN;

/// Largest frame the one-byte length field can describe.
pub const MAX_FRAME_LEN: usize = u8::MAX as usize + PREFIX_LEN;

/// Largest payload of an untimestamped frame.
pub const MAX_PAYLOAD: usize = MAX_FRAME_LEN - MIN_FRAME_LEN;

/// Largest payload of a timestamped frame.
pub const MAX_TIMESTAMPED_PAYLOAD: usize = MAX_PAYLOAD - TIMESTAMP_LEN;

/// One HARP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: MessageType,
    pub address: u8,
    pub port: u8,
    /// Device clock sample; present on device replies and events.
    pub timestamp: Option<HarpTimestamp>,
    pub payload: Payload,
}

impl Frame {
    /// Create an untimestamped frame on the default port.
    pub fn new(message_type: MessageType, address: u8, payload: Payload) -> Self {
        Self {
            message_type,
            address,
            port: DEFAULT_PORT,
            timestamp: None,
            payload,
        }
    }

    pub fn with_port(mut self, port: u8) -> Self {
        self.port = port;
        self
    }

    pub fn with_timestamp(mut self, timestamp: HarpTimestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload.payload_type()
    }

    /// The total wire size of this frame.
    pub fn wire_size(&self) -> usize {
        let timestamp = if self.timestamp.is_some() {
            TIMESTAMP_LEN
        } else {
            0
        };
        MIN_FRAME_LEN + timestamp + self.payload.byte_len()
    }

    /// Encode into a fresh buffer.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        encode_frame(self, &mut buf)?;
        Ok(buf.freeze())
    }

    /// True if `self` is a reply (normal or error) to `request`.
    pub fn answers(&self, request: &Frame) -> bool {
        self.message_type != MessageType::Event
            && self.message_type.base() == request.message_type
            && self.address == request.address
    }

    pub fn payload_as_int(&self) -> Result<i64> {
        self.payload.as_int()
    }

    pub fn payload_as_float(&self) -> Result<f32> {
        self.payload.as_float()
    }

    pub fn payload_as_array<T: PayloadElement>(&self) -> Result<Vec<T>> {
        self.payload.array::<T>()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @{}", self.message_type, self.address)?;
        if self.payload.is_empty() {
            write!(f, " <{}>", self.payload.payload_type())?;
        } else {
            write!(f, " = {}", self.payload)?;
        }
        if let Some(ts) = self.timestamp {
            write!(f, " at {ts}")?;
        }
        Ok(())
    }
}

/// Sum of `bytes` modulo 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────┬────────┬─────────┬──────┬──────────┬───────────┬─────────┬──────────┐
/// │ Type │ Length │ Address │ Port │ Pay.type │ Timestamp │ Payload │ Checksum │
/// │ (1B) │ (1B)   │ (1B)    │ (1B) │ (1B)     │ (0 or 6B) │ (N B LE)│ (1B)     │
/// └──────┴────────┴─────────┴──────┴──────────┴───────────┴─────────┴──────────┘
/// ```
///
/// `Length` counts every byte after itself. The checksum is the sum of all
/// preceding bytes modulo 256.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    let max = if frame.timestamp.is_some() {
        MAX_TIMESTAMPED_PAYLOAD
    } else {
        MAX_PAYLOAD
    };
    let size = frame.payload.byte_len();
    if size > max {
        return Err(FrameError::PayloadTooLarge { size, max });
    }

    let start = dst.len();
    let total = frame.wire_size();
    let mut type_tag = frame.payload_type().tag();
    if frame.timestamp.is_some() {
        type_tag |= HAS_TIMESTAMP;
    }

    dst.reserve(total);
    dst.put_u8(frame.message_type.as_byte());
    // Bounded by MAX_FRAME_LEN above.
    dst.put_u8((total - PREFIX_LEN) as u8);
    dst.put_u8(frame.address);
    dst.put_u8(frame.port);
    dst.put_u8(type_tag);
    if let Some(ts) = frame.timestamp {
        ts.put(dst);
    }
    dst.put_slice(frame.payload.as_bytes());
    let sum = checksum(&dst[start..]);
    dst.put_u8(sum);
    Ok(())
}

/// Encode a frame from its raw parts.
///
/// Fails with [`FrameError::Encoding`] if `payload` is not a whole number of
/// `payload_type` elements.
pub fn encode(
    message_type: MessageType,
    address: u8,
    payload_type: PayloadType,
    payload: &[u8],
) -> Result<Bytes> {
    let payload = Payload::from_bytes(payload_type, Bytes::copy_from_slice(payload))?;
    Frame::new(message_type, address, payload).encode()
}

/// Total frame size announced by a 2-byte prefix.
///
/// Rejects unknown message types and lengths too short for a header.
pub fn frame_len(prefix: [u8; PREFIX_LEN]) -> Result<usize> {
    MessageType::from_byte(prefix[0])?;
    let total = usize::from(prefix[1]) + PREFIX_LEN;
    if total < MIN_FRAME_LEN {
        return Err(FrameError::Malformed(format!(
            "length byte {} is below the {}-byte minimum frame",
            prefix[1], MIN_FRAME_LEN
        )));
    }
    Ok(total)
}

/// Decode exactly one frame.
///
/// `src` must hold the whole frame and nothing else. The checksum is
/// verified before any field is interpreted.
pub fn decode_frame(src: &[u8]) -> Result<Frame> {
    if src.len() < MIN_FRAME_LEN {
        return Err(FrameError::Length {
            declared: src.get(1).map_or(MIN_FRAME_LEN, |len| usize::from(*len) + PREFIX_LEN),
            available: src.len(),
        });
    }
    let declared = usize::from(src[1]) + PREFIX_LEN;
    if declared != src.len() {
        return Err(FrameError::Length {
            declared,
            available: src.len(),
        });
    }

    let (body, trailer) = src.split_at(src.len() - CHECKSUM_LEN);
    let computed = checksum(body);
    if computed != trailer[0] {
        return Err(FrameError::Checksum {
            computed,
            received: trailer[0],
        });
    }

    let message_type = MessageType::from_byte(body[0])?;

    let mut cursor = &body[PREFIX_LEN..];
    let address = cursor.get_u8();
    let port = cursor.get_u8();
    let type_tag = cursor.get_u8();
    let payload_type = PayloadType::from_tag(type_tag & !HAS_TIMESTAMP)?;

    let timestamp = if type_tag & HAS_TIMESTAMP != 0 {
        if cursor.remaining() < TIMESTAMP_LEN {
            return Err(FrameError::Malformed(format!(
                "timestamp flag set but only {} bytes follow the header",
                cursor.remaining()
            )));
        }
        Some(HarpTimestamp::get(&mut cursor))
    } else {
        None
    };

    let payload = Payload::from_bytes(payload_type, Bytes::copy_from_slice(cursor)).map_err(|_| {
        FrameError::Malformed(format!(
            "{} payload bytes are not a whole number of {payload_type} elements",
            cursor.len()
        ))
    })?;

    Ok(Frame {
        message_type,
        address,
        port,
        timestamp,
        payload,
    })
}
