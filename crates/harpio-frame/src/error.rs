use crate::payload::PayloadType;

/// Errors that can occur during frame encoding/decoding and payload access.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The trailing checksum does not match the sum of the preceding bytes.
    #[error("checksum mismatch (computed 0x{computed:02X}, received 0x{received:02X})")]
    Checksum { computed: u8, received: u8 },

    /// The first byte is not a known message type.
    #[error("unknown message type 0x{0:02X}")]
    UnknownMessageType(u8),

    /// The payload type tag is not a known type.
    #[error("unknown payload type 0x{0:02X}")]
    UnknownPayloadType(u8),

    /// The declared frame length disagrees with the bytes available.
    #[error("frame length mismatch (declared {declared} bytes, have {available})")]
    Length { declared: usize, available: usize },

    /// The frame is structurally invalid in some other way.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The payload byte count is not a whole number of elements.
    #[error("{len} payload bytes do not fit {payload_type} elements")]
    Encoding { payload_type: PayloadType, len: usize },

    /// The payload does not fit in the one-byte length field.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A typed accessor was used on a payload of another type or shape.
    #[error("cannot read {actual} payload with {count} element(s) as {requested}")]
    PayloadType {
        requested: &'static str,
        actual: PayloadType,
        count: usize,
    },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// True for errors that mean the bytes on the wire were not a valid frame.
    ///
    /// Checksum failures are reported separately via [`FrameError::is_checksum`].
    pub fn is_format(&self) -> bool {
        matches!(
            self,
            FrameError::UnknownMessageType(_)
                | FrameError::UnknownPayloadType(_)
                | FrameError::Length { .. }
                | FrameError::Malformed(_)
        )
    }

    pub fn is_checksum(&self) -> bool {
        matches!(self, FrameError::Checksum { .. })
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
