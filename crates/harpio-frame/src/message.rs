use std::fmt;

use crate::error::{FrameError, Result};

/// Bit set on the message type of a reply that reports a failed operation.
pub const ERROR_FLAG: u8 = 0x08;

/// First byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Read,
    Write,
    Event,
    ReadError,
    WriteError,
}

impl MessageType {
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(MessageType::Read),
            2 => Ok(MessageType::Write),
            3 => Ok(MessageType::Event),
            9 => Ok(MessageType::ReadError),
            10 => Ok(MessageType::WriteError),
            other => Err(FrameError::UnknownMessageType(other)),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            MessageType::Read => 1,
            MessageType::Write => 2,
            MessageType::Event => 3,
            MessageType::ReadError => 1 | ERROR_FLAG,
            MessageType::WriteError => 2 | ERROR_FLAG,
        }
    }

    /// True for `ReadError` and `WriteError` replies.
    pub fn is_error(self) -> bool {
        self.as_byte() & ERROR_FLAG != 0
    }

    /// The request kind this message answers, with the error flag cleared.
    pub fn base(self) -> Self {
        match self {
            MessageType::ReadError => MessageType::Read,
            MessageType::WriteError => MessageType::Write,
            other => other,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Read => "Read",
            MessageType::Write => "Write",
            MessageType::Event => "Event",
            MessageType::ReadError => "ReadError",
            MessageType::WriteError => "WriteError",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_mapping_is_symmetric() {
        for ty in [
            MessageType::Read,
            MessageType::Write,
            MessageType::Event,
            MessageType::ReadError,
            MessageType::WriteError,
        ] {
            assert_eq!(MessageType::from_byte(ty.as_byte()).unwrap(), ty);
        }
    }

    #[test]
    fn error_replies_map_back_to_request_kind() {
        assert!(MessageType::ReadError.is_error());
        assert!(!MessageType::Event.is_error());
        assert_eq!(MessageType::WriteError.base(), MessageType::Write);
        assert_eq!(MessageType::ReadError.as_byte(), 9);
    }

    #[test]
    fn unknown_byte_is_rejected() {
        assert!(matches!(
            MessageType::from_byte(0x42),
            Err(FrameError::UnknownMessageType(0x42))
        ));
    }
}
