//! HARP binary message framing.
//!
//! Every message on a HARP link is one self-delimiting frame:
//! - a message type and a length byte that announces the rest of the frame
//! - register address, port and a payload type tag
//! - an optional device timestamp
//! - little-endian payload elements
//! - a mod-256 checksum over everything before it
//!
//! The checksum is the only corruption detector. It catches every
//! single-byte error but not multi-byte errors whose deltas cancel out.

pub mod codec;
pub mod error;
pub mod message;
pub mod payload;
pub mod reader;
pub mod registers;
pub mod request;
pub mod timestamp;
pub mod writer;

pub use codec::{
    checksum, decode_frame, encode, encode_frame, frame_len, Frame, DEFAULT_PORT,
    MAX_FRAME_LEN, MAX_PAYLOAD, MAX_TIMESTAMPED_PAYLOAD, MIN_FRAME_LEN, PREFIX_LEN,
};
pub use error::{FrameError, Result};
pub use message::MessageType;
pub use payload::{Payload, PayloadElement, PayloadType};
pub use reader::FrameReader;
pub use timestamp::HarpTimestamp;
pub use writer::FrameWriter;
