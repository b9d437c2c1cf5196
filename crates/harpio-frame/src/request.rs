//! Request frame builders.
//!
//! Pure values, no I/O. Read requests carry the expected payload type and
//! no data; write requests carry the encoded value.

use crate::codec::Frame;
use crate::message::MessageType;
use crate::payload::{Payload, PayloadElement, PayloadType};

/// Read request for a register of the given element type.
pub fn read(address: u8, payload_type: PayloadType) -> Frame {
    Frame::new(MessageType::Read, address, Payload::empty(payload_type))
}

/// Read request for an array register of `T` elements.
///
/// The reply length, not the request, determines the element count.
pub fn read_array<T: PayloadElement>(address: u8) -> Frame {
    read(address, T::TYPE)
}

/// Write request carrying a single value.
pub fn write<T: PayloadElement>(address: u8, value: T) -> Frame {
    Frame::new(MessageType::Write, address, Payload::from_value(value))
}

/// Write request carrying an array.
pub fn write_array<T: PayloadElement>(address: u8, values: &[T]) -> Frame {
    Frame::new(MessageType::Write, address, Payload::from_slice(values))
}

/// Write request from an already-typed payload.
pub fn write_payload(address: u8, payload: Payload) -> Frame {
    Frame::new(MessageType::Write, address, payload)
}

macro_rules! typed_requests {
    ($($read:ident, $write:ident, $ty:ty, $tag:expr;)*) => {
        $(
            pub fn $read(address: u8) -> Frame {
                read(address, $tag)
            }

            pub fn $write(address: u8, value: $ty) -> Frame {
                write(address, value)
            }
        )*
    };
}

typed_requests! {
    read_u8, write_u8, u8, PayloadType::U8;
    read_s8, write_s8, i8, PayloadType::S8;
    read_u16, write_u16, u16, PayloadType::U16;
    read_s16, write_s16, i16, PayloadType::S16;
    read_u32, write_u32, u32, PayloadType::U32;
    read_s32, write_s32, i32, PayloadType::S32;
    read_u64, write_u64, u64, PayloadType::U64;
    read_s64, write_s64, i64, PayloadType::S64;
    read_f32, write_f32, f32, PayloadType::Float;
}
