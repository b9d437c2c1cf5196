//! Typed register payloads.
//!
//! A [`Payload`] is a tagged union: the [`PayloadType`] set when the frame
//! was built or decoded, plus the raw little-endian element bytes. Typed
//! accessors fail closed when the requested interpretation does not match
//! the tag; nothing is ever reinterpreted by guessing.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Payload type tag flag for signed integers.
pub const IS_SIGNED: u8 = 0x80;
/// Payload type tag flag for IEEE-754 floats.
pub const IS_FLOAT: u8 = 0x40;
/// Payload type tag flag announcing a 6-byte timestamp before the payload.
pub const HAS_TIMESTAMP: u8 = 0x10;

/// Element type of a register payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    U8,
    S8,
    U16,
    S16,
    U32,
    S32,
    U64,
    S64,
    Float,
}

impl PayloadType {
    pub const ALL: [PayloadType; 9] = [
        PayloadType::U8,
        PayloadType::S8,
        PayloadType::U16,
        PayloadType::S16,
        PayloadType::U32,
        PayloadType::S32,
        PayloadType::U64,
        PayloadType::S64,
        PayloadType::Float,
    ];

    /// Wire tag without the timestamp flag.
    pub fn tag(self) -> u8 {
        match self {
            PayloadType::U8 => 0x01,
            PayloadType::S8 => IS_SIGNED | 0x01,
            PayloadType::U16 => 0x02,
            PayloadType::S16 => IS_SIGNED | 0x02,
            PayloadType::U32 => 0x04,
            PayloadType::S32 => IS_SIGNED | 0x04,
            PayloadType::U64 => 0x08,
            PayloadType::S64 => IS_SIGNED | 0x08,
            PayloadType::Float => IS_FLOAT | 0x04,
        }
    }

    /// Parse a wire tag. The timestamp flag must already be stripped.
    pub fn from_tag(tag: u8) -> Result<Self> {
        PayloadType::ALL
            .into_iter()
            .find(|ty| ty.tag() == tag)
            .ok_or(FrameError::UnknownPayloadType(tag))
    }

    /// Bytes per element.
    pub fn width(self) -> usize {
        usize::from(self.tag() & 0x0F)
    }

    pub fn is_signed(self) -> bool {
        self.tag() & IS_SIGNED != 0
    }

    pub fn is_float(self) -> bool {
        self.tag() & IS_FLOAT != 0
    }

    pub fn name(self) -> &'static str {
        match self {
            PayloadType::U8 => "U8",
            PayloadType::S8 => "S8",
            PayloadType::U16 => "U16",
            PayloadType::S16 => "S16",
            PayloadType::U32 => "U32",
            PayloadType::S32 => "S32",
            PayloadType::U64 => "U64",
            PayloadType::S64 => "S64",
            PayloadType::Float => "Float",
        }
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for PayloadType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        PayloadType::ALL
            .into_iter()
            .find(|ty| ty.name().eq_ignore_ascii_case(s) || (s.eq_ignore_ascii_case("f32") && ty.is_float()))
            .ok_or_else(|| format!("unknown payload type '{s}'"))
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Rust scalar types that map one-to-one onto a [`PayloadType`].
pub trait PayloadElement: Copy + fmt::Debug + sealed::Sealed {
    const TYPE: PayloadType;

    fn put(self, dst: &mut BytesMut);

    /// Decode one element. `src` must hold at least `TYPE.width()` bytes.
    fn get(src: &mut &[u8]) -> Self;
}

macro_rules! payload_element {
    ($ty:ty, $tag:expr, $put:ident, $get:ident) => {
        impl sealed::Sealed for $ty {}

        impl PayloadElement for $ty {
            const TYPE: PayloadType = $tag;

            fn put(self, dst: &mut BytesMut) {
                dst.$put(self);
            }

            fn get(src: &mut &[u8]) -> Self {
                src.$get()
            }
        }
    };
}

payload_element!(u8, PayloadType::U8, put_u8, get_u8);
payload_element!(i8, PayloadType::S8, put_i8, get_i8);
payload_element!(u16, PayloadType::U16, put_u16_le, get_u16_le);
payload_element!(i16, PayloadType::S16, put_i16_le, get_i16_le);
payload_element!(u32, PayloadType::U32, put_u32_le, get_u32_le);
payload_element!(i32, PayloadType::S32, put_i32_le, get_i32_le);
payload_element!(u64, PayloadType::U64, put_u64_le, get_u64_le);
payload_element!(i64, PayloadType::S64, put_i64_le, get_i64_le);
payload_element!(f32, PayloadType::Float, put_f32_le, get_f32_le);

/// Type-tagged register payload.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Payload {
    payload_type: PayloadType,
    bytes: Bytes,
}

impl Payload {
    /// A payload with no elements, as carried by read requests.
    pub fn empty(payload_type: PayloadType) -> Self {
        Self {
            payload_type,
            bytes: Bytes::new(),
        }
    }

    /// Wrap raw little-endian bytes.
    ///
    /// Fails with [`FrameError::Encoding`] if the byte count is not a whole
    /// number of elements.
    pub fn from_bytes(payload_type: PayloadType, bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() % payload_type.width() != 0 {
            return Err(FrameError::Encoding {
                payload_type,
                len: bytes.len(),
            });
        }
        Ok(Self {
            payload_type,
            bytes,
        })
    }

    /// A single-element payload.
    pub fn from_value<T: PayloadElement>(value: T) -> Self {
        Self::from_slice(&[value])
    }

    /// An array payload.
    pub fn from_slice<T: PayloadElement>(values: &[T]) -> Self {
        let mut buf = BytesMut::with_capacity(values.len() * T::TYPE.width());
        for value in values {
            value.put(&mut buf);
        }
        Self {
            payload_type: T::TYPE,
            bytes: buf.freeze(),
        }
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    /// Raw little-endian bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of encoded bytes.
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.bytes.len() / self.payload_type.width()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The single element of a scalar payload.
    pub fn value<T: PayloadElement>(&self) -> Result<T> {
        if self.payload_type != T::TYPE || self.len() != 1 {
            return Err(self.mismatch(T::TYPE.name()));
        }
        let mut src = self.bytes.as_ref();
        Ok(T::get(&mut src))
    }

    /// Every element of an array payload.
    pub fn array<T: PayloadElement>(&self) -> Result<Vec<T>> {
        if self.payload_type != T::TYPE {
            return Err(self.mismatch(T::TYPE.name()));
        }
        let mut src = self.bytes.as_ref();
        Ok((0..self.len()).map(|_| T::get(&mut src)).collect())
    }

    /// The single element of an integer payload, widened to `i64`.
    ///
    /// Fails for float payloads, arrays and U64 values beyond `i64::MAX`.
    pub fn as_int(&self) -> Result<i64> {
        let value = match self.payload_type {
            PayloadType::U8 => self.value::<u8>().map(i64::from),
            PayloadType::S8 => self.value::<i8>().map(i64::from),
            PayloadType::U16 => self.value::<u16>().map(i64::from),
            PayloadType::S16 => self.value::<i16>().map(i64::from),
            PayloadType::U32 => self.value::<u32>().map(i64::from),
            PayloadType::S32 => self.value::<i32>().map(i64::from),
            PayloadType::S64 => self.value::<i64>(),
            PayloadType::U64 => self
                .value::<u64>()
                .and_then(|v| i64::try_from(v).map_err(|_| self.mismatch("i64"))),
            PayloadType::Float => Err(self.mismatch("integer")),
        };
        value.map_err(|_| self.mismatch("integer"))
    }

    /// The single element of a Float payload.
    pub fn as_float(&self) -> Result<f32> {
        self.value::<f32>()
    }

    /// Every element of an integer payload, widened to `i64`.
    pub fn as_int_array(&self) -> Result<Vec<i64>> {
        let widen = |values: Result<Vec<i64>>| values.map_err(|_| self.mismatch("integer array"));
        match self.payload_type {
            PayloadType::U8 => widen(self.array::<u8>().map(|v| v.into_iter().map(i64::from).collect())),
            PayloadType::S8 => widen(self.array::<i8>().map(|v| v.into_iter().map(i64::from).collect())),
            PayloadType::U16 => widen(self.array::<u16>().map(|v| v.into_iter().map(i64::from).collect())),
            PayloadType::S16 => widen(self.array::<i16>().map(|v| v.into_iter().map(i64::from).collect())),
            PayloadType::U32 => widen(self.array::<u32>().map(|v| v.into_iter().map(i64::from).collect())),
            PayloadType::S32 => widen(self.array::<i32>().map(|v| v.into_iter().map(i64::from).collect())),
            PayloadType::S64 => widen(self.array::<i64>()),
            PayloadType::U64 => widen(self.array::<u64>().and_then(|values| {
                values
                    .into_iter()
                    .map(|v| i64::try_from(v).map_err(|_| self.mismatch("i64")))
                    .collect()
            })),
            PayloadType::Float => Err(self.mismatch("integer array")),
        }
    }

    fn mismatch(&self, requested: &'static str) -> FrameError {
        FrameError::PayloadType {
            requested,
            actual: self.payload_type,
            count: self.len(),
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload<{}>", self.payload_type)?;
        f.debug_list().entries(self.bytes.iter()).finish()
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = match self.payload_type {
            PayloadType::Float => self
                .array::<f32>()
                .unwrap_or_default()
                .into_iter()
                .map(|v| v.to_string())
                .collect(),
            PayloadType::U64 => self
                .array::<u64>()
                .unwrap_or_default()
                .into_iter()
                .map(|v| v.to_string())
                .collect(),
            _ => self
                .as_int_array()
                .unwrap_or_default()
                .into_iter()
                .map(|v| v.to_string())
                .collect(),
        };
        match rendered.as_slice() {
            [single] => write!(f, "{single} ({})", self.payload_type),
            _ => write!(f, "[{}] ({})", rendered.join(", "), self.payload_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_match_wire_values() {
        assert_eq!(PayloadType::U8.tag(), 0x01);
        assert_eq!(PayloadType::S16.tag(), 0x82);
        assert_eq!(PayloadType::S32.tag(), 0x84);
        assert_eq!(PayloadType::Float.tag(), 0x44);
        assert_eq!(PayloadType::Float.width(), 4);
        assert_eq!(PayloadType::S64.width(), 8);
        for ty in PayloadType::ALL {
            assert_eq!(PayloadType::from_tag(ty.tag()).unwrap(), ty);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(matches!(
            PayloadType::from_tag(0x03),
            Err(FrameError::UnknownPayloadType(0x03))
        ));
    }

    #[test]
    fn values_are_little_endian() {
        let payload = Payload::from_value(0x1234u16);
        assert_eq!(payload.as_bytes(), &[0x34, 0x12]);
        assert_eq!(payload.value::<u16>().unwrap(), 0x1234);

        let payload = Payload::from_value(-2i32);
        assert_eq!(payload.as_bytes(), &[0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(payload.as_int().unwrap(), -2);
    }

    #[test]
    fn floats_are_ieee754_single() {
        let payload = Payload::from_value(1.5f32);
        assert_eq!(payload.as_bytes(), &1.5f32.to_le_bytes());
        assert_eq!(payload.as_float().unwrap(), 1.5);
    }

    #[test]
    fn accessors_fail_closed_on_type_mismatch() {
        let payload = Payload::from_value(7u8);
        assert!(matches!(
            payload.value::<u16>(),
            Err(FrameError::PayloadType {
                requested: "U16",
                actual: PayloadType::U8,
                count: 1
            })
        ));
        assert!(payload.as_float().is_err());
        assert!(Payload::from_value(1.0f32).as_int().is_err());
        assert!(payload.array::<i8>().is_err());
    }

    #[test]
    fn scalar_access_rejects_arrays_and_empty() {
        let payload = Payload::from_slice(&[1u8, 2, 3]);
        assert!(payload.value::<u8>().is_err());
        assert!(payload.as_int().is_err());
        assert_eq!(payload.array::<u8>().unwrap(), vec![1, 2, 3]);
        assert_eq!(payload.as_int_array().unwrap(), vec![1, 2, 3]);

        assert!(Payload::empty(PayloadType::U8).as_int().is_err());
    }

    #[test]
    fn from_bytes_checks_element_width() {
        assert!(Payload::from_bytes(PayloadType::U16, vec![1, 2, 3, 4]).is_ok());
        assert!(matches!(
            Payload::from_bytes(PayloadType::U32, vec![1, 2, 3]),
            Err(FrameError::Encoding {
                payload_type: PayloadType::U32,
                len: 3
            })
        ));
    }

    #[test]
    fn huge_u64_does_not_widen_to_int() {
        let payload = Payload::from_value(u64::MAX);
        assert!(payload.as_int().is_err());
        assert_eq!(payload.value::<u64>().unwrap(), u64::MAX);
    }

    #[test]
    fn parse_type_names() {
        assert_eq!("u16".parse::<PayloadType>().unwrap(), PayloadType::U16);
        assert_eq!("float".parse::<PayloadType>().unwrap(), PayloadType::Float);
        assert_eq!("f32".parse::<PayloadType>().unwrap(), PayloadType::Float);
        assert!("u7".parse::<PayloadType>().is_err());
    }

    #[test]
    fn display_renders_values() {
        assert_eq!(Payload::from_value(5u8).to_string(), "5 (U8)");
        assert_eq!(Payload::from_slice(&[1i16, -1]).to_string(), "[1, -1] (S16)");
    }
}
