//! Self-describing binary value codec.
//!
//! A MessagePack-compatible encoding of the value universe the wire protocol
//! needs: nil, booleans, signed and unsigned integers (packed in the smallest
//! fitting representation), IEEE floats, byte strings, arrays, and maps.
//!
//! Decoding is all-or-nothing: a failed decode never leaves a value half
//! consumed. The framed stream relies on this by retrying a decode of its
//! whole buffer until a complete value is available.

mod pack;
mod unpack;
mod value;

pub use pack::{
    pack, pack_array_length, pack_bytes, pack_float64, pack_int, pack_map_length, pack_nil,
    pack_uint, Pack,
};
pub use unpack::{decode_value, unpack, Unpack};
pub use value::PackedValue;

use thiserror::Error;

/// Largest byte-string length the decoder will accept.
pub(crate) const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

/// Largest array or map element count the decoder will accept.
pub(crate) const MAX_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Errors produced while decoding packed values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The input ended in the middle of a value.
    #[error("input ended in the middle of a value")]
    ShortRead,

    /// The decoded tag is incompatible with the requested type.
    #[error("expected {expected}, found tag 0x{tag:02x}")]
    TypeMismatch { expected: &'static str, tag: u8 },

    /// A declared length is beyond any sane message size.
    #[error("declared length {length} exceeds the message size limit")]
    MalformedLength { length: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use bytes::BytesMut;

    fn roundtrip(value: &PackedValue) -> PackedValue {
        let mut buf = BytesMut::new();
        pack(&mut buf, value);
        let mut cursor = Cursor::new(&buf[..]);
        let decoded = decode_value(&mut cursor).expect("decode");
        assert_eq!(cursor.position() as usize, buf.len(), "trailing bytes");
        decoded
    }

    #[test]
    fn test_roundtrip_scalars() {
        for value in [
            PackedValue::Nil,
            PackedValue::Bool(true),
            PackedValue::Bool(false),
            PackedValue::Int(0),
            PackedValue::Int(1),
            PackedValue::Int(-1),
            PackedValue::Int(-32),
            PackedValue::Int(-33),
            PackedValue::Int(i64::MIN),
            PackedValue::Int(i64::MAX),
            PackedValue::Uint(127),
            PackedValue::Uint(128),
            PackedValue::Uint(65_535),
            PackedValue::Uint(65_536),
            PackedValue::Uint(u64::MAX),
            PackedValue::Float32(1.5),
            PackedValue::Float64(-0.25),
        ] {
            assert_eq!(roundtrip(&value), value);
        }
    }

    #[test]
    fn test_roundtrip_bytes() {
        for len in [0, 1, 31, 32, 255, 256, 70_000] {
            let value = PackedValue::Bytes(vec![0xab; len]);
            assert_eq!(roundtrip(&value), value);
        }
    }

    #[test]
    fn test_roundtrip_containers() {
        let value = PackedValue::Array(vec![
            PackedValue::Nil,
            PackedValue::Int(-7),
            PackedValue::Bytes(b"hello".to_vec()),
            PackedValue::Map(vec![(
                PackedValue::Bytes(b"key".to_vec()),
                PackedValue::Uint(9),
            )]),
        ]);
        assert_eq!(roundtrip(&value), value);

        let big = PackedValue::Array((0..40).map(PackedValue::Int).collect());
        assert_eq!(roundtrip(&big), big);
    }

    #[test]
    fn test_signed_nonnegative_equals_unsigned() {
        // A non-negative signed value is packed in the unsigned family; the
        // numeric equality of PackedValue keeps the round-trip law intact.
        assert_eq!(roundtrip(&PackedValue::Int(5)), PackedValue::Uint(5));
        assert_eq!(PackedValue::Int(5), PackedValue::Uint(5));
    }

    #[test]
    fn test_typed_roundtrip() {
        let mut buf = BytesMut::new();
        pack(&mut buf, &-42i64);
        pack(&mut buf, &"hello");
        pack(&mut buf, &vec![1u64, 2, 3]);
        let mut cursor = Cursor::new(&buf[..]);
        assert_eq!(unpack::<i64>(&mut cursor).unwrap(), -42);
        assert_eq!(unpack::<String>(&mut cursor).unwrap(), "hello");
        assert_eq!(unpack::<Vec<u64>>(&mut cursor).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_short_read() {
        let mut buf = BytesMut::new();
        pack(&mut buf, &PackedValue::Bytes(vec![1; 100]));
        for cut in 0..buf.len() {
            let mut cursor = Cursor::new(&buf[..cut]);
            assert_eq!(decode_value(&mut cursor), Err(CodecError::ShortRead));
        }
    }

    #[test]
    fn test_malformed_length() {
        // str32 with a 1 GiB declared length
        let input = [0xdb, 0x40, 0x00, 0x00, 0x00];
        let mut cursor = Cursor::new(&input[..]);
        assert!(matches!(
            decode_value(&mut cursor),
            Err(CodecError::MalformedLength { .. })
        ));
    }

    #[test]
    fn test_arbitrary_input_never_panics() {
        // A cheap xorshift gives deterministic junk without a rng dependency.
        let mut state = 0x9e3779b97f4a7c15u64;
        let mut junk = Vec::with_capacity(4096);
        for _ in 0..4096 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            junk.push(state as u8);
        }
        for start in 0..junk.len().min(512) {
            let mut cursor = Cursor::new(&junk[start..]);
            let _ = decode_value(&mut cursor);
        }
    }

    #[test]
    fn test_type_mismatch() {
        let mut buf = BytesMut::new();
        pack(&mut buf, &true);
        let mut cursor = Cursor::new(&buf[..]);
        assert!(matches!(
            unpack::<i64>(&mut cursor),
            Err(CodecError::TypeMismatch { .. })
        ));
    }
}
