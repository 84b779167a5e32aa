//! Value decoding.

use std::io::Cursor;

use bytes::Buf;

use super::value::PackedValue;
use super::{CodecError, MAX_BYTES_LENGTH, MAX_ELEMENTS};

/// Types that can be decoded from a single packed value.
pub trait Unpack: Sized {
    fn unpack_from(input: &mut Cursor<&[u8]>) -> Result<Self, CodecError>;
}

/// Decode one value of type `T` from the cursor.
///
/// On failure the cursor position is unspecified; callers that need
/// all-or-nothing semantics decode from a fresh cursor and only commit the
/// consumed length on success (see the framed stream).
pub fn unpack<T: Unpack>(input: &mut Cursor<&[u8]>) -> Result<T, CodecError> {
    T::unpack_from(input)
}

fn need(input: &Cursor<&[u8]>, len: usize) -> Result<(), CodecError> {
    if input.remaining() < len {
        Err(CodecError::ShortRead)
    } else {
        Ok(())
    }
}

fn read_length(input: &mut Cursor<&[u8]>, width: usize) -> Result<u64, CodecError> {
    need(input, width)?;
    Ok(match width {
        1 => input.get_u8() as u64,
        2 => input.get_u16() as u64,
        _ => input.get_u32() as u64,
    })
}

fn checked_bytes_length(length: u64) -> Result<usize, CodecError> {
    if length > MAX_BYTES_LENGTH {
        Err(CodecError::MalformedLength { length })
    } else {
        Ok(length as usize)
    }
}

fn checked_element_count(length: u64) -> Result<usize, CodecError> {
    if length > MAX_ELEMENTS {
        Err(CodecError::MalformedLength { length })
    } else {
        Ok(length as usize)
    }
}

fn read_bytes(input: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>, CodecError> {
    need(input, len)?;
    let mut out = vec![0u8; len];
    input.copy_to_slice(&mut out);
    Ok(out)
}

fn read_array(input: &mut Cursor<&[u8]>, len: usize) -> Result<PackedValue, CodecError> {
    let mut items = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        items.push(decode_value(input)?);
    }
    Ok(PackedValue::Array(items))
}

fn read_map(input: &mut Cursor<&[u8]>, len: usize) -> Result<PackedValue, CodecError> {
    let mut entries = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        let key = decode_value(input)?;
        let value = decode_value(input)?;
        entries.push((key, value));
    }
    Ok(PackedValue::Map(entries))
}

/// Decode the next value, whatever its type.
pub fn decode_value(input: &mut Cursor<&[u8]>) -> Result<PackedValue, CodecError> {
    need(input, 1)?;
    let tag = input.get_u8();
    match tag {
        0x00..=0x7f => Ok(PackedValue::Uint(tag as u64)),
        0xe0..=0xff => Ok(PackedValue::Int(tag as i8 as i64)),
        0xc0 => Ok(PackedValue::Nil),
        0xc2 => Ok(PackedValue::Bool(false)),
        0xc3 => Ok(PackedValue::Bool(true)),
        0xcc => {
            need(input, 1)?;
            Ok(PackedValue::Uint(input.get_u8() as u64))
        }
        0xcd => {
            need(input, 2)?;
            Ok(PackedValue::Uint(input.get_u16() as u64))
        }
        0xce => {
            need(input, 4)?;
            Ok(PackedValue::Uint(input.get_u32() as u64))
        }
        0xcf => {
            need(input, 8)?;
            Ok(PackedValue::Uint(input.get_u64()))
        }
        0xd0 => {
            need(input, 1)?;
            Ok(PackedValue::Int(input.get_i8() as i64))
        }
        0xd1 => {
            need(input, 2)?;
            Ok(PackedValue::Int(input.get_i16() as i64))
        }
        0xd2 => {
            need(input, 4)?;
            Ok(PackedValue::Int(input.get_i32() as i64))
        }
        0xd3 => {
            need(input, 8)?;
            Ok(PackedValue::Int(input.get_i64()))
        }
        0xca => {
            need(input, 4)?;
            Ok(PackedValue::Float32(input.get_f32()))
        }
        0xcb => {
            need(input, 8)?;
            Ok(PackedValue::Float64(input.get_f64()))
        }
        0xa0..=0xbf => {
            let len = (tag & 0x1f) as usize;
            Ok(PackedValue::Bytes(read_bytes(input, len)?))
        }
        0xd9 | 0xc4 => {
            let len = checked_bytes_length(read_length(input, 1)?)?;
            Ok(PackedValue::Bytes(read_bytes(input, len)?))
        }
        0xda | 0xc5 => {
            let len = checked_bytes_length(read_length(input, 2)?)?;
            Ok(PackedValue::Bytes(read_bytes(input, len)?))
        }
        0xdb | 0xc6 => {
            let len = checked_bytes_length(read_length(input, 4)?)?;
            Ok(PackedValue::Bytes(read_bytes(input, len)?))
        }
        0x90..=0x9f => read_array(input, (tag & 0x0f) as usize),
        0xdc => {
            let len = checked_element_count(read_length(input, 2)?)?;
            read_array(input, len)
        }
        0xdd => {
            let len = checked_element_count(read_length(input, 4)?)?;
            read_array(input, len)
        }
        0x80..=0x8f => read_map(input, (tag & 0x0f) as usize),
        0xde => {
            let len = checked_element_count(read_length(input, 2)?)?;
            read_map(input, len)
        }
        0xdf => {
            let len = checked_element_count(read_length(input, 4)?)?;
            read_map(input, len)
        }
        _ => Err(CodecError::TypeMismatch {
            expected: "a packed value",
            tag,
        }),
    }
}

impl Unpack for PackedValue {
    fn unpack_from(input: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        decode_value(input)
    }
}

impl Unpack for bool {
    fn unpack_from(input: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        match decode_value(input)? {
            PackedValue::Bool(v) => Ok(v),
            other => Err(mismatch("a boolean", &other)),
        }
    }
}

impl Unpack for i64 {
    fn unpack_from(input: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let value = decode_value(input)?;
        value.as_i64().ok_or_else(|| mismatch("a signed integer", &value))
    }
}

impl Unpack for u64 {
    fn unpack_from(input: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let value = decode_value(input)?;
        value
            .as_u64()
            .ok_or_else(|| mismatch("an unsigned integer", &value))
    }
}

impl Unpack for u32 {
    fn unpack_from(input: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let value = u64::unpack_from(input)?;
        u32::try_from(value).map_err(|_| CodecError::TypeMismatch {
            expected: "a 32-bit unsigned integer",
            tag: 0xcf,
        })
    }
}

impl Unpack for usize {
    fn unpack_from(input: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let value = u64::unpack_from(input)?;
        usize::try_from(value).map_err(|_| CodecError::MalformedLength { length: value })
    }
}

impl Unpack for String {
    fn unpack_from(input: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        match decode_value(input)? {
            PackedValue::Bytes(bytes) => {
                String::from_utf8(bytes).map_err(|_| CodecError::TypeMismatch {
                    expected: "a UTF-8 string",
                    tag: 0xd9,
                })
            }
            other => Err(mismatch("a byte string", &other)),
        }
    }
}

impl<T: Unpack> Unpack for Vec<T> {
    fn unpack_from(input: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        // Decode the header directly so element decoding can stay typed.
        need(input, 1)?;
        let tag = input.get_u8();
        let len = match tag {
            0x90..=0x9f => (tag & 0x0f) as usize,
            0xdc => checked_element_count(read_length(input, 2)?)?,
            0xdd => checked_element_count(read_length(input, 4)?)?,
            _ => {
                return Err(CodecError::TypeMismatch {
                    expected: "an array",
                    tag,
                })
            }
        };
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(T::unpack_from(input)?);
        }
        Ok(items)
    }
}

impl<T: Unpack> Unpack for Option<T> {
    fn unpack_from(input: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        // Peek for nil without consuming a non-nil value's tag.
        need(input, 1)?;
        let position = input.position();
        if input.get_u8() == 0xc0 {
            return Ok(None);
        }
        input.set_position(position);
        T::unpack_from(input).map(Some)
    }
}

fn mismatch(expected: &'static str, found: &PackedValue) -> CodecError {
    let tag = match found {
        PackedValue::Nil => 0xc0,
        PackedValue::Bool(false) => 0xc2,
        PackedValue::Bool(true) => 0xc3,
        PackedValue::Int(_) => 0xd3,
        PackedValue::Uint(_) => 0xcf,
        PackedValue::Float32(_) => 0xca,
        PackedValue::Float64(_) => 0xcb,
        PackedValue::Bytes(_) => 0xd9,
        PackedValue::Array(_) => 0xdc,
        PackedValue::Map(_) => 0xde,
    };
    CodecError::TypeMismatch { expected, tag }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::pack::{pack, pack_nil};
    use bytes::BytesMut;

    #[test]
    fn test_accepts_bin_family() {
        // bin8 with 3 payload bytes
        let input = [0xc4, 0x03, 0x01, 0x02, 0x03];
        let mut cursor = Cursor::new(&input[..]);
        assert_eq!(
            decode_value(&mut cursor).unwrap(),
            PackedValue::Bytes(vec![1, 2, 3])
        );
    }

    #[test]
    fn test_option_roundtrip() {
        let mut buf = BytesMut::new();
        pack_nil(&mut buf);
        pack(&mut buf, &42u64);
        let mut cursor = Cursor::new(&buf[..]);
        assert_eq!(unpack::<Option<u64>>(&mut cursor).unwrap(), None);
        assert_eq!(unpack::<Option<u64>>(&mut cursor).unwrap(), Some(42));
    }

    #[test]
    fn test_reserved_tag_is_type_mismatch() {
        let input = [0xc1];
        let mut cursor = Cursor::new(&input[..]);
        assert!(matches!(
            decode_value(&mut cursor),
            Err(CodecError::TypeMismatch { tag: 0xc1, .. })
        ));
    }

    #[test]
    fn test_uint_too_large_for_i64() {
        let mut buf = BytesMut::new();
        pack(&mut buf, &u64::MAX);
        let mut cursor = Cursor::new(&buf[..]);
        assert!(matches!(
            unpack::<i64>(&mut cursor),
            Err(CodecError::TypeMismatch { .. })
        ));
    }
}
