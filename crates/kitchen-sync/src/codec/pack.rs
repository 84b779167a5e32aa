//! Value encoding.

use bytes::{BufMut, BytesMut};

use super::value::PackedValue;

/// Types that can be encoded as a single packed value.
pub trait Pack {
    fn pack_into(&self, out: &mut BytesMut);
}

/// Encode one value onto the end of `out`.
pub fn pack<T: Pack + ?Sized>(out: &mut BytesMut, value: &T) {
    value.pack_into(out);
}

pub fn pack_nil(out: &mut BytesMut) {
    out.put_u8(0xc0);
}

pub fn pack_bool(out: &mut BytesMut, value: bool) {
    out.put_u8(if value { 0xc3 } else { 0xc2 });
}

/// Encode an unsigned integer in its smallest representation.
pub fn pack_uint(out: &mut BytesMut, value: u64) {
    if value < 0x80 {
        out.put_u8(value as u8);
    } else if value <= u8::MAX as u64 {
        out.put_u8(0xcc);
        out.put_u8(value as u8);
    } else if value <= u16::MAX as u64 {
        out.put_u8(0xcd);
        out.put_u16(value as u16);
    } else if value <= u32::MAX as u64 {
        out.put_u8(0xce);
        out.put_u32(value as u32);
    } else {
        out.put_u8(0xcf);
        out.put_u64(value);
    }
}

/// Encode a signed integer in its smallest representation.
///
/// Non-negative values use the unsigned family, which is the canonical
/// encoding for them.
pub fn pack_int(out: &mut BytesMut, value: i64) {
    if value >= 0 {
        pack_uint(out, value as u64);
    } else if value >= -32 {
        out.put_u8(value as u8); // negative fixint
    } else if value >= i8::MIN as i64 {
        out.put_u8(0xd0);
        out.put_i8(value as i8);
    } else if value >= i16::MIN as i64 {
        out.put_u8(0xd1);
        out.put_i16(value as i16);
    } else if value >= i32::MIN as i64 {
        out.put_u8(0xd2);
        out.put_i32(value as i32);
    } else {
        out.put_u8(0xd3);
        out.put_i64(value);
    }
}

pub fn pack_float32(out: &mut BytesMut, value: f32) {
    out.put_u8(0xca);
    out.put_f32(value);
}

pub fn pack_float64(out: &mut BytesMut, value: f64) {
    out.put_u8(0xcb);
    out.put_f64(value);
}

/// Encode a byte string with an explicit length prefix.
pub fn pack_bytes(out: &mut BytesMut, value: &[u8]) {
    let len = value.len();
    if len < 32 {
        out.put_u8(0xa0 | len as u8);
    } else if len <= u8::MAX as usize {
        out.put_u8(0xd9);
        out.put_u8(len as u8);
    } else if len <= u16::MAX as usize {
        out.put_u8(0xda);
        out.put_u16(len as u16);
    } else {
        out.put_u8(0xdb);
        out.put_u32(len as u32);
    }
    out.put_slice(value);
}

/// Encode an array header; the caller packs the elements afterwards.
pub fn pack_array_length(out: &mut BytesMut, len: usize) {
    if len < 16 {
        out.put_u8(0x90 | len as u8);
    } else if len <= u16::MAX as usize {
        out.put_u8(0xdc);
        out.put_u16(len as u16);
    } else {
        out.put_u8(0xdd);
        out.put_u32(len as u32);
    }
}

/// Encode a map header; the caller packs the key/value pairs afterwards.
pub fn pack_map_length(out: &mut BytesMut, len: usize) {
    if len < 16 {
        out.put_u8(0x80 | len as u8);
    } else if len <= u16::MAX as usize {
        out.put_u8(0xde);
        out.put_u16(len as u16);
    } else {
        out.put_u8(0xdf);
        out.put_u32(len as u32);
    }
}

impl Pack for PackedValue {
    fn pack_into(&self, out: &mut BytesMut) {
        match self {
            PackedValue::Nil => pack_nil(out),
            PackedValue::Bool(v) => pack_bool(out, *v),
            PackedValue::Int(v) => pack_int(out, *v),
            PackedValue::Uint(v) => pack_uint(out, *v),
            PackedValue::Float32(v) => pack_float32(out, *v),
            PackedValue::Float64(v) => pack_float64(out, *v),
            PackedValue::Bytes(v) => pack_bytes(out, v),
            PackedValue::Array(items) => {
                pack_array_length(out, items.len());
                for item in items {
                    item.pack_into(out);
                }
            }
            PackedValue::Map(entries) => {
                pack_map_length(out, entries.len());
                for (key, value) in entries {
                    key.pack_into(out);
                    value.pack_into(out);
                }
            }
        }
    }
}

impl Pack for bool {
    fn pack_into(&self, out: &mut BytesMut) {
        pack_bool(out, *self);
    }
}

impl Pack for i32 {
    fn pack_into(&self, out: &mut BytesMut) {
        pack_int(out, *self as i64);
    }
}

impl Pack for i64 {
    fn pack_into(&self, out: &mut BytesMut) {
        pack_int(out, *self);
    }
}

impl Pack for u32 {
    fn pack_into(&self, out: &mut BytesMut) {
        pack_uint(out, *self as u64);
    }
}

impl Pack for u64 {
    fn pack_into(&self, out: &mut BytesMut) {
        pack_uint(out, *self);
    }
}

impl Pack for usize {
    fn pack_into(&self, out: &mut BytesMut) {
        pack_uint(out, *self as u64);
    }
}

impl Pack for f32 {
    fn pack_into(&self, out: &mut BytesMut) {
        pack_float32(out, *self);
    }
}

impl Pack for f64 {
    fn pack_into(&self, out: &mut BytesMut) {
        pack_float64(out, *self);
    }
}

impl Pack for str {
    fn pack_into(&self, out: &mut BytesMut) {
        pack_bytes(out, self.as_bytes());
    }
}

impl Pack for String {
    fn pack_into(&self, out: &mut BytesMut) {
        pack_bytes(out, self.as_bytes());
    }
}

impl<T: Pack> Pack for Vec<T> {
    fn pack_into(&self, out: &mut BytesMut) {
        pack_array_length(out, self.len());
        for item in self {
            item.pack_into(out);
        }
    }
}

impl<T: Pack> Pack for [T] {
    fn pack_into(&self, out: &mut BytesMut) {
        pack_array_length(out, self.len());
        for item in self {
            item.pack_into(out);
        }
    }
}

impl<T: Pack> Pack for Option<T> {
    fn pack_into(&self, out: &mut BytesMut) {
        match self {
            Some(value) => value.pack_into(out),
            None => pack_nil(out),
        }
    }
}

impl<T: Pack + ?Sized> Pack for &T {
    fn pack_into(&self, out: &mut BytesMut) {
        (*self).pack_into(out);
    }
}
