//! Decoded-but-uninterpreted wire values.

/// Any value after decoding and before interpretation.
///
/// Row cells travel as `PackedValue`s because their concrete type is learned
/// from the schema, not from the stream. Integers keep their signed/unsigned
/// encoding family, but equality is numeric across the two, matching the
/// canonical encoding (non-negative values always pack unsigned).
#[derive(Debug, Clone)]
pub enum PackedValue {
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float32(f32),
    Float64(f64),
    Bytes(Vec<u8>),
    Array(Vec<PackedValue>),
    Map(Vec<(PackedValue, PackedValue)>),
}

impl PackedValue {
    /// Build a byte-string value from UTF-8 text.
    pub fn from_str(s: &str) -> Self {
        PackedValue::Bytes(s.as_bytes().to_vec())
    }

    /// True if this is the nil value.
    pub fn is_nil(&self) -> bool {
        matches!(self, PackedValue::Nil)
    }

    /// View a byte-string value as UTF-8 text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PackedValue::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// View a byte-string value's raw bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PackedValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PackedValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric view as i64, if the value is an integer that fits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PackedValue::Int(v) => Some(*v),
            PackedValue::Uint(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Numeric view as u64, if the value is a non-negative integer.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            PackedValue::Uint(v) => Some(*v),
            PackedValue::Int(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PackedValue]> {
        match self {
            PackedValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(PackedValue, PackedValue)]> {
        match self {
            PackedValue::Map(entries) => Some(entries),
            _ => None,
        }
    }
}

impl PartialEq for PackedValue {
    fn eq(&self, other: &Self) -> bool {
        use PackedValue::*;
        match (self, other) {
            (Nil, Nil) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Uint(a), Uint(b)) => a == b,
            (Int(a), Uint(b)) | (Uint(b), Int(a)) => *a >= 0 && *a as u64 == *b,
            (Float32(a), Float32(b)) => a == b,
            (Float64(a), Float64(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for PackedValue {
    fn from(s: &str) -> Self {
        PackedValue::from_str(s)
    }
}

impl From<String> for PackedValue {
    fn from(s: String) -> Self {
        PackedValue::Bytes(s.into_bytes())
    }
}

impl From<u64> for PackedValue {
    fn from(v: u64) -> Self {
        PackedValue::Uint(v)
    }
}

impl From<i64> for PackedValue {
    fn from(v: i64) -> Self {
        PackedValue::Int(v)
    }
}

impl From<bool> for PackedValue {
    fn from(v: bool) -> Self {
        PackedValue::Bool(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_equality_across_families() {
        assert_eq!(PackedValue::Int(7), PackedValue::Uint(7));
        assert_ne!(PackedValue::Int(-7), PackedValue::Uint(7));
        assert_ne!(PackedValue::Uint(u64::MAX), PackedValue::Int(-1));
    }

    #[test]
    fn test_accessors() {
        let v = PackedValue::from_str("abc");
        assert_eq!(v.as_str(), Some("abc"));
        assert_eq!(v.as_bytes(), Some(&b"abc"[..]));
        assert_eq!(v.as_i64(), None);

        assert_eq!(PackedValue::Uint(3).as_i64(), Some(3));
        assert_eq!(PackedValue::Int(-3).as_u64(), None);
        assert!(PackedValue::Nil.is_nil());
    }
}
