//! Row-block hashing.

use std::hash::Hasher as _;

use twox_hash::XxHash64;

use crate::codec::PackedValue;
use crate::error::{Result, SyncError};
use crate::protocol::FIRST_BLAKE3_VERSION;

/// The hash algorithms the protocol can request for row blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    XxHash64,
    Blake3,
}

impl HashAlgorithm {
    /// The default algorithm at a negotiated protocol version.
    pub fn for_version(version: u32) -> Self {
        if version >= FIRST_BLAKE3_VERSION {
            HashAlgorithm::Blake3
        } else {
            HashAlgorithm::XxHash64
        }
    }

    /// Decode the algorithm argument of a `hash` command.
    ///
    /// Accepts a numeric code or a name; nil falls back to the version
    /// default.
    pub fn from_wire(value: &PackedValue, version: u32) -> Result<Self> {
        match value {
            PackedValue::Nil => Ok(Self::for_version(version)),
            _ => {
                if let Some(code) = value.as_u64() {
                    match code {
                        0 => Ok(HashAlgorithm::XxHash64),
                        1 => Ok(HashAlgorithm::Blake3),
                        other => Err(SyncError::wire(format!(
                            "unknown hash algorithm code {other}"
                        ))),
                    }
                } else if let Some(name) = value.as_str() {
                    match name {
                        "xxh64" => Ok(HashAlgorithm::XxHash64),
                        "blake3" => Ok(HashAlgorithm::Blake3),
                        other => Err(SyncError::wire(format!(
                            "unknown hash algorithm {other}"
                        ))),
                    }
                } else {
                    Err(SyncError::wire("hash algorithm argument is malformed"))
                }
            }
        }
    }
}

enum HasherImpl {
    Xx(XxHash64),
    Blake3(Box<blake3::Hasher>),
}

/// Incremental hasher over the packed encoding of a row block.
pub struct RowHasher {
    inner: HasherImpl,
}

impl RowHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let inner = match algorithm {
            HashAlgorithm::XxHash64 => HasherImpl::Xx(XxHash64::with_seed(0)),
            HashAlgorithm::Blake3 => HasherImpl::Blake3(Box::new(blake3::Hasher::new())),
        };
        Self { inner }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match &mut self.inner {
            HasherImpl::Xx(hasher) => hasher.write(bytes),
            HasherImpl::Blake3(hasher) => {
                hasher.update(bytes);
            }
        }
    }

    /// Finish and return the digest bytes (8 for xxHash64, 32 for BLAKE3).
    pub fn finish(self) -> Vec<u8> {
        match self.inner {
            HasherImpl::Xx(hasher) => hasher.finish().to_be_bytes().to_vec(),
            HasherImpl::Blake3(hasher) => hasher.finalize().as_bytes().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_default() {
        assert_eq!(HashAlgorithm::for_version(7), HashAlgorithm::XxHash64);
        assert_eq!(HashAlgorithm::for_version(8), HashAlgorithm::XxHash64);
        assert_eq!(HashAlgorithm::for_version(9), HashAlgorithm::Blake3);
    }

    #[test]
    fn test_from_wire() {
        assert_eq!(
            HashAlgorithm::from_wire(&PackedValue::Uint(0), 9).unwrap(),
            HashAlgorithm::XxHash64
        );
        assert_eq!(
            HashAlgorithm::from_wire(&PackedValue::from_str("blake3"), 8).unwrap(),
            HashAlgorithm::Blake3
        );
        assert_eq!(
            HashAlgorithm::from_wire(&PackedValue::Nil, 9).unwrap(),
            HashAlgorithm::Blake3
        );
        assert!(HashAlgorithm::from_wire(&PackedValue::Uint(7), 9).is_err());
        assert!(HashAlgorithm::from_wire(&PackedValue::from_str("md5"), 9).is_err());
    }

    #[test]
    fn test_digest_sizes_and_determinism() {
        let mut a = RowHasher::new(HashAlgorithm::XxHash64);
        a.update(b"hello");
        a.update(b" world");
        let mut b = RowHasher::new(HashAlgorithm::XxHash64);
        b.update(b"hello world");
        let a = a.finish();
        let b = b.finish();
        assert_eq!(a.len(), 8);
        assert_eq!(a, b);

        let mut c = RowHasher::new(HashAlgorithm::Blake3);
        c.update(b"hello world");
        let c = c.finish();
        assert_eq!(c.len(), 32);
        assert_ne!(c[..8], a[..]);
    }
}
