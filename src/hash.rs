use std::fmt;
use std::io::Read;

use xxhash_rust::xxh64::Xxh64;

use crate::error::VfsError;

/// A stable, fixed-width content hash.
///
/// Stored as the raw little-endian bytes of the underlying digest so it stays
/// `Copy` and cheap to use as a map key, rather than paying for a heap-allocated
/// string on every lookup.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; 8]);

impl ContentHash {
    pub fn from_u64(value: u64) -> Self {
        Self(value.to_le_bytes())
    }

    pub fn to_u64(self) -> u64 {
        u64::from_le_bytes(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Computes a stable content hash of a byte stream.
///
/// Deterministic and stable across runs and machines; the only contract the
/// core relies on. Implementations are free to pick any digest.
pub trait Hasher: Send + Sync {
    fn hash(&self, reader: &mut dyn Read) -> Result<ContentHash, VfsError>;
}

/// Reference `Hasher` backed by streaming 64-bit xxHash, matching the format
/// Wabbajack itself uses for content addressing.
#[derive(Debug, Default, Clone, Copy)]
pub struct XxHasher;

impl Hasher for XxHasher {
    fn hash(&self, reader: &mut dyn Read) -> Result<ContentHash, VfsError> {
        let mut hasher = Xxh64::new(0);
        let mut buffer = [0u8; 64 * 1024];

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(ContentHash::from_u64(hasher.digest()))
    }
}
