//! Checksum and content hash types.
//!
//! Two tiers of integrity protection:
//! - [`ChunkChecksum`] is a CRC32 over one chunk, recorded at save time and
//!   recomputed during assembly. It detects corruption, not tampering.
//! - [`ContentHash`] is a SHA-256 over the whole assembled file, carried on
//!   the persisted record.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A CRC32 checksum over one chunk's contents.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkChecksum(u32);

impl ChunkChecksum {
    /// Compute the checksum of chunk data.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(data);
        Self(hasher.finalize())
    }

    /// Create an incremental hasher.
    pub fn hasher() -> ChunkHasher {
        ChunkHasher(crc32fast::Hasher::new())
    }

    /// Get the raw checksum value.
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Parse from a lowercase hex string (8 chars).
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 8 {
            return Err(crate::Error::InvalidHash(format!(
                "expected 8 hex chars, got {}",
                s.len()
            )));
        }
        u32::from_str_radix(s, 16)
            .map(Self)
            .map_err(|e| crate::Error::InvalidHash(e.to_string()))
    }

    /// Encode as lowercase hex string.
    pub fn to_hex(&self) -> String {
        format!("{:08x}", self.0)
    }
}

impl fmt::Debug for ChunkChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkChecksum({})", self.to_hex())
    }
}

impl fmt::Display for ChunkChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental CRC32 hasher.
pub struct ChunkHasher(crc32fast::Hasher);

impl ChunkHasher {
    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the checksum.
    pub fn finalize(self) -> ChunkChecksum {
        ChunkChecksum(self.0.finalize())
    }
}

/// A SHA-256 content hash represented as 32 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Create a new ContentHash from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Compute SHA-256 hash of data.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let result = hasher.finalize();
        Self(result.into())
    }

    /// Create an incremental hasher.
    pub fn hasher() -> ContentHasher {
        ContentHasher(Sha256::new())
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 64 {
            return Err(crate::Error::InvalidHash(format!(
                "expected 64 hex chars, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex_str =
                std::str::from_utf8(chunk).map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
            bytes[i] = u8::from_str_radix(hex_str, 16)
                .map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
        }
        Ok(Self(bytes))
    }

    /// Encode as lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental SHA-256 hasher.
pub struct ContentHasher(Sha256);

impl ContentHasher {
    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> ContentHash {
        ContentHash(self.0.finalize().into())
    }
}
