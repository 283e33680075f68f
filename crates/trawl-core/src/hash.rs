//! Content hashing for graph node identity.
//!
//! Node ids are 128-bit FNV-1 digests rendered as lowercase hex. Only
//! string values (and the string elements of arrays) feed the digest;
//! numbers, booleans, objects and nulls are skipped. Field names are not
//! part of the digest, so two differently named fields holding the same
//! text hash identically.

use std::fmt;

use serde_json::Value;

const OFFSET_BASIS: u128 = 0x6c62_272e_07bb_0142_62b8_2175_6295_c58d;
const PRIME: u128 = 0x0000_0000_0100_0000_0000_0000_0000_013b;

/// Streaming FNV-1 128-bit hasher.
#[derive(Debug, Clone, Copy)]
pub struct Fnv128 {
    state: u128,
}

impl Fnv128 {
    /// Creates a hasher at the FNV offset basis.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: OFFSET_BASIS,
        }
    }

    /// Feeds bytes into the digest.
    pub fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state = self.state.wrapping_mul(PRIME);
            self.state ^= u128::from(byte);
        }
    }

    /// Returns the digest of everything written so far.
    #[must_use]
    pub fn finish(&self) -> ContentHash {
        ContentHash(self.state.to_be_bytes())
    }
}

impl Default for Fnv128 {
    fn default() -> Self {
        Self::new()
    }
}

/// 16-byte content digest identifying a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Raw digest bytes (big-endian).
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Lowercase hex rendering used as the node id.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Hashes the given values in iteration order.
pub fn content_hash<'a, I>(values: I) -> ContentHash
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut hasher = Fnv128::new();
    for value in values {
        match value {
            Value::String(s) => hasher.write(s.as_bytes()),
            Value::Array(elements) => {
                for element in elements {
                    if let Value::String(s) = element {
                        hasher.write(s.as_bytes());
                    }
                }
            }
            _ => {}
        }
    }
    hasher.finish()
}
