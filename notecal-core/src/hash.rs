//! Content hashing for projected events.
//!
//! Fields are fed in a fixed order, each encoded as a presence byte, a
//! big-endian u64 length and the raw UTF-8 bytes, so moving bytes from one
//! field into its neighbour always changes the digest.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Bumped whenever the encoding or the field list changes.
const HASH_VERSION: &[u8] = b"notecal-event-v1";

/// Lowercase hex SHA-256 digest of an event's rendered fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ContentHash {
    fn from(value: String) -> Self {
        ContentHash(value)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct ContentHasher {
    hasher: Sha256,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentHasher {
    pub fn new() -> Self {
        let mut hasher = Sha256::new();
        hasher.update(HASH_VERSION);
        ContentHasher { hasher }
    }

    /// Feed one field. `None` and `Some("")` encode differently.
    pub fn field(&mut self, value: Option<&str>) {
        match value {
            None => self.hasher.update([0u8]),
            Some(value) => {
                self.hasher.update([1u8]);
                self.hasher.update((value.len() as u64).to_be_bytes());
                self.hasher.update(value.as_bytes());
            }
        }
    }

    pub fn finish(self) -> ContentHash {
        ContentHash(hex::encode(self.hasher.finalize()))
    }
}
