//! SHA-256 content hashing.
//!
//! Content addressing keys every stored blob by the SHA-256 digest of its
//! canonical byte image. Digests render as lower-case hex.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte SHA-256 digest used as a content address.
///
/// # Example
///
/// ```rust
/// use castor_common::hash::sha256;
///
/// let a = sha256(b"apple");
/// let b = sha256(b"apple");
/// assert_eq!(a, b);
/// assert_ne!(a, sha256(b"banana"));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// The all-zero digest, used before a page's hashes are computed.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Creates a digest from raw bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Renders the digest as a lower-case hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for byte in &self.0 {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Abbreviate to the first 8 hex chars for readable logs.
        let hex = self.to_hex();
        write!(f, "ContentHash({}..)", &hex[..8])
    }
}

/// Computes the SHA-256 digest of a byte buffer.
#[must_use]
pub fn sha256(data: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    ContentHash(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        assert_eq!(sha256(b"hello"), sha256(b"hello"));
        assert_ne!(sha256(b"hello"), sha256(b"world"));
    }

    #[test]
    fn test_known_vector() {
        // SHA-256 of the empty string.
        assert_eq!(
            sha256(b"").to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hex_length() {
        assert_eq!(sha256(b"x").to_hex().len(), 64);
    }

    #[test]
    fn test_usable_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(sha256(b"a"), 1);
        map.insert(sha256(b"b"), 2);
        assert_eq!(map.get(&sha256(b"a")), Some(&1));
    }
}
