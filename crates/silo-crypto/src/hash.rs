//! SHA-256 hashing utilities
//!
//! SHA-256 with 256-bit output is the content address everywhere in the
//! pipeline: file hashes, segment slice hashes, subject derivation, and
//! commitments. Large inputs hash through [`StreamingHasher`] so no file
//! is ever held fully in memory.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use silo_core::Sha256Digest;

type HmacSha256 = Hmac<Sha256>;

/// Hash data with SHA-256
pub fn sha256(data: &[u8]) -> Sha256Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Sha256Digest(hasher.finalize().into())
}

/// Hash multiple items together
pub fn sha256_concat(items: &[&[u8]]) -> Sha256Digest {
    let mut hasher = Sha256::new();
    for item in items {
        hasher.update(item);
    }
    Sha256Digest(hasher.finalize().into())
}

/// HMAC-SHA256 keyed hash
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    // new_from_slice accepts any key length for HMAC
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Incremental hasher for streaming large inputs (default chunking is
/// the caller's concern; the scanner reads 1 MiB at a time)
pub struct StreamingHasher {
    hasher: Sha256,
    bytes: u64,
}

impl StreamingHasher {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    /// Feed a chunk
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes += data.len() as u64;
    }

    /// Total bytes fed so far
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    /// Finalize and get the digest
    pub fn finalize(self) -> Sha256Digest {
        Sha256Digest(self.hasher.finalize().into())
    }
}

impl Default for StreamingHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        // sha256("hello")
        let digest = sha256(b"hello");
        assert_eq!(
            digest.to_hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_streaming_matches_oneshot() {
        let data = b"The quick brown fox jumps over the lazy dog";
        let oneshot = sha256(data);

        let mut hasher = StreamingHasher::new();
        hasher.update(&data[..10]);
        hasher.update(&data[10..]);
        assert_eq!(hasher.bytes_hashed(), data.len() as u64);
        assert_eq!(hasher.finalize(), oneshot);
    }

    #[test]
    fn test_concat_matches_joined() {
        let joined = sha256(b"abcdef");
        let parts = sha256_concat(&[b"abc", b"def"]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn test_hmac_keys_separate() {
        let a = hmac_sha256(b"key-a", b"message");
        let b = hmac_sha256(b"key-b", b"message");
        assert_ne!(a, b);

        // same key, same message is stable
        assert_eq!(a, hmac_sha256(b"key-a", b"message"));
    }
}
