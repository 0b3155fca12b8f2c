//! Password-based key derivation
//!
//! Scrypt is the default (memory-hard, resists GPU attack); PBKDF2 is
//! the fallback for environments that tune it explicitly. Derived keys
//! are cached per (params, salt, password) because PROTECTED share
//! resolution may derive the same key repeatedly in one session.

use parking_lot::Mutex;
use std::collections::HashMap;
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};
use crate::hash::sha256_concat;
use silo_core::config::KdfSettings;

/// Derive 32 bytes with scrypt
pub fn derive_scrypt(password: &[u8], salt: &[u8], settings: &KdfSettings) -> Result<[u8; 32]> {
    derive_scrypt_raw(
        password,
        salt,
        settings.scrypt_log_n,
        settings.scrypt_r,
        settings.scrypt_p,
    )
}

/// Scrypt with explicit cost parameters (PROTECTED shares carry theirs
/// in the publication record)
pub fn derive_scrypt_raw(
    password: &[u8],
    salt: &[u8],
    log_n: u8,
    r: u32,
    p: u32,
) -> Result<[u8; 32]> {
    let params = scrypt::Params::new(log_n, r, p, 32)
        .map_err(|e| CryptoError::KdfFailed(e.to_string()))?;

    let mut out = [0u8; 32];
    scrypt::scrypt(password, salt, &params, &mut out)
        .map_err(|e| CryptoError::KdfFailed(e.to_string()))?;
    Ok(out)
}

/// Derive 32 bytes with PBKDF2-HMAC-SHA256
pub fn derive_pbkdf2(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(password, salt, iterations, &mut out);
    out
}

/// In-process cache of derived keys, keyed by a digest of the inputs so
/// passwords never sit in the map. Cleared on session end or folder
/// deletion.
pub struct KdfCache {
    entries: Mutex<HashMap<[u8; 32], Zeroizing<[u8; 32]>>>,
}

impl KdfCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Scrypt with memoization
    pub fn scrypt(
        &self,
        password: &[u8],
        salt: &[u8],
        settings: &KdfSettings,
    ) -> Result<[u8; 32]> {
        self.scrypt_raw(
            password,
            salt,
            settings.scrypt_log_n,
            settings.scrypt_r,
            settings.scrypt_p,
        )
    }

    /// Scrypt with explicit costs and memoization
    pub fn scrypt_raw(
        &self,
        password: &[u8],
        salt: &[u8],
        log_n: u8,
        r: u32,
        p: u32,
    ) -> Result<[u8; 32]> {
        let tag = sha256_concat(&[
            b"scrypt",
            &[log_n],
            &r.to_le_bytes(),
            &p.to_le_bytes(),
            salt,
            password,
        ]);

        if let Some(hit) = self.entries.lock().get(tag.as_bytes()) {
            return Ok(**hit);
        }

        let key = derive_scrypt_raw(password, salt, log_n, r, p)?;
        self.entries.lock().insert(*tag.as_bytes(), Zeroizing::new(key));
        Ok(key)
    }

    /// Drop every cached key
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for KdfCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_settings() -> KdfSettings {
        // keep unit tests quick; production defaults are N=16384
        KdfSettings {
            scrypt_log_n: 4,
            scrypt_r: 8,
            scrypt_p: 1,
            pbkdf2_iterations: 1000,
        }
    }

    #[test]
    fn test_scrypt_deterministic() {
        let s = fast_settings();
        let a = derive_scrypt(b"correct horse", b"salt-bytes", &s).unwrap();
        let b = derive_scrypt(b"correct horse", b"salt-bytes", &s).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_scrypt_separates_inputs() {
        let s = fast_settings();
        let base = derive_scrypt(b"correct horse", b"salt-bytes", &s).unwrap();
        assert_ne!(base, derive_scrypt(b"correct house", b"salt-bytes", &s).unwrap());
        assert_ne!(base, derive_scrypt(b"correct horse", b"other-salt", &s).unwrap());
    }

    #[test]
    fn test_pbkdf2_deterministic() {
        let a = derive_pbkdf2(b"password", b"salt", 1000);
        let b = derive_pbkdf2(b"password", b"salt", 1000);
        assert_eq!(a, b);
        assert_ne!(a, derive_pbkdf2(b"password", b"salt", 1001));
    }

    #[test]
    fn test_cache_hits_and_clears() {
        let cache = KdfCache::new();
        let s = fast_settings();

        let first = cache.scrypt(b"pw", b"salt", &s).unwrap();
        assert_eq!(cache.len(), 1);

        let second = cache.scrypt(b"pw", b"salt", &s).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
