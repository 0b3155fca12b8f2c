//! AES-256-GCM encryption
//!
//! Every payload the pipeline encrypts goes through this module: segment
//! bodies, encrypted indexes, and wrapped keys. A fresh 96-bit random
//! nonce is drawn per call; the detached tag travels beside the
//! ciphertext in the fixed layout `nonce(12) || tag(16) || ciphertext`.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::{AeadInPlace, Aes256Gcm, KeyInit};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519Public, StaticSecret};

use crate::error::{CryptoError, Result};
use crate::hash::sha256;

/// GCM nonce length in bytes (96 bits)
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag length in bytes
pub const TAG_LEN: usize = 16;

/// Result of one AES-256-GCM encryption
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
    pub ciphertext: Vec<u8>,
}

impl Sealed {
    /// Serialize as `nonce || tag || ciphertext`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + TAG_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse the `nonce || tag || ciphertext` layout
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::MalformedBlob);
        }
        let mut nonce = [0u8; NONCE_LEN];
        let mut tag = [0u8; TAG_LEN];
        nonce.copy_from_slice(&data[..NONCE_LEN]);
        tag.copy_from_slice(&data[NONCE_LEN..NONCE_LEN + TAG_LEN]);
        Ok(Self {
            nonce,
            tag,
            ciphertext: data[NONCE_LEN + TAG_LEN..].to_vec(),
        })
    }
}

/// Encrypt with AES-256-GCM under a fresh random nonce
pub fn encrypt(plaintext: &[u8], key: &[u8; 32]) -> Result<Sealed> {
    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(&nonce), b"", &mut buffer)
        .map_err(|_| CryptoError::EncryptFailed)?;

    Ok(Sealed {
        nonce,
        tag: tag.into(),
        ciphertext: buffer,
    })
}

/// Decrypt and verify. Tampering with any byte of ciphertext or tag
/// fails with [`CryptoError::TagMismatch`].
pub fn decrypt(sealed: &Sealed, key: &[u8; 32]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));

    let mut buffer = sealed.ciphertext.clone();
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(&sealed.nonce),
            b"",
            &mut buffer,
            GenericArray::from_slice(&sealed.tag),
        )
        .map_err(|_| CryptoError::TagMismatch)?;

    Ok(buffer)
}

/// Wrap a 32-byte key for storage under a key-encryption key
pub fn wrap_key(key: &[u8; 32], wrapping_key: &[u8; 32]) -> Result<Vec<u8>> {
    Ok(encrypt(key, wrapping_key)?.to_bytes())
}

/// Unwrap a key previously wrapped with [`wrap_key`]
pub fn unwrap_key(wrapped: &[u8], wrapping_key: &[u8; 32]) -> Result<[u8; 32]> {
    let sealed = Sealed::from_bytes(wrapped)?;
    let plain = decrypt(&sealed, wrapping_key).map_err(|_| CryptoError::WrapFailed)?;
    plain.try_into().map_err(|_| CryptoError::WrapFailed)
}

// ============================================================================
// Asymmetric key wrap (X25519 + AES-GCM)
// ============================================================================

/// X25519 public key length prefixing an asymmetric wrap
pub const ECIES_PREFIX_LEN: usize = 32;

/// Wrap a 32-byte key toward a recipient's X25519 public key.
/// Layout: `ephemeral_public(32) || nonce || tag || ciphertext`.
pub fn wrap_key_for(key: &[u8; 32], recipient_public: &[u8; 32]) -> Result<Vec<u8>> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = X25519Public::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&X25519Public::from(*recipient_public));

    // KDF the raw DH output before use as an AES key
    let kek = sha256(shared.as_bytes());
    let sealed = encrypt(key, kek.as_bytes())?;

    let mut out = Vec::with_capacity(ECIES_PREFIX_LEN + NONCE_LEN + TAG_LEN + 32);
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&sealed.to_bytes());
    Ok(out)
}

/// Unwrap a key wrapped with [`wrap_key_for`] using the recipient's
/// X25519 secret
pub fn unwrap_key_with(wrapped: &[u8], recipient_secret: &StaticSecret) -> Result<[u8; 32]> {
    if wrapped.len() < ECIES_PREFIX_LEN + NONCE_LEN + TAG_LEN {
        return Err(CryptoError::MalformedBlob);
    }
    let mut ephemeral_public = [0u8; 32];
    ephemeral_public.copy_from_slice(&wrapped[..ECIES_PREFIX_LEN]);

    let shared = recipient_secret.diffie_hellman(&X25519Public::from(ephemeral_public));
    let kek = sha256(shared.as_bytes());

    let sealed = Sealed::from_bytes(&wrapped[ECIES_PREFIX_LEN..])?;
    let plain = decrypt(&sealed, kek.as_bytes()).map_err(|_| CryptoError::WrapFailed)?;
    plain.try_into().map_err(|_| CryptoError::WrapFailed)
}
