//! Ed25519 signing
//!
//! Thin wrappers over ed25519-dalek so the rest of the pipeline deals in
//! fixed-size byte arrays rather than dalek types.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::{CryptoError, Result};

/// Ed25519 signature length
pub const SIGNATURE_LEN: usize = 64;

/// Generate a fresh keypair
pub fn generate_keypair() -> (SigningKey, [u8; 32]) {
    let signing = SigningKey::generate(&mut OsRng);
    let public = signing.verifying_key().to_bytes();
    (signing, public)
}

/// Rebuild a signing key from its 32 secret bytes
pub fn signing_key_from_bytes(bytes: &[u8; 32]) -> SigningKey {
    SigningKey::from_bytes(bytes)
}

/// Sign a message
pub fn sign(message: &[u8], signing: &SigningKey) -> [u8; SIGNATURE_LEN] {
    signing.sign(message).to_bytes()
}

/// Verify a signature against a public key
pub fn verify(message: &[u8], signature: &[u8; SIGNATURE_LEN], public: &[u8; 32]) -> Result<()> {
    let key = VerifyingKey::from_bytes(public)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let sig = Signature::from_bytes(signature);
    key.verify(message, &sig)
        .map_err(|_| CryptoError::SignatureInvalid)
}
