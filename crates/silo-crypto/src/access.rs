//! Share access control
//!
//! Three access levels, three key derivations:
//!
//! - PUBLIC: key = `sha256(share_id || folder_id)`; holding the share ID
//!   is holding the key
//! - PRIVATE: a random key wrapped once per authorized user under the
//!   user's X25519 public key; membership is checked by a Schnorr-style
//!   challenge-response over Ed25519
//! - PROTECTED: key = `scrypt(password, salt)` with the costs stored on
//!   the publication; a wrong password surfaces as a GCM tag failure on
//!   the encrypted index
//!
//! Verification happens entirely in the local client after retrieving
//! the encrypted index, so the carrier never learns which user accessed
//! which share.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::cipher::{unwrap_key_with, wrap_key_for};
use crate::error::{CryptoError, Result};
use crate::hash::sha256_concat;
use crate::identity::UserKeys;
use crate::kdf::derive_scrypt_raw;
use crate::sign;
use silo_core::config::KdfSettings;
use silo_core::types::{AuthorizedUser, FolderId, Sha256Digest, ShareId, ShareKdf};

/// PUBLIC share key: derivable by anyone who holds the share ID
pub fn share_key_public(share_id: &ShareId, folder_id: &FolderId) -> [u8; 32] {
    *sha256_concat(&[share_id.as_str().as_bytes(), folder_id.as_bytes()]).as_bytes()
}

/// Fresh random key for a PRIVATE share
pub fn mint_private_share_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

/// Mint the KDF parameters persisted on a PROTECTED share (random salt;
/// costs from configuration). The password itself is never stored.
pub fn mint_share_kdf(settings: &KdfSettings) -> ShareKdf {
    let mut salt = [0u8; 32];
    OsRng.fill_bytes(&mut salt);
    ShareKdf {
        salt,
        scrypt_log_n: settings.scrypt_log_n,
        scrypt_r: settings.scrypt_r,
        scrypt_p: settings.scrypt_p,
    }
}

/// PROTECTED share key from a password and the stored parameters
pub fn share_key_protected(password: &str, kdf: &ShareKdf) -> Result<[u8; 32]> {
    derive_scrypt_raw(
        password.as_bytes(),
        &kdf.salt,
        kdf.scrypt_log_n,
        kdf.scrypt_r,
        kdf.scrypt_p,
    )
}

/// Commitment hiding an authorized user: `sha256(share_id || ed25519_pub)`
pub fn commitment(share_id: &ShareId, ed25519_public: &[u8; 32]) -> Sha256Digest {
    sha256_concat(&[share_id.as_str().as_bytes(), ed25519_public])
}

/// Build the membership row for one authorized user: commitment plus
/// the share key wrapped toward the user's X25519 key
pub fn authorize_user(
    share_id: &ShareId,
    ed25519_public: &[u8; 32],
    x25519_public: &[u8; 32],
    share_key: &[u8; 32],
) -> Result<AuthorizedUser> {
    Ok(AuthorizedUser {
        share_id: share_id.clone(),
        commitment: commitment(share_id, ed25519_public),
        ed25519_public: *ed25519_public,
        wrapped_share_key: wrap_key_for(share_key, x25519_public)?,
    })
}

/// 256-bit random challenge for the challenge-response flow
pub fn mint_challenge() -> [u8; 32] {
    let mut challenge = [0u8; 32];
    OsRng.fill_bytes(&mut challenge);
    challenge
}

/// Prover side: sign `challenge || share_id` with the user signing key
pub fn prove_access(user: &UserKeys, challenge: &[u8; 32], share_id: &ShareId) -> [u8; 64] {
    let mut message = Vec::with_capacity(32 + share_id.as_str().len());
    message.extend_from_slice(challenge);
    message.extend_from_slice(share_id.as_str().as_bytes());
    sign::sign(&message, &user.signing)
}

/// Verifier side: recompute the commitment from the presented public
/// key, require membership in the authorized set, then verify the
/// signature over `challenge || share_id`.
pub fn verify_access<'a>(
    authorized: &'a [AuthorizedUser],
    presented_public: &[u8; 32],
    challenge: &[u8; 32],
    share_id: &ShareId,
    signature: &[u8; 64],
) -> Result<&'a AuthorizedUser> {
    let presented = commitment(share_id, presented_public);
    let entry = authorized
        .iter()
        .find(|a| a.commitment == presented)
        .ok_or(CryptoError::AccessDenied)?;

    let mut message = Vec::with_capacity(32 + share_id.as_str().len());
    message.extend_from_slice(challenge);
    message.extend_from_slice(share_id.as_str().as_bytes());

    sign::verify(&message, signature, &entry.ed25519_public)
        .map_err(|_| CryptoError::AccessDenied)?;
    Ok(entry)
}

/// Recover the share key from an authorized row with the user's X25519
/// secret
pub fn recover_share_key(entry: &AuthorizedUser, user: &UserKeys) -> Result<[u8; 32]> {
    unwrap_key_with(&entry.wrapped_share_key, &user.encryption)
}
