//! Cryptographic error types

use thiserror::Error;

/// Result type for cryptographic operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors in cryptographic operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AES-GCM encryption failed (buffer or parameter problem)
    #[error("Encryption failed")]
    EncryptFailed,

    /// AES-GCM tag verification failed; ciphertext or tag was tampered
    #[error("Integrity check failed: GCM tag mismatch")]
    TagMismatch,

    /// Sealed blob too short or structurally invalid
    #[error("Malformed encrypted blob")]
    MalformedBlob,

    /// Key bytes had the wrong length or failed curve validation
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    /// Ed25519 verification failed
    #[error("Signature verification failed")]
    SignatureInvalid,

    /// KDF parameter or derivation failure
    #[error("Key derivation failed: {0}")]
    KdfFailed(String),

    /// Wrapping or unwrapping a key failed
    #[error("Key wrap failed")]
    WrapFailed,

    /// Access proof did not match any authorized commitment
    #[error("Access denied")]
    AccessDenied,
}

impl From<CryptoError> for silo_core::SiloError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::TagMismatch => silo_core::SiloError::GcmTagFailure,
            CryptoError::SignatureInvalid => silo_core::SiloError::SignatureInvalid,
            CryptoError::WrapFailed | CryptoError::MalformedBlob => {
                silo_core::SiloError::KeyWrapFailure
            }
            CryptoError::AccessDenied => silo_core::SiloError::PermissionDenied,
            other => silo_core::SiloError::Crypto(other.to_string()),
        }
    }
}
