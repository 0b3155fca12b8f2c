//! Publication error types

use thiserror::Error;

/// Result type for publication operations
pub type Result<T> = std::result::Result<T, PublishError>;

/// Errors in publishing and resolving shares
#[derive(Error, Debug)]
pub enum PublishError {
    /// Snapshot has segments that never reached `posted`; publish after
    /// upload completes
    #[error("Folder upload incomplete: {missing} segment(s) not posted")]
    UploadIncomplete { missing: u64 },

    /// Share ID resolves to nothing
    #[error("Unknown share ID: {0}")]
    UnknownShare(silo_core::types::ShareId),

    /// Share exists but its expiry has passed
    #[error("Share expired: {0}")]
    Expired(silo_core::types::ShareId),

    /// Wrong password for a PROTECTED share (GCM tag failed on the
    /// encrypted index)
    #[error("Bad password")]
    BadPassword,

    /// PROTECTED publish attempted without a password
    #[error("Password required for protected shares")]
    PasswordRequired,

    /// Requester is not in a PRIVATE share's authorized set
    #[error("Permission denied")]
    PermissionDenied,

    /// Access level does not support the attempted operation
    #[error("Operation not valid for {0:?} shares")]
    WrongAccessLevel(silo_core::types::AccessLevel),

    /// Encrypted index blob failed to parse after decryption
    #[error("Malformed index blob")]
    MalformedIndex,

    /// Index format from a newer producer
    #[error("Unsupported index format version {0}")]
    UnsupportedFormat(u16),

    #[error(transparent)]
    Store(#[from] silo_store::StoreError),

    #[error(transparent)]
    Crypto(#[from] silo_crypto::CryptoError),
}

impl From<PublishError> for silo_core::SiloError {
    fn from(err: PublishError) -> Self {
        use silo_core::SiloError;
        match err {
            PublishError::BadPassword => SiloError::BadPassword,
            PublishError::PermissionDenied => SiloError::PermissionDenied,
            PublishError::UnknownShare(id) => SiloError::UnknownShareId(id),
            PublishError::Expired(id) => SiloError::ShareExpired(id),
            PublishError::Store(e) => e.into(),
            PublishError::Crypto(e) => e.into(),
            other => SiloError::Internal(other.to_string()),
        }
    }
}
