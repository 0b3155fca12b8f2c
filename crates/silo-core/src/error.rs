//! Error taxonomy for Silo operations
//!
//! Workers translate low-level failures into this taxonomy and commit
//! state changes before signalling the coordinator; callers receive a
//! structured result, never a raw backtrace.

use crate::types::{FolderId, Sha256Digest, ShareId, UserId};
use thiserror::Error;

/// Result type alias for coordinator-facing operations
pub type Result<T> = std::result::Result<T, SiloError>;

/// Coarse classification driving retry and surfacing policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Returned to the caller; never retried
    Input,
    /// Specific article/segment discarded; retrieval fails over to
    /// redundancy copies
    Integrity,
    /// Retried with exponential backoff and jitter
    TransientNetwork,
    /// Marked failed and surfaced; no retry
    PermanentNetwork,
    /// Operation aborts; partial work stays recoverable on restart
    Resource,
    /// Bug or environment problem outside the taxonomy
    Internal,
}

/// Errors crossing component boundaries
#[derive(Error, Debug)]
pub enum SiloError {
    // === Input ===
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Path escapes folder root: {0}")]
    PathEscapesRoot(String),

    #[error("Folder {folder} is not owned by user {user}")]
    FolderNotOwned { folder: FolderId, user: UserId },

    #[error("Unknown share ID: {0}")]
    UnknownShareId(ShareId),

    #[error("Share has expired: {0}")]
    ShareExpired(ShareId),

    #[error("Bad password")]
    BadPassword,

    #[error("No such user: {0}")]
    NoSuchUser(UserId),

    #[error("No such folder: {0}")]
    NoSuchFolder(FolderId),

    #[error("Permission denied")]
    PermissionDenied,

    // === Integrity ===
    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        expected: Sha256Digest,
        actual: Sha256Digest,
    },

    #[error("AES-GCM tag verification failed")]
    GcmTagFailure,

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Key wrap or unwrap failed")]
    KeyWrapFailure,

    #[error("Reconstruction failed for {0}")]
    ReconstructionFailure(String),

    #[error("Segment exceeds configured size: {length} > {max}")]
    SegmentOversize { length: u64, max: u64 },

    // === Transient network ===
    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Connect timed out")]
    ConnectTimeout,

    #[error("Read timed out")]
    ReadTimeout,

    #[error("NNTP temporary failure: {0}")]
    NntpTempFailure(u16),

    // === Permanent network ===
    #[error("NNTP permanent failure: {0}")]
    NntpPermFailure(u16),

    #[error("Authentication rejected by upstream")]
    AuthRejected,

    #[error("Upstream unreachable: {0}")]
    Unreachable(String),

    // === Resource ===
    #[error("Disk full")]
    DiskFull,

    #[error("Out of memory")]
    OutOfMemory,

    // === Control ===
    #[error("Operation cancelled")]
    Cancelled,

    // === Internal ===
    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Crypto failure: {0}")]
    Crypto(String),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SiloError {
    /// Which retry/surfacing policy applies
    pub fn class(&self) -> ErrorClass {
        use SiloError::*;
        match self {
            InvalidPath(_) | PathEscapesRoot(_) | FolderNotOwned { .. } | UnknownShareId(_)
            | ShareExpired(_) | BadPassword | NoSuchUser(_) | NoSuchFolder(_)
            | PermissionDenied => ErrorClass::Input,

            HashMismatch { .. } | GcmTagFailure | SignatureInvalid | KeyWrapFailure
            | ReconstructionFailure(_) | SegmentOversize { .. } => ErrorClass::Integrity,

            PoolExhausted | ConnectTimeout | ReadTimeout | NntpTempFailure(_) => {
                ErrorClass::TransientNetwork
            }

            NntpPermFailure(_) | AuthRejected | Unreachable(_) => ErrorClass::PermanentNetwork,

            DiskFull | OutOfMemory => ErrorClass::Resource,

            Cancelled | Storage(_) | Crypto(_) | Io(_) | Internal(_) => ErrorClass::Internal,
        }
    }

    /// Whether a retry with backoff is warranted
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::TransientNetwork
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(SiloError::BadPassword.class(), ErrorClass::Input);
        assert_eq!(SiloError::GcmTagFailure.class(), ErrorClass::Integrity);
        assert_eq!(SiloError::PoolExhausted.class(), ErrorClass::TransientNetwork);
        assert_eq!(SiloError::NntpPermFailure(500).class(), ErrorClass::PermanentNetwork);
        assert_eq!(SiloError::DiskFull.class(), ErrorClass::Resource);
    }

    #[test]
    fn test_transient_retry_policy() {
        assert!(SiloError::NntpTempFailure(441).is_transient());
        assert!(SiloError::ReadTimeout.is_transient());
        assert!(!SiloError::NntpPermFailure(502).is_transient());
        assert!(!SiloError::BadPassword.is_transient());
    }
}
