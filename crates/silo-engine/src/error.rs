//! Engine error types

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors in the upload and download pipelines
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] silo_store::StoreError),

    #[error(transparent)]
    Index(#[from] silo_index::IndexError),

    #[error(transparent)]
    Crypto(#[from] silo_crypto::CryptoError),

    #[error(transparent)]
    Nntp(#[from] silo_nntp::NntpError),

    /// Every redundancy copy of a segment is gone or corrupt
    #[error("Segment unrecoverable: index {segment_index}")]
    Unrecoverable { segment_index: u32 },

    /// Reassembled file hash does not match the file record
    #[error("Reconstruction failed for {0}")]
    Reconstruction(String),

    #[error("Sink I/O error: {0}")]
    Sink(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl From<EngineError> for silo_core::SiloError {
    fn from(err: EngineError) -> Self {
        use silo_core::SiloError;
        match err {
            EngineError::Store(e) => e.into(),
            EngineError::Index(e) => e.into(),
            EngineError::Crypto(e) => e.into(),
            EngineError::Nntp(e) => e.into(),
            EngineError::Reconstruction(path) => SiloError::ReconstructionFailure(path),
            EngineError::Unrecoverable { segment_index } => {
                SiloError::ReconstructionFailure(format!("segment {segment_index} unrecoverable"))
            }
            EngineError::Sink(e) => SiloError::Io(e),
            EngineError::Cancelled => SiloError::Cancelled,
        }
    }
}
