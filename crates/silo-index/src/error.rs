//! Indexing error types

use thiserror::Error;

/// Result type for indexing operations
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors in scanning and segment planning
#[derive(Error, Debug)]
pub enum IndexError {
    /// The scan root is gone or unreadable; aborts the whole scan
    #[error("Scan root unavailable: {0}")]
    RootUnavailable(String),

    /// A path could not be expressed relative to the root
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Packed payload would exceed the segment size
    #[error("Pack overflow: {attempted} > {max}")]
    PackOverflow { attempted: u64, max: u64 },

    /// A file changed size between scan and segmentation
    #[error("File changed during indexing: {0}")]
    FileChanged(String),

    /// Packed segment header failed to decode
    #[error("Malformed pack header")]
    MalformedPackHeader,

    /// Redundancy copy body too short to carry its salt
    #[error("Malformed redundancy copy")]
    MalformedCopy,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl From<IndexError> for silo_core::SiloError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::RootUnavailable(p) | IndexError::InvalidPath(p) => {
                silo_core::SiloError::InvalidPath(p)
            }
            IndexError::PackOverflow { attempted, max } => silo_core::SiloError::SegmentOversize {
                length: attempted,
                max,
            },
            IndexError::Cancelled => silo_core::SiloError::Cancelled,
            IndexError::Io(e) => silo_core::SiloError::Io(e),
            other => silo_core::SiloError::Internal(other.to_string()),
        }
    }
}
