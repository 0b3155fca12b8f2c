//! Storage error types

use silo_core::types::SegmentState;
use thiserror::Error;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors in the persistence layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying RocksDB failure
    #[error("Database error: {0}")]
    Db(#[from] rocksdb::Error),

    /// Row failed to (de)serialize
    #[error("Row codec error: {0}")]
    Codec(String),

    /// Expected row absent
    #[error("Not found in {table}")]
    NotFound { table: &'static str },

    /// Column family missing from an opened database (schema mismatch)
    #[error("Missing column family: {0}")]
    MissingColumnFamily(&'static str),

    /// Segment state transition violates the state machine
    #[error("Illegal segment transition {from:?} -> {to:?}")]
    IllegalTransition { from: SegmentState, to: SegmentState },

    /// Uniqueness violated: a (parent, index, redundancy) triple already
    /// committed a Message-ID
    #[error("Message-ID already committed for segment")]
    AlreadyPosted,
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}

impl From<StoreError> for silo_core::SiloError {
    fn from(err: StoreError) -> Self {
        silo_core::SiloError::Storage(err.to_string())
    }
}
