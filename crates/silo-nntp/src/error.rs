//! NNTP error categories
//!
//! The wire codec is external; everything arriving here is already
//! classified into the typed categories the engines act on.

use thiserror::Error;

/// Result type for NNTP operations
pub type Result<T> = std::result::Result<T, NntpError>;

/// Errors from NNTP sessions and the pool
#[derive(Error, Debug, Clone)]
pub enum NntpError {
    /// 4xx-class failure; retried with backoff
    #[error("NNTP temporary failure {code}: {message}")]
    Transient { code: u16, message: String },

    /// 5xx-class failure indicating a bad article; never retried
    #[error("NNTP permanent failure {code}: {message}")]
    Permanent { code: u16, message: String },

    /// Credentials rejected (after any re-auth the session attempted)
    #[error("Authentication rejected")]
    AuthRejected,

    /// No such article; retrieval fails over to the next redundancy copy
    #[error("Article not found: {0}")]
    NotFound(String),

    /// Session died mid-command; the pool will not reuse it
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// No session became available within the acquisition timeout
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Could not reach the upstream at all
    #[error("Upstream unreachable: {0}")]
    Unreachable(String),

    /// Single-operation budget exceeded; treated as transient
    #[error("Operation timed out")]
    Timeout,
}

impl NntpError {
    /// Whether the failure warrants a backoff retry of the same work
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NntpError::Transient { .. }
                | NntpError::ConnectionLost(_)
                | NntpError::PoolExhausted
                | NntpError::Timeout
                | NntpError::Unreachable(_)
        )
    }
}

impl From<NntpError> for silo_core::SiloError {
    fn from(err: NntpError) -> Self {
        use silo_core::SiloError;
        match err {
            NntpError::Transient { code, .. } => SiloError::NntpTempFailure(code),
            NntpError::Permanent { code, .. } => SiloError::NntpPermFailure(code),
            NntpError::AuthRejected => SiloError::AuthRejected,
            NntpError::PoolExhausted => SiloError::PoolExhausted,
            NntpError::Timeout => SiloError::ReadTimeout,
            NntpError::Unreachable(host) => SiloError::Unreachable(host),
            NntpError::ConnectionLost(m) => SiloError::Unreachable(m),
            NntpError::NotFound(m) => SiloError::Internal(format!("article not found: {m}")),
        }
    }
}
