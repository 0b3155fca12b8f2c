//! # Silo Engine
//!
//! The upload and download pipelines: bounded queues, worker dispatch
//! through the connection pool, retry/backoff, atomic posted-state
//! commits, and verified streaming reassembly.

pub mod download;
pub mod error;
pub mod queue;
pub mod upload;

pub use download::DownloadEngine;
pub use error::{EngineError, Result};
pub use queue::JobQueue;
pub use upload::{UploadEngine, UploadOutcome};
