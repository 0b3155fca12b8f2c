//! Structured operation results
//!
//! No silent success on partial failure: uploads report posted and
//! failed segment counts, downloads report per-file outcomes.

use crate::types::{FileId, FolderId, ShareId};
use serde::{Deserialize, Serialize};

/// One path the scanner could not read; the scan continued past it
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanFailure {
    pub rel_path: String,
    pub message: String,
}

/// Result of one index run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexReport {
    pub folder_id: FolderId,
    /// Version the folder sits at after the run; unchanged folders keep
    /// their version (no spurious increment)
    pub version: u64,
    pub added: u64,
    pub modified: u64,
    pub deleted: u64,
    pub unchanged: u64,
    /// Logical segments planned across new file versions
    pub segments_planned: u64,
    pub errors: Vec<ScanFailure>,
}

/// Result of a folder upload run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadReport {
    pub segments_posted: u64,
    pub segments_failed: u64,
    /// Present when the caller chained upload into publication
    pub share_id: Option<ShareId>,
}

impl UploadReport {
    pub fn is_complete(&self) -> bool {
        self.segments_failed == 0
    }
}

/// One file that could not be reconstructed
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailedFile {
    pub file_id: FileId,
    pub rel_path: String,
    pub reason: String,
}

/// Result of a share download. Files fail independently; remaining
/// files in the share still complete.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct DownloadManifest {
    pub succeeded: Vec<FileId>,
    pub failed: Vec<FailedFile>,
    pub bytes_written: u64,
}

impl DownloadManifest {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}
