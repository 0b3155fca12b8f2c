//! # Silo Core
//!
//! Shared vocabulary for the Silo storage pipeline: typed identifiers,
//! entity records, the segment state machine, the error taxonomy, runtime
//! configuration, and the cancellation token threaded through every
//! long-running component.
//!
//! Everything here is plain data. Behavior lives in the crates that
//! consume these types (silo-crypto, silo-store, silo-index, silo-nntp,
//! silo-engine, silo-publish, silo-node).

pub mod cancel;
pub mod config;
pub mod error;
pub mod manifest;
pub mod types;

pub use cancel::CancelToken;
pub use config::SiloConfig;
pub use error::{ErrorClass, Result, SiloError};
pub use manifest::{DownloadManifest, FailedFile, IndexReport, ScanFailure, UploadReport};
pub use types::{
    AccessLevel, AuthorizedUser, ChallengeId, ChallengeRecord, FileId, FileVersion, Folder,
    FolderId, InternalSubject, MessageId, OperationKind, OperationRecord, OperationState,
    PackEntry, PackGroup, PackGroupId, Publication, SegmentId, SegmentParent, SegmentRecord,
    SegmentState, Sha256Digest, ShareId, ShareKdf, SubjectPair, UsenetSubject, User, UserId,
};
