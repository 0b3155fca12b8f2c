//! # Silo Publish
//!
//! Binds random, opaque share IDs to encrypted folder-version indexes.
//! A share ID carries no information about folder contents, owner,
//! segment locations, or Message-IDs; the only linkage is the encrypted
//! index it resolves to, and the key for that index depends on the
//! share's access level (PUBLIC / PRIVATE / PROTECTED).

pub mod error;
pub mod index;
pub mod manager;

pub use error::{PublishError, Result};
pub use index::{
    IndexFile, IndexPack, PlaintextIndex, SegmentDescriptor, SegmentLocation, INDEX_FORMAT_VERSION,
};
pub use manager::{PublicationManager, PublishOptions};
