//! The share index
//!
//! A publication binds a share ID to one folder version through this
//! structure: file metadata plus every posted segment location, plus the
//! folder data key that decrypts segment bodies. Serialized with
//! bincode (length-prefixed typed fields, no self-describing format)
//! and encrypted with AES-256-GCM under the per-mode share key. It
//! never exists in plaintext outside the producing and consuming
//! clients.

use serde::{Deserialize, Serialize};

use crate::error::{PublishError, Result};
use silo_core::types::{
    FileId, FolderId, MessageId, PackEntry, PackGroupId, Sha256Digest, UsenetSubject,
};
use silo_crypto::cipher::{decrypt, encrypt, Sealed};

/// Bump when the serialized shape changes; consumers refuse newer
/// formats
pub const INDEX_FORMAT_VERSION: u16 = 1;

/// One posted copy of a segment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentLocation {
    pub redundancy: u8,
    pub message_id: MessageId,
    pub usenet_subject: UsenetSubject,
}

/// One logical segment with every copy that reached the wire
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    pub segment_index: u32,
    /// Plaintext offset within the parent file (0 for packs)
    pub offset: u64,
    pub length: u32,
    /// SHA-256 of the plaintext slice; verified on retrieval
    pub sha256: Sha256Digest,
    /// Any one surviving location is sufficient
    pub locations: Vec<SegmentLocation>,
}

/// One file of the snapshot. Large files carry their segment list;
/// files below the segment size are reached through a pack group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFile {
    pub file_id: FileId,
    pub rel_path: String,
    pub size: u64,
    pub sha256: Sha256Digest,
    pub mime: Option<String>,
    pub segments: Vec<SegmentDescriptor>,
}

/// One pack group of the snapshot with its single packed segment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPack {
    pub pack_id: PackGroupId,
    pub total_length: u32,
    pub entries: Vec<PackEntry>,
    pub segment: SegmentDescriptor,
}

/// The decrypted index a consumer reconstructs from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaintextIndex {
    pub format_version: u16,
    pub folder_id: FolderId,
    pub folder_version: u64,
    /// AES key for segment bodies; travels only inside this structure
    pub data_key: [u8; 32],
    pub files: Vec<IndexFile>,
    pub packs: Vec<IndexPack>,
}

impl PlaintextIndex {
    /// Serialize and encrypt under the per-mode share key
    pub fn seal(&self, share_key: &[u8; 32]) -> Result<Vec<u8>> {
        let plain = bincode::serialize(self).map_err(|_| PublishError::MalformedIndex)?;
        Ok(encrypt(&plain, share_key)?.to_bytes())
    }

    /// Decrypt and parse. A wrong key fails the GCM tag before any
    /// parsing happens.
    pub fn open(blob: &[u8], share_key: &[u8; 32]) -> Result<Self> {
        let sealed = Sealed::from_bytes(blob)?;
        let plain = decrypt(&sealed, share_key)?;
        let index: PlaintextIndex =
            bincode::deserialize(&plain).map_err(|_| PublishError::MalformedIndex)?;
        if index.format_version > INDEX_FORMAT_VERSION {
            return Err(PublishError::UnsupportedFormat(index.format_version));
        }
        Ok(index)
    }

    /// Total plaintext bytes the snapshot reconstructs to
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}
