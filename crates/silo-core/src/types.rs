//! Core type definitions for Silo
//!
//! Typed identifiers and entity records for the storage pipeline. All
//! identifiers are stable for the lifetime of the entity they name; none
//! of them carries derivable information about folder contents, owners,
//! or article locations.

use chrono::{DateTime, Utc};
use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire alphabet for Message-ID local parts (lowercase alphanumerics)
pub const MESSAGE_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Message-ID domain, chosen to blend with common Usenet posting tools
pub const MESSAGE_ID_DOMAIN: &str = "ngPost.com";

/// Length of the random Message-ID local part
pub const MESSAGE_ID_LOCAL_LEN: usize = 16;

/// Share IDs are 24 uppercase base32 characters (120 bits of entropy)
pub const SHARE_ID_LEN: usize = 24;

/// Usenet subjects are 20 base32 characters drawn from 12 random bytes
pub const USENET_SUBJECT_LEN: usize = 20;

// ============================================================================
// 256-bit identifiers
// ============================================================================

macro_rules! hex_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        pub struct $name([u8; 32]);

        impl $name {
            /// Wrap raw bytes
            pub fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Render as 64 hex characters
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from 64 hex characters
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let bytes = hex::decode(s)?;
                let mut id = [0u8; 32];
                if bytes.len() != 32 {
                    return Err(hex::FromHexError::InvalidStringLength);
                }
                id.copy_from_slice(&bytes);
                Ok(Self(id))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), &self.to_hex()[..12])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }
    };
}

hex_id!(UserId, "Permanent 256-bit user identifier, generated exactly once");
hex_id!(FolderId, "256-bit folder identifier, minted at folder creation");
hex_id!(
    InternalSubject,
    "Owner-side deterministic segment identifier; never leaves the owner's scope"
);

// ============================================================================
// 128-bit identifiers
// ============================================================================

macro_rules! short_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        pub struct $name([u8; 16]);

        impl $name {
            pub fn new(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), &self.to_hex()[..12])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }
    };
}

short_id!(FileId, "Identifier for one (folder, path, version) file row");
short_id!(PackGroupId, "Identifier for a pack group bundling small files");
short_id!(SegmentId, "Identifier for one segment row (one redundancy copy)");
short_id!(ChallengeId, "Identifier for an issued access challenge");

// ============================================================================
// Content hash
// ============================================================================

/// SHA-256 digest of plaintext bytes; the content address of files and
/// segment slices
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Sha256Digest(pub [u8; 32]);

impl Sha256Digest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// ============================================================================
// Wire-facing handles
// ============================================================================

/// Opaque external share handle: 24 uppercase base32 characters, no
/// prefix, no delimiter. Independent of folder contents, owner, and
/// segment locations.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShareId(String);

impl ShareId {
    /// Validate and wrap an externally supplied share ID
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != SHARE_ID_LEN {
            return None;
        }
        if !s.bytes().all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b)) {
            return None;
        }
        Some(Self(s.to_string()))
    }

    /// Encode 15 random bytes as a share ID. Callers supply the entropy;
    /// 15 bytes map to exactly 24 base32 characters.
    pub fn from_entropy(bytes: [u8; 15]) -> Self {
        Self(BASE32_NOPAD.encode(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShareId({})", self.0)
    }
}

impl fmt::Display for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Article Message-ID: `<` + 16 lowercase alphanumerics + `@ngPost.com>`
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Build from a 16-character local part
    pub fn from_local(local: &str) -> Option<Self> {
        if local.len() != MESSAGE_ID_LOCAL_LEN {
            return None;
        }
        if !local.bytes().all(|b| MESSAGE_ID_ALPHABET.contains(&b)) {
            return None;
        }
        Some(Self(format!("<{}@{}>", local, MESSAGE_ID_DOMAIN)))
    }

    /// Validate and wrap a full `<local@domain>` form
    pub fn parse(s: &str) -> Option<Self> {
        let inner = s.strip_prefix('<')?.strip_suffix('>')?;
        let (local, domain) = inner.split_once('@')?;
        if domain != MESSAGE_ID_DOMAIN {
            return None;
        }
        Self::from_local(local)
    }

    /// The full wire form including angle brackets
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wire-visible article subject: 20 base32 characters with no keyed
/// relationship to the plaintext
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsenetSubject(String);

impl UsenetSubject {
    /// Encode 12 random bytes as a subject. Callers supply the entropy.
    pub fn from_entropy(bytes: [u8; 12]) -> Self {
        Self(BASE32_NOPAD.encode(&bytes))
    }

    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != USENET_SUBJECT_LEN {
            return None;
        }
        if !s.bytes().all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b)) {
            return None;
        }
        Some(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UsenetSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UsenetSubject({})", self.0)
    }
}

impl fmt::Display for UsenetSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The dual-subject pair recorded in the owner's index. Only the usenet
/// side ever appears on the wire; the index is the sole linkage between
/// the two.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectPair {
    pub internal: InternalSubject,
    pub usenet: UsenetSubject,
}

// ============================================================================
// Entity records
// ============================================================================

/// A registered identity. The signing key is wrapped with a key derived
/// from the user secret; the secret itself is never persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    /// Ed25519 verification key
    pub ed25519_public: [u8; 32],
    /// X25519 public key used to wrap PRIVATE share keys toward this user
    pub x25519_public: [u8; 32],
    /// Ed25519 signing key, AES-GCM wrapped with the storage key
    pub wrapped_signing_key: Vec<u8>,
    /// Salt for deriving the storage key from the user secret
    pub kdf_salt: [u8; 32],
    pub created_at: DateTime<Utc>,
}

/// A logical folder rooted at a local path. Keys are generated once and
/// never rotated; rotation requires a new folder.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Folder {
    pub folder_id: FolderId,
    pub owner: UserId,
    pub root_path: String,
    /// Ed25519 verification key for per-folder artifacts
    pub ed25519_public: [u8; 32],
    /// Folder signing key, wrapped with the owner's storage key
    pub wrapped_signing_key: Vec<u8>,
    /// Random 32-byte AES key for segment payloads, wrapped with the
    /// owner's storage key; travels in the clear only inside encrypted
    /// indexes
    pub wrapped_data_key: Vec<u8>,
    /// Highest indexed version; 0 before the first scan
    pub current_version: u64,
    /// Logical deletion: rows remain, articles become unreachable
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

/// One immutable (folder, path, version) row. Supersession is additive;
/// prior versions are retained as historical records.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileVersion {
    pub file_id: FileId,
    pub folder_id: FolderId,
    pub rel_path: String,
    pub version: u64,
    pub size: u64,
    pub sha256: Sha256Digest,
    pub mime: Option<String>,
    /// Source mtime in seconds since the epoch, as observed at scan time
    pub mtime: i64,
    /// Tombstone row: the path disappeared at this version. Snapshots at
    /// or past this version exclude the path.
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

/// What a segment slices: a large file directly, or a pack group of
/// small files
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentParent {
    File(FileId),
    Pack(PackGroupId),
}

/// Upload lifecycle of a segment. Transitions are monotonic except for
/// the explicit retry edge back to `Queued`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentState {
    Pending,
    Queued,
    Uploading,
    Posted,
    Failed,
    Cancelled,
}

impl SegmentState {
    /// Whether `next` is a legal successor of `self`
    pub fn can_advance_to(&self, next: SegmentState) -> bool {
        use SegmentState::*;
        matches!(
            (*self, next),
            (Pending, Queued)
                | (Queued, Uploading)
                | (Queued, Cancelled)
                | (Uploading, Posted)
                | (Uploading, Failed)
                | (Uploading, Cancelled)
                // retry path
                | (Uploading, Queued)
        )
    }

    /// Terminal states never change again within one upload run
    pub fn is_terminal(&self) -> bool {
        matches!(self, SegmentState::Posted | SegmentState::Failed | SegmentState::Cancelled)
    }
}

/// One redundancy copy of one slice. A (parent, index, redundancy)
/// triple maps to at most one posted Message-ID.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub segment_id: SegmentId,
    pub folder_id: FolderId,
    pub parent: SegmentParent,
    /// Ordinal within the parent; reassembly order
    pub segment_index: u32,
    /// Plaintext byte offset within the parent file (0 for packs)
    pub offset: u64,
    /// Plaintext slice length; at most the configured segment size
    pub length: u32,
    /// SHA-256 of the plaintext slice
    pub sha256: Sha256Digest,
    /// Redundancy copy ordinal, 0 = base copy
    pub redundancy: u8,
    pub subjects: SubjectPair,
    pub state: SegmentState,
    pub message_id: Option<MessageId>,
    pub posted_at: Option<DateTime<Utc>>,
    /// Cause recorded on permanent failure
    pub failure: Option<String>,
}

/// One sub-file of a pack group
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackEntry {
    pub file_id: FileId,
    pub rel_path: String,
    /// Offset of this file's bytes within the packed plaintext
    pub offset: u32,
    pub length: u32,
}

/// A synthetic container bundling small files into one segment. Total
/// packed plaintext never exceeds the segment size.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackGroup {
    pub pack_id: PackGroupId,
    pub folder_id: FolderId,
    pub folder_version: u64,
    pub total_length: u32,
    pub entries: Vec<PackEntry>,
}

/// Share access policy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Public,
    Private,
    Protected,
}

/// Password KDF parameters carried by PROTECTED shares (salt and costs;
/// no password hash is retained)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareKdf {
    pub salt: [u8; 32],
    pub scrypt_log_n: u8,
    pub scrypt_r: u32,
    pub scrypt_p: u32,
}

/// Persisted record binding a share ID to an encrypted index. The blob
/// itself is stored beside the row and written in the same transaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Publication {
    pub share_id: ShareId,
    pub folder_id: FolderId,
    /// Snapshot version; re-indexing the folder does not move this
    pub folder_version: u64,
    pub access: AccessLevel,
    /// Present only for PROTECTED shares
    pub kdf: Option<ShareKdf>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub access_count: u64,
}

impl Publication {
    /// Expired publications refuse resolution but keep their rows
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| t <= now).unwrap_or(false)
    }
}

/// PRIVATE share membership: a commitment to an authorized user plus the
/// share key wrapped toward that user. The user ID itself is never
/// stored in plaintext.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizedUser {
    pub share_id: ShareId,
    /// SHA-256(share_id || user ed25519 public key)
    pub commitment: Sha256Digest,
    /// The user's ed25519 public key is needed to check proofs; it is
    /// stored only inside the encrypted row, never on the wire
    pub ed25519_public: [u8; 32],
    /// Share key wrapped with the user's X25519 key (ECIES layout)
    pub wrapped_share_key: Vec<u8>,
}

/// An issued access challenge awaiting its signed response
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChallengeRecord {
    pub challenge_id: ChallengeId,
    pub share_id: ShareId,
    pub challenge: [u8; 32],
    pub issued_at: DateTime<Utc>,
    pub used: bool,
}

// ============================================================================
// Coordinator operations
// ============================================================================

/// Kind of tracked long-running operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Index,
    Upload,
    Download,
    Publish,
}

/// Operation lifecycle as reported by `get_progress`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Row in the sessions table tracking one coordinator operation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation_id: uuid::Uuid,
    pub kind: OperationKind,
    pub folder_id: Option<FolderId>,
    pub share_id: Option<ShareId>,
    pub state: OperationState,
    /// 0..=100
    pub progress_pct: u8,
    pub detail: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
