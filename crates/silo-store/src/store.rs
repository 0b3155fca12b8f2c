//! The entity store
//!
//! One RocksDB instance, one column family per logical table. Writes
//! that must land together go through a single `WriteBatch`: a file row
//! with its segment rows, a posted-state commit with its Message-ID
//! index entry, a publication row with its encrypted blob and authorized
//! set. Readers stream through prefix iterators and never materialize a
//! result set.

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBIteratorWithThreadMode, DBWithThreadMode,
    Direction, IteratorMode, MultiThreaded, Options, WriteBatch,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::keys;
use silo_core::types::{
    AuthorizedUser, ChallengeId, ChallengeRecord, FileVersion, Folder, FolderId, MessageId,
    OperationRecord, PackGroup, Publication, SegmentParent, SegmentRecord, SegmentState, ShareId,
    User, UserId,
};

type Db = DBWithThreadMode<MultiThreaded>;

/// Logical tables, one column family each
pub const CF_USERS: &str = "users";
pub const CF_FOLDERS: &str = "folders";
pub const CF_FILES: &str = "files";
pub const CF_SEGMENTS: &str = "segments";
pub const CF_PACK_GROUPS: &str = "pack_groups";
pub const CF_PUBLICATIONS: &str = "publications";
pub const CF_PUBLICATION_BLOBS: &str = "publication_blobs";
pub const CF_AUTHORIZED_USERS: &str = "authorized_users";
pub const CF_COMMITMENTS: &str = "commitments";
pub const CF_SESSIONS: &str = "sessions";
/// Secondary index: message_id -> segment key
pub const CF_MSGID_INDEX: &str = "msgid_index";

const ALL_CFS: &[&str] = &[
    CF_USERS,
    CF_FOLDERS,
    CF_FILES,
    CF_SEGMENTS,
    CF_PACK_GROUPS,
    CF_PUBLICATIONS,
    CF_PUBLICATION_BLOBS,
    CF_AUTHORIZED_USERS,
    CF_COMMITMENTS,
    CF_SESSIONS,
    CF_MSGID_INDEX,
];

/// Handle to the persistent entity tables. Cheap to clone; all clones
/// share the underlying database.
#[derive(Clone)]
pub struct Store {
    db: Arc<Db>,
}

impl Store {
    /// Open (creating if missing) the store under `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = Db::open_cf_descriptors(&opts, dir.as_ref(), descriptors)?;
        tracing::debug!(path = %dir.as_ref().display(), "opened entity store");

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &'static str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or(StoreError::MissingColumnFamily(name))
    }

    fn put<T: Serialize>(&self, cf: &'static str, key: &[u8], row: &T) -> Result<()> {
        let value = bincode::serialize(row)?;
        self.db.put_cf(&self.cf(cf)?, key, value)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, cf: &'static str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(&self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn require<T: DeserializeOwned>(
        &self,
        cf: &'static str,
        key: &[u8],
        table: &'static str,
    ) -> Result<T> {
        self.get(cf, key)?.ok_or(StoreError::NotFound { table })
    }

    /// Prefix-scan a column family into a lazy typed row stream
    fn stream<T: DeserializeOwned>(&self, cf: &'static str, prefix: Vec<u8>) -> Result<RowStream<'_, T>> {
        let iter = self.db.iterator_cf(
            &self.cf(cf)?,
            IteratorMode::From(&prefix, Direction::Forward),
        );
        Ok(RowStream {
            inner: iter,
            prefix,
            _marker: PhantomData,
        })
    }

    // ========================================================================
    // Users
    // ========================================================================

    pub fn put_user(&self, user: &User) -> Result<()> {
        self.put(CF_USERS, user.user_id.as_bytes(), user)
    }

    pub fn get_user(&self, user_id: &UserId) -> Result<User> {
        self.require(CF_USERS, user_id.as_bytes(), "users")
    }

    /// The node's local identity, if one was ever registered.
    /// Single-identity deployments create exactly one user at first run.
    pub fn first_user(&self) -> Result<Option<User>> {
        self.stream::<User>(CF_USERS, Vec::new())?.next().transpose()
    }

    // ========================================================================
    // Folders
    // ========================================================================

    pub fn put_folder(&self, folder: &Folder) -> Result<()> {
        self.put(CF_FOLDERS, folder.folder_id.as_bytes(), folder)
    }

    pub fn get_folder(&self, folder_id: &FolderId) -> Result<Folder> {
        self.require(CF_FOLDERS, folder_id.as_bytes(), "folders")
    }

    /// Advance the folder's current version after a completed index run
    pub fn set_folder_version(&self, folder_id: &FolderId, version: u64) -> Result<()> {
        let mut folder = self.get_folder(folder_id)?;
        folder.current_version = version;
        self.put_folder(&folder)
    }

    /// Logical deletion: the row stays, articles become unreachable
    pub fn mark_folder_deleted(&self, folder_id: &FolderId) -> Result<()> {
        let mut folder = self.get_folder(folder_id)?;
        folder.deleted = true;
        self.put_folder(&folder)
    }

    // ========================================================================
    // Files and segments
    // ========================================================================

    /// Insert one file version together with all of its segment rows.
    /// Grouped in one batch so no observer ever sees a file without its
    /// segments.
    pub fn insert_file_with_segments(
        &self,
        file: &FileVersion,
        segments: &[SegmentRecord],
    ) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.put_cf(
            &self.cf(CF_FILES)?,
            keys::file_key(&file.folder_id, &file.rel_path, file.version),
            bincode::serialize(file)?,
        );
        let seg_cf = self.cf(CF_SEGMENTS)?;
        for segment in segments {
            batch.put_cf(
                &seg_cf,
                keys::segment_key(&segment.parent, segment.segment_index, segment.redundancy),
                bincode::serialize(segment)?,
            );
        }
        self.db.write(batch)?;
        Ok(())
    }

    /// Insert pack groups with their segment rows in one batch
    pub fn insert_pack_groups(
        &self,
        groups: &[PackGroup],
        segments: &[SegmentRecord],
    ) -> Result<()> {
        let mut batch = WriteBatch::default();
        let pack_cf = self.cf(CF_PACK_GROUPS)?;
        for group in groups {
            batch.put_cf(
                &pack_cf,
                keys::pack_group_key(&group.folder_id, group.folder_version, &group.pack_id),
                bincode::serialize(group)?,
            );
        }
        let seg_cf = self.cf(CF_SEGMENTS)?;
        for segment in segments {
            batch.put_cf(
                &seg_cf,
                keys::segment_key(&segment.parent, segment.segment_index, segment.redundancy),
                bincode::serialize(segment)?,
            );
        }
        self.db.write(batch)?;
        Ok(())
    }

    pub fn get_file(
        &self,
        folder_id: &FolderId,
        rel_path: &str,
        version: u64,
    ) -> Result<FileVersion> {
        self.require(
            CF_FILES,
            &keys::file_key(folder_id, rel_path, version),
            "files",
        )
    }

    /// Highest version row recorded for a path, tombstones included
    pub fn latest_file_version(
        &self,
        folder_id: &FolderId,
        rel_path: &str,
    ) -> Result<Option<FileVersion>> {
        let mut latest = None;
        for row in self.stream::<FileVersion>(
            CF_FILES,
            keys::file_versions_prefix(folder_id, rel_path),
        )? {
            latest = Some(row?);
        }
        Ok(latest)
    }

    /// Stream every file row of a folder, all paths, all versions, in
    /// key order (scanner emission order, versions ascending per path)
    pub fn stream_file_rows(&self, folder_id: &FolderId) -> Result<RowStream<'_, FileVersion>> {
        self.stream(CF_FILES, keys::folder_files_prefix(folder_id))
    }

    /// Stream the folder as it existed at `version`: for each path the
    /// highest row with version <= `version`, tombstones elided.
    pub fn stream_snapshot(
        &self,
        folder_id: &FolderId,
        version: u64,
    ) -> Result<SnapshotStream<'_>> {
        Ok(SnapshotStream {
            inner: self.stream_file_rows(folder_id)?,
            version,
            pending: None,
        })
    }

    pub fn get_segment(
        &self,
        parent: &SegmentParent,
        segment_index: u32,
        redundancy: u8,
    ) -> Result<SegmentRecord> {
        self.require(
            CF_SEGMENTS,
            &keys::segment_key(parent, segment_index, redundancy),
            "segments",
        )
    }

    /// Stream all copies of all segments of one parent, ordered by
    /// (index, redundancy)
    pub fn stream_segments(&self, parent: &SegmentParent) -> Result<RowStream<'_, SegmentRecord>> {
        self.stream(CF_SEGMENTS, keys::parent_segments_prefix(parent))
    }

    /// Advance a segment's upload state. Illegal transitions are
    /// rejected so observers can trust monotonicity.
    pub fn update_segment_state(
        &self,
        parent: &SegmentParent,
        segment_index: u32,
        redundancy: u8,
        next: SegmentState,
        failure: Option<String>,
    ) -> Result<SegmentRecord> {
        let mut segment = self.get_segment(parent, segment_index, redundancy)?;
        if !segment.state.can_advance_to(next) {
            return Err(StoreError::IllegalTransition {
                from: segment.state,
                to: next,
            });
        }
        segment.state = next;
        segment.failure = failure;
        self.put(
            CF_SEGMENTS,
            &keys::segment_key(parent, segment_index, redundancy),
            &segment,
        )?;
        Ok(segment)
    }

    /// Commit a successful post: Message-ID, posted_at, and the state
    /// advance land in one batch together with the Message-ID index
    /// entry. A second commit for the same triple is rejected.
    pub fn commit_posted(
        &self,
        parent: &SegmentParent,
        segment_index: u32,
        redundancy: u8,
        message_id: &MessageId,
        posted_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<SegmentRecord> {
        let mut segment = self.get_segment(parent, segment_index, redundancy)?;
        if segment.message_id.is_some() {
            return Err(StoreError::AlreadyPosted);
        }
        if !segment.state.can_advance_to(SegmentState::Posted) {
            return Err(StoreError::IllegalTransition {
                from: segment.state,
                to: SegmentState::Posted,
            });
        }
        segment.state = SegmentState::Posted;
        segment.message_id = Some(message_id.clone());
        segment.posted_at = Some(posted_at);

        let seg_key = keys::segment_key(parent, segment_index, redundancy);
        let mut batch = WriteBatch::default();
        batch.put_cf(&self.cf(CF_SEGMENTS)?, &seg_key, bincode::serialize(&segment)?);
        batch.put_cf(
            &self.cf(CF_MSGID_INDEX)?,
            message_id.as_str().as_bytes(),
            &seg_key,
        );
        self.db.write(batch)?;
        Ok(segment)
    }

    /// Reverse lookup through the Message-ID index
    pub fn segment_by_message_id(&self, message_id: &MessageId) -> Result<Option<SegmentRecord>> {
        let Some(seg_key) = self
            .db
            .get_cf(&self.cf(CF_MSGID_INDEX)?, message_id.as_str().as_bytes())?
        else {
            return Ok(None);
        };
        match self.db.get_cf(&self.cf(CF_SEGMENTS)?, &seg_key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    // ========================================================================
    // Pack groups
    // ========================================================================

    pub fn stream_pack_groups(
        &self,
        folder_id: &FolderId,
        version: u64,
    ) -> Result<RowStream<'_, PackGroup>> {
        self.stream(CF_PACK_GROUPS, keys::pack_groups_prefix(folder_id, version))
    }

    /// Pack groups of every version of a folder, version-ascending.
    /// Snapshots pick the newest group covering each small file.
    pub fn stream_all_pack_groups(&self, folder_id: &FolderId) -> Result<RowStream<'_, PackGroup>> {
        self.stream(CF_PACK_GROUPS, folder_id.as_bytes().to_vec())
    }

    // ========================================================================
    // Publications
    // ========================================================================

    /// Create a publication: row, encrypted index blob, and authorized
    /// set land atomically
    pub fn create_publication(
        &self,
        publication: &Publication,
        encrypted_index: &[u8],
        authorized: &[AuthorizedUser],
    ) -> Result<()> {
        let share_key = publication.share_id.as_str().as_bytes().to_vec();

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &self.cf(CF_PUBLICATIONS)?,
            &share_key,
            bincode::serialize(publication)?,
        );
        batch.put_cf(&self.cf(CF_PUBLICATION_BLOBS)?, &share_key, encrypted_index);
        let auth_cf = self.cf(CF_AUTHORIZED_USERS)?;
        for entry in authorized {
            batch.put_cf(
                &auth_cf,
                keys::authorized_user_key(&entry.share_id, entry.commitment.as_bytes()),
                bincode::serialize(entry)?,
            );
        }
        self.db.write(batch)?;
        Ok(())
    }

    pub fn get_publication(&self, share_id: &ShareId) -> Result<Publication> {
        self.require(CF_PUBLICATIONS, share_id.as_str().as_bytes(), "publications")
    }

    pub fn get_publication_blob(&self, share_id: &ShareId) -> Result<Vec<u8>> {
        self.db
            .get_cf(&self.cf(CF_PUBLICATION_BLOBS)?, share_id.as_str().as_bytes())?
            .ok_or(StoreError::NotFound {
                table: "publication_blobs",
            })
    }

    pub fn put_publication(&self, publication: &Publication) -> Result<()> {
        self.put(
            CF_PUBLICATIONS,
            publication.share_id.as_str().as_bytes(),
            publication,
        )
    }

    /// Authorized-user list mutation is allowed only for PRIVATE shares;
    /// callers enforce the policy, the store just persists the row
    pub fn add_authorized_user(&self, entry: &AuthorizedUser) -> Result<()> {
        self.put(
            CF_AUTHORIZED_USERS,
            &keys::authorized_user_key(&entry.share_id, entry.commitment.as_bytes()),
            entry,
        )
    }

    pub fn authorized_users(&self, share_id: &ShareId) -> Result<Vec<AuthorizedUser>> {
        self.stream::<AuthorizedUser>(CF_AUTHORIZED_USERS, keys::authorized_users_prefix(share_id))?
            .collect()
    }

    // ========================================================================
    // Challenges
    // ========================================================================

    pub fn put_challenge(&self, challenge: &ChallengeRecord) -> Result<()> {
        self.put(CF_COMMITMENTS, challenge.challenge_id.as_bytes(), challenge)
    }

    pub fn get_challenge(&self, challenge_id: &ChallengeId) -> Result<ChallengeRecord> {
        self.require(CF_COMMITMENTS, challenge_id.as_bytes(), "commitments")
    }

    /// Challenges are single-use; consumed ones are removed
    pub fn delete_challenge(&self, challenge_id: &ChallengeId) -> Result<()> {
        self.db
            .delete_cf(&self.cf(CF_COMMITMENTS)?, challenge_id.as_bytes())?;
        Ok(())
    }

    // ========================================================================
    // Operations (sessions table)
    // ========================================================================

    pub fn put_operation(&self, operation: &OperationRecord) -> Result<()> {
        self.put(CF_SESSIONS, operation.operation_id.as_bytes(), operation)
    }

    pub fn get_operation(&self, operation_id: &uuid::Uuid) -> Result<OperationRecord> {
        self.require(CF_SESSIONS, operation_id.as_bytes(), "sessions")
    }

    /// Every tracked operation, running or finished
    pub fn stream_operations(&self) -> Result<RowStream<'_, OperationRecord>> {
        self.stream(CF_SESSIONS, Vec::new())
    }
}

/// Lazy typed row stream over one key prefix. Holds the RocksDB
/// iterator; memory use is one row at a time.
pub struct RowStream<'a, T> {
    inner: DBIteratorWithThreadMode<'a, Db>,
    prefix: Vec<u8>,
    _marker: PhantomData<T>,
}

impl<T: DeserializeOwned> Iterator for RowStream<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok((key, value)) => {
                if !key.starts_with(&self.prefix) {
                    return None;
                }
                Some(bincode::deserialize(&value).map_err(Into::into))
            }
            Err(e) => Some(Err(e.into())),
        }
    }
}

/// Streams the per-path winner of a version snapshot: rows arrive
/// path-grouped with versions ascending, so the last row <= the snapshot
/// version wins; tombstones drop the path.
pub struct SnapshotStream<'a> {
    inner: RowStream<'a, FileVersion>,
    version: u64,
    /// Best candidate for the path currently being grouped
    pending: Option<FileVersion>,
}

impl Iterator for SnapshotStream<'_> {
    type Item = Result<FileVersion>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next() {
                Some(Ok(row)) => {
                    if row.version > self.version {
                        continue;
                    }
                    match &self.pending {
                        Some(current) if current.rel_path == row.rel_path => {
                            // higher version for the same path wins
                            self.pending = Some(row);
                        }
                        Some(_) => {
                            let done = self.pending.replace(row);
                            if let Some(done) = done {
                                if !done.deleted {
                                    return Some(Ok(done));
                                }
                            }
                        }
                        None => self.pending = Some(row),
                    }
                }
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    let done = self.pending.take()?;
                    if !done.deleted {
                        return Some(Ok(done));
                    }
                }
            }
        }
    }
}
