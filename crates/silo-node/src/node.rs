//! The coordinator
//!
//! Owns every service (store, pool, engines, publication manager) and
//! sequences the end-to-end workflows: index -> segment -> upload ->
//! publish, and share -> resolve -> download -> reassemble. Services
//! are constructed here and passed down; no component reaches for
//! global state.

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use silo_core::manifest::{DownloadManifest, IndexReport, ScanFailure, UploadReport};
use silo_core::types::{
    AccessLevel, FileVersion, Folder, FolderId, OperationKind, OperationRecord, OperationState,
    PackGroup, SegmentRecord, ShareId,
};
use silo_core::{CancelToken, Result, SiloConfig, SiloError};
use silo_crypto::identity::{
    create_folder, create_user, open_folder, open_user, FolderKeys, UserKeys, UserSecret,
};
use silo_engine::{DownloadEngine, UploadEngine};
use silo_index::diff::{diff, ChangeEvent, PriorFile};
use silo_index::scanner::{self, ScanItem};
use silo_index::segmenter::{mint_file_id, Packer, SegmentPlanner};
use silo_nntp::{ConnectionPool, PoolStats, SessionFactory};
use silo_publish::{PublicationManager, PublishOptions};
use silo_store::Store;

use crate::progress::OperationRegistry;

/// How a caller authenticates against a share
#[derive(Clone, Debug)]
pub enum ShareCredentials {
    /// PUBLIC: the share ID itself is the credential
    None,
    /// PROTECTED: password feeds the stored KDF
    Password(String),
    /// PRIVATE: prove membership with this node's user identity
    Identity,
}

/// Coordinator owning the full pipeline
pub struct SiloNode {
    config: SiloConfig,
    store: Store,
    pool: Arc<ConnectionPool>,
    publications: PublicationManager,
    uploader: UploadEngine,
    downloader: DownloadEngine,
    registry: OperationRegistry,
    user: UserKeys,
    /// Unwrapped folder keys, invalidated on folder deletion
    folder_keys: DashMap<FolderId, Arc<FolderKeys>>,
}

impl SiloNode {
    /// Open the store, unlock (or create) the local identity, and wire
    /// the services. The user secret never persists; a wrong secret
    /// fails the unwrap of the stored signing key.
    pub fn bootstrap(
        config: SiloConfig,
        factory: Arc<dyn SessionFactory>,
        secret: &UserSecret,
    ) -> Result<Self> {
        let store = Store::open(&config.storage.data_dir)?;

        let user = match store.first_user()? {
            Some(record) => open_user(&record, secret, &config.kdf)?,
            None => {
                let (record, keys) = create_user(secret, &config.kdf)?;
                store.put_user(&record)?;
                keys
            }
        };
        tracing::info!(user = %user.user_id, "identity unlocked");

        let pool = Arc::new(ConnectionPool::new(factory, config.pool.clone()));
        let publications = PublicationManager::new(store.clone(), config.kdf.clone());
        let uploader = UploadEngine::new(store.clone(), Arc::clone(&pool), &config);
        let downloader = DownloadEngine::new(Arc::clone(&pool), &config);
        let registry = OperationRegistry::new(store.clone());

        Ok(Self {
            config,
            store,
            pool,
            publications,
            uploader,
            downloader,
            registry,
            user,
            folder_keys: DashMap::new(),
        })
    }

    pub fn user_id(&self) -> silo_core::types::UserId {
        self.user.user_id
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    // ========================================================================
    // Folder lifecycle
    // ========================================================================

    /// Register a folder rooted at a local path. Keys are minted once;
    /// the first index run happens separately.
    pub fn add_folder(&self, root_path: &Path) -> Result<Folder> {
        if !root_path.is_dir() {
            return Err(SiloError::InvalidPath(root_path.display().to_string()));
        }
        let (folder, keys) = create_folder(&self.user, &root_path.display().to_string())?;
        self.store.put_folder(&folder)?;
        self.folder_keys
            .insert(folder.folder_id, Arc::new(keys));
        Ok(folder)
    }

    /// Logical deletion: rows stay, keys leave the cache, articles
    /// become unreachable through this node
    pub fn delete_folder(&self, folder_id: &FolderId) -> Result<()> {
        let folder = self.owned_folder(folder_id)?;
        self.store.mark_folder_deleted(&folder.folder_id)?;
        self.folder_keys.remove(folder_id);
        self.publications.clear_key_cache();
        Ok(())
    }

    fn owned_folder(&self, folder_id: &FolderId) -> Result<Folder> {
        let folder = self
            .store
            .get_folder(folder_id)
            .map_err(|_| SiloError::NoSuchFolder(*folder_id))?;
        if folder.deleted {
            return Err(SiloError::NoSuchFolder(*folder_id));
        }
        if folder.owner != self.user.user_id {
            return Err(SiloError::FolderNotOwned {
                folder: *folder_id,
                user: self.user.user_id,
            });
        }
        Ok(folder)
    }

    fn keys_for(&self, folder: &Folder) -> Result<Arc<FolderKeys>> {
        if let Some(keys) = self.folder_keys.get(&folder.folder_id) {
            return Ok(Arc::clone(keys.value()));
        }
        let keys = Arc::new(open_folder(&self.user, folder)?);
        self.folder_keys.insert(folder.folder_id, Arc::clone(&keys));
        Ok(keys)
    }

    // ========================================================================
    // Index
    // ========================================================================

    /// Scan the folder, detect changes against the prior version, and
    /// plan segments for everything new. An unchanged folder keeps its
    /// version number.
    pub async fn index_folder(&self, folder_id: &FolderId) -> Result<IndexReport> {
        let (operation_id, token) =
            self.registry
                .start(OperationKind::Index, Some(*folder_id), None)?;
        let result = self.run_index(folder_id, &token);
        self.finish_operation(&operation_id, &token, &result, |r| {
            format!(
                "version {}: +{} ~{} -{} ={}",
                r.version, r.added, r.modified, r.deleted, r.unchanged
            )
        })?;
        result
    }

    fn run_index(&self, folder_id: &FolderId, token: &CancelToken) -> Result<IndexReport> {
        let folder = self.owned_folder(folder_id)?;
        let keys = self.keys_for(&folder)?;
        let root = PathBuf::from(&folder.root_path);
        let current = folder.current_version;

        let prior: Vec<PriorFile> = self
            .store
            .stream_snapshot(folder_id, current)?
            .map(|row| {
                row.map(|f| PriorFile {
                    rel_path: f.rel_path,
                    version: f.version,
                    sha256: f.sha256,
                })
            })
            .collect::<std::result::Result<_, _>>()?;

        let mut scanned = Vec::new();
        let mut errors = Vec::new();
        for item in scanner::scan(&root, token.clone())? {
            match item? {
                ScanItem::File(file) => scanned.push(file),
                ScanItem::Error { rel_path, message } => {
                    tracing::warn!(path = %rel_path, %message, "scan error, continuing");
                    errors.push(ScanFailure { rel_path, message });
                }
            }
        }

        let events: Vec<ChangeEvent> = diff(scanned.into_iter(), prior.into_iter()).collect();
        let mut report = IndexReport {
            folder_id: *folder_id,
            version: current,
            added: 0,
            modified: 0,
            deleted: 0,
            unchanged: 0,
            segments_planned: 0,
            errors,
        };

        let has_changes = events
            .iter()
            .any(|e| !matches!(e, ChangeEvent::Unchanged { .. }));
        if !has_changes {
            report.unchanged = events.len() as u64;
            tracing::info!(folder = %folder_id, version = current, "folder unchanged");
            return Ok(report);
        }

        let next = current + 1;
        let seg_size = self.config.segments.segment_size as u64;
        let mut planner = SegmentPlanner::new(
            *folder_id,
            next,
            &self.config.segments,
            keys.signing.to_bytes(),
        );
        let mut packer = Packer::new(self.config.segments.segment_size);
        let mut pack_batches: Vec<(PackGroup, Vec<SegmentRecord>)> = Vec::new();
        let now = chrono::Utc::now();

        for event in events {
            if token.is_cancelled() {
                return Err(SiloError::Cancelled);
            }
            let (file, is_modified) = match event {
                ChangeEvent::Added(file) => (file, false),
                ChangeEvent::Modified { file, .. } => (file, true),
                ChangeEvent::Deleted { rel_path, .. } => {
                    let tombstone = FileVersion {
                        file_id: mint_file_id(),
                        folder_id: *folder_id,
                        rel_path,
                        version: next,
                        size: 0,
                        sha256: silo_core::types::Sha256Digest::default(),
                        mime: None,
                        mtime: 0,
                        deleted: true,
                        created_at: now,
                    };
                    self.store.insert_file_with_segments(&tombstone, &[])?;
                    report.deleted += 1;
                    continue;
                }
                ChangeEvent::Unchanged { .. } => {
                    report.unchanged += 1;
                    continue;
                }
            };

            let row = FileVersion {
                file_id: mint_file_id(),
                folder_id: *folder_id,
                rel_path: file.rel_path.clone(),
                version: next,
                size: file.size,
                sha256: file.sha256,
                mime: scanner::mime_hint(&file.rel_path),
                mtime: file.mtime,
                deleted: false,
                created_at: now,
            };

            if file.size >= seg_size {
                let records = planner.plan_file(&root, &row)?;
                report.segments_planned +=
                    records.iter().filter(|r| r.redundancy == 0).count() as u64;
                self.store.insert_file_with_segments(&row, &records)?;
            } else {
                self.store.insert_file_with_segments(&row, &[])?;
                if let Some(batch) = packer.push(&root, &row, &mut planner)? {
                    pack_batches.push(batch);
                }
            }

            if is_modified {
                report.modified += 1;
            } else {
                report.added += 1;
            }
        }

        if let Some(batch) = packer.finish(next, &mut planner)? {
            pack_batches.push(batch);
        }
        for (group, records) in &pack_batches {
            self.store
                .insert_pack_groups(std::slice::from_ref(group), records)?;
            report.segments_planned += 1;
        }

        self.store.set_folder_version(folder_id, next)?;
        report.version = next;
        tracing::info!(
            folder = %folder_id,
            version = next,
            added = report.added,
            modified = report.modified,
            deleted = report.deleted,
            segments = report.segments_planned,
            "index run complete"
        );
        Ok(report)
    }

    // ========================================================================
    // Upload
    // ========================================================================

    /// Post every not-yet-posted segment of the folder's current
    /// version. Resumes cleanly after a crash.
    pub async fn upload_folder(&self, folder_id: &FolderId) -> Result<UploadReport> {
        let folder = self.owned_folder(folder_id)?;
        let keys = self.keys_for(&folder)?;

        let (operation_id, token) =
            self.registry
                .start(OperationKind::Upload, Some(*folder_id), None)?;
        self.registry
            .update(&operation_id, 10, "posting segments")?;

        let outcome = self
            .uploader
            .upload_folder(&folder, *keys.data_key, &token)
            .await;

        let result: Result<UploadReport> = outcome
            .map(|o| UploadReport {
                segments_posted: o.posted,
                segments_failed: o.failed,
                share_id: None,
            })
            .map_err(Into::into);
        self.finish_operation(&operation_id, &token, &result, |r| {
            format!("posted {}, failed {}", r.segments_posted, r.segments_failed)
        })?;
        result
    }

    // ========================================================================
    // Publish
    // ========================================================================

    /// Bind the folder's current version to a fresh share ID
    pub fn publish_folder(
        &self,
        folder_id: &FolderId,
        access: AccessLevel,
        opts: &PublishOptions,
    ) -> Result<ShareId> {
        let folder = self.owned_folder(folder_id)?;
        let keys = self.keys_for(&folder)?;
        let share_id = self.publications.publish(&folder, &keys, access, opts)?;
        Ok(share_id)
    }

    /// Expire a share now
    pub fn revoke_share(&self, share_id: &ShareId) -> Result<()> {
        self.publications.revoke(share_id)?;
        Ok(())
    }

    // ========================================================================
    // Download
    // ========================================================================

    /// Resolve a share, derive its key from the supplied credentials,
    /// and reconstruct the folder version under `dest`. A bad password
    /// or failed membership proof returns before any segment fetch.
    pub async fn download_share(
        &self,
        share_id: &ShareId,
        dest: &Path,
        credentials: ShareCredentials,
    ) -> Result<DownloadManifest> {
        let (publication, blob) = self.publications.resolve(share_id)?;
        let index = match credentials {
            ShareCredentials::None => self.publications.open_public(&publication, &blob)?,
            ShareCredentials::Password(password) => {
                self.publications
                    .open_protected(&publication, &blob, &password)?
            }
            ShareCredentials::Identity => {
                self.publications
                    .open_private(&publication, &blob, &self.user)?
            }
        };

        let (operation_id, token) = self.registry.start(
            OperationKind::Download,
            Some(publication.folder_id),
            Some(share_id.clone()),
        )?;
        self.registry
            .update(&operation_id, 10, "fetching segments")?;

        let result: Result<DownloadManifest> = self
            .downloader
            .download(&index, dest, &token)
            .await
            .map_err(Into::into);
        self.finish_operation(&operation_id, &token, &result, |m| {
            format!("{} files ok, {} failed", m.succeeded.len(), m.failed.len())
        })?;
        result
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Signal a running operation to stop. In-flight posts complete
    /// (they cannot be un-posted); queued work drains as cancelled.
    pub fn cancel(&self, operation_id: &Uuid) -> bool {
        self.registry.cancel(operation_id)
    }

    pub fn get_progress(&self, operation_id: &Uuid) -> Result<OperationRecord> {
        Ok(self.registry.get(operation_id)?)
    }

    /// Progress as the JSON payload an RPC surface returns verbatim
    pub fn get_progress_json(&self, operation_id: &Uuid) -> Result<String> {
        let record = self.registry.get(operation_id)?;
        serde_json::to_string(&record).map_err(|e| SiloError::Internal(e.to_string()))
    }

    /// Every tracked operation, for surfaces that list before they
    /// cancel or poll
    pub fn list_operations(&self) -> Result<Vec<OperationRecord>> {
        let records = self
            .store
            .stream_operations()?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn finish_operation<T>(
        &self,
        operation_id: &Uuid,
        token: &CancelToken,
        result: &Result<T>,
        describe: impl Fn(&T) -> String,
    ) -> Result<()> {
        let (state, detail) = match result {
            Ok(value) if token.is_cancelled() => (OperationState::Cancelled, describe(value)),
            Ok(value) => (OperationState::Completed, describe(value)),
            Err(SiloError::Cancelled) => (OperationState::Cancelled, "cancelled".to_string()),
            Err(e) => (OperationState::Failed, e.to_string()),
        };
        self.registry.finish(operation_id, state, &detail)?;
        Ok(())
    }
}
