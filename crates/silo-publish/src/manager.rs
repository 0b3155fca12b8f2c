//! Publication manager
//!
//! `publish` snapshots a folder version, builds the plaintext index,
//! derives the per-mode share key, encrypts, mints the share ID, and
//! persists everything in one transaction. `resolve` hands back the
//! publication and its blob; decryption stays with the caller-facing
//! `open_*` helpers so the manager itself never holds a derived key
//! longer than one call.
//!
//! `revoke` sets expiry to now. Already-posted segments stay
//! addressable to anyone who captured their Message-IDs; that is the
//! nature of an append-only backing store.

use chrono::{Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::{HashMap, HashSet};

use crate::error::{PublishError, Result};
use crate::index::{
    IndexFile, IndexPack, PlaintextIndex, SegmentDescriptor, SegmentLocation, INDEX_FORMAT_VERSION,
};
use silo_core::config::KdfSettings;
use silo_core::types::{
    AccessLevel, AuthorizedUser, ChallengeId, ChallengeRecord, FileId, Folder, Publication,
    SegmentParent, SegmentRecord, ShareId, UserId,
};
use silo_crypto::access;
use silo_crypto::identity::{FolderKeys, UserKeys};
use silo_crypto::kdf::KdfCache;
use silo_crypto::obfuscate::mint_share_id;
use silo_crypto::CryptoError;
use silo_store::Store;

/// Caller-supplied publication parameters
#[derive(Clone, Debug, Default)]
pub struct PublishOptions {
    /// Required for PROTECTED shares
    pub password: Option<String>,
    /// Authorized set for PRIVATE shares
    pub authorized_users: Vec<UserId>,
    /// Hours until expiry; None = no expiry
    pub expiry_hours: Option<i64>,
}

/// Publication lifecycle over the entity store
pub struct PublicationManager {
    store: Store,
    kdf: KdfSettings,
    /// Memoizes scrypt outputs; PROTECTED shares re-derive the same key
    /// repeatedly in one session
    kdf_cache: KdfCache,
}

impl PublicationManager {
    pub fn new(store: Store, kdf: KdfSettings) -> Self {
        Self {
            store,
            kdf,
            kdf_cache: KdfCache::new(),
        }
    }

    /// Drop cached derived keys (session end, folder deletion)
    pub fn clear_key_cache(&self) {
        self.kdf_cache.clear();
    }

    /// Publish the folder's current version under a fresh share ID
    pub fn publish(
        &self,
        folder: &Folder,
        folder_keys: &FolderKeys,
        access: AccessLevel,
        opts: &PublishOptions,
    ) -> Result<ShareId> {
        let index = self.build_index(folder, folder_keys)?;
        let share_id = mint_share_id();

        let mut kdf = None;
        let mut authorized = Vec::new();
        let share_key = match access {
            AccessLevel::Public => access::share_key_public(&share_id, &folder.folder_id),
            AccessLevel::Private => {
                let key = access::mint_private_share_key();
                for user_id in &opts.authorized_users {
                    let user = self.store.get_user(user_id)?;
                    authorized.push(access::authorize_user(
                        &share_id,
                        &user.ed25519_public,
                        &user.x25519_public,
                        &key,
                    )?);
                }
                key
            }
            AccessLevel::Protected => {
                let password = opts
                    .password
                    .as_deref()
                    .ok_or(PublishError::PasswordRequired)?;
                let share_kdf = access::mint_share_kdf(&self.kdf);
                let key = access::share_key_protected(password, &share_kdf)?;
                kdf = Some(share_kdf);
                key
            }
        };

        let blob = index.seal(&share_key)?;
        let now = Utc::now();
        let publication = Publication {
            share_id: share_id.clone(),
            folder_id: folder.folder_id,
            folder_version: folder.current_version,
            access,
            kdf,
            created_at: now,
            expires_at: opts.expiry_hours.map(|h| now + Duration::hours(h)),
            access_count: 0,
        };

        self.store
            .create_publication(&publication, &blob, &authorized)?;

        tracing::info!(
            share = %share_id,
            folder = %folder.folder_id,
            version = folder.current_version,
            ?access,
            files = index.files.len(),
            packs = index.packs.len(),
            "published share"
        );
        Ok(share_id)
    }

    /// Load the publication and its encrypted blob. The manager never
    /// derives the key here.
    pub fn resolve(&self, share_id: &ShareId) -> Result<(Publication, Vec<u8>)> {
        let mut publication = self
            .store
            .get_publication(share_id)
            .map_err(|_| PublishError::UnknownShare(share_id.clone()))?;

        if publication.is_expired(Utc::now()) {
            return Err(PublishError::Expired(share_id.clone()));
        }

        publication.access_count += 1;
        self.store.put_publication(&publication)?;

        let blob = self.store.get_publication_blob(share_id)?;
        Ok((publication, blob))
    }

    /// Expire a share now. Does not and cannot unpost articles.
    pub fn revoke(&self, share_id: &ShareId) -> Result<()> {
        let mut publication = self
            .store
            .get_publication(share_id)
            .map_err(|_| PublishError::UnknownShare(share_id.clone()))?;
        publication.expires_at = Some(Utc::now());
        self.store.put_publication(&publication)?;
        tracing::info!(share = %share_id, "revoked share");
        Ok(())
    }

    /// Extend a PRIVATE share's authorized set (the only permitted
    /// post-creation mutation)
    pub fn add_authorized_user(&self, share_id: &ShareId, user_id: &UserId) -> Result<()> {
        let publication = self
            .store
            .get_publication(share_id)
            .map_err(|_| PublishError::UnknownShare(share_id.clone()))?;
        if publication.access != AccessLevel::Private {
            return Err(PublishError::WrongAccessLevel(publication.access));
        }
        // the share key is not recoverable server-side; re-wrap requires
        // an existing member, so this entry starts commitment-only and
        // is completed by the owner client
        let user = self.store.get_user(user_id)?;
        let entry = AuthorizedUser {
            share_id: share_id.clone(),
            commitment: access::commitment(share_id, &user.ed25519_public),
            ed25519_public: user.ed25519_public,
            wrapped_share_key: Vec::new(),
        };
        self.store.add_authorized_user(&entry)?;
        Ok(())
    }

    /// Decrypt a PUBLIC share's index; the key derives from the handle
    pub fn open_public(&self, publication: &Publication, blob: &[u8]) -> Result<PlaintextIndex> {
        if publication.access != AccessLevel::Public {
            return Err(PublishError::WrongAccessLevel(publication.access));
        }
        let key = access::share_key_public(&publication.share_id, &publication.folder_id);
        PlaintextIndex::open(blob, &key)
    }

    /// Decrypt a PROTECTED share's index with a password. A wrong
    /// password surfaces as [`PublishError::BadPassword`]; no segment
    /// fetch ever starts.
    pub fn open_protected(
        &self,
        publication: &Publication,
        blob: &[u8],
        password: &str,
    ) -> Result<PlaintextIndex> {
        if publication.access != AccessLevel::Protected {
            return Err(PublishError::WrongAccessLevel(publication.access));
        }
        let kdf = publication
            .kdf
            .as_ref()
            .ok_or(PublishError::MalformedIndex)?;
        let key = self.kdf_cache.scrypt_raw(
            password.as_bytes(),
            &kdf.salt,
            kdf.scrypt_log_n,
            kdf.scrypt_r,
            kdf.scrypt_p,
        )?;
        match PlaintextIndex::open(blob, &key) {
            Err(PublishError::Crypto(CryptoError::TagMismatch)) => Err(PublishError::BadPassword),
            other => other,
        }
    }

    /// Run the challenge-response flow for a PRIVATE share and decrypt
    /// its index. The whole exchange happens in the local client; no
    /// observer learns which user accessed which share.
    pub fn open_private(
        &self,
        publication: &Publication,
        blob: &[u8],
        user: &UserKeys,
    ) -> Result<PlaintextIndex> {
        if publication.access != AccessLevel::Private {
            return Err(PublishError::WrongAccessLevel(publication.access));
        }
        let authorized = self.store.authorized_users(&publication.share_id)?;

        let challenge = access::mint_challenge();
        let mut id_bytes = [0u8; 16];
        OsRng.fill_bytes(&mut id_bytes);
        let challenge_id = ChallengeId::new(id_bytes);
        self.store.put_challenge(&ChallengeRecord {
            challenge_id,
            share_id: publication.share_id.clone(),
            challenge,
            issued_at: Utc::now(),
            used: false,
        })?;

        let proof = access::prove_access(user, &challenge, &publication.share_id);
        let verified = access::verify_access(
            &authorized,
            &user.ed25519_public(),
            &challenge,
            &publication.share_id,
            &proof,
        );

        // challenges are single-use regardless of the verdict
        self.store.delete_challenge(&challenge_id)?;
        let entry = verified.map_err(|_| PublishError::PermissionDenied)?;

        let key =
            access::recover_share_key(entry, user).map_err(|_| PublishError::PermissionDenied)?;
        PlaintextIndex::open(blob, &key)
    }

    /// Gather the folder snapshot into a plaintext index. Every logical
    /// segment must have at least one posted copy.
    fn build_index(&self, folder: &Folder, folder_keys: &FolderKeys) -> Result<PlaintextIndex> {
        let version = folder.current_version;
        let mut files = Vec::new();
        let mut missing = 0u64;
        let mut small_files: HashSet<FileId> = HashSet::new();

        for row in self.store.stream_snapshot(&folder.folder_id, version)? {
            let file = row?;
            let segments = collect_descriptors(
                self.store
                    .stream_segments(&SegmentParent::File(file.file_id))?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
                &mut missing,
            );
            if segments.is_empty() {
                small_files.insert(file.file_id);
            }
            files.push(IndexFile {
                file_id: file.file_id,
                rel_path: file.rel_path,
                size: file.size,
                sha256: file.sha256,
                mime: file.mime,
                segments,
            });
        }

        // small files live in pack groups; choose the newest group (up
        // to the snapshot version) covering each file id
        let mut chosen: HashMap<FileId, silo_core::types::PackGroup> = HashMap::new();
        for group in self.store.stream_all_pack_groups(&folder.folder_id)? {
            let group = group?;
            if group.folder_version > version {
                continue;
            }
            for entry in &group.entries {
                if small_files.contains(&entry.file_id) {
                    // version-ascending stream: later groups overwrite
                    chosen.insert(entry.file_id, group.clone());
                }
            }
        }

        let mut packs: Vec<IndexPack> = Vec::new();
        for group in chosen.into_values() {
            if packs.iter().any(|p| p.pack_id == group.pack_id) {
                continue;
            }
            let records = self
                .store
                .stream_segments(&SegmentParent::Pack(group.pack_id))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let mut descriptors = collect_descriptors(records, &mut missing);
            if let Some(segment) = descriptors.pop() {
                packs.push(IndexPack {
                    pack_id: group.pack_id,
                    total_length: group.total_length,
                    entries: group.entries,
                    segment,
                });
            }
        }
        packs.sort_by_key(|p| p.pack_id.to_hex());

        if missing > 0 {
            return Err(PublishError::UploadIncomplete { missing });
        }

        Ok(PlaintextIndex {
            format_version: INDEX_FORMAT_VERSION,
            folder_id: folder.folder_id,
            folder_version: version,
            data_key: *folder_keys.data_key,
            files,
            packs,
        })
    }
}

/// Fold segment rows (all copies) into per-index descriptors with their
/// posted locations; count logical segments with no surviving copy
fn collect_descriptors(rows: Vec<SegmentRecord>, missing: &mut u64) -> Vec<SegmentDescriptor> {
    let mut descriptors: Vec<SegmentDescriptor> = Vec::new();
    for row in rows {
        let descriptor = match descriptors
            .iter_mut()
            .find(|d| d.segment_index == row.segment_index)
        {
            Some(d) => d,
            None => {
                descriptors.push(SegmentDescriptor {
                    segment_index: row.segment_index,
                    offset: row.offset,
                    length: row.length,
                    sha256: row.sha256,
                    locations: Vec::new(),
                });
                descriptors.last_mut().expect("just pushed")
            }
        };
        if let Some(message_id) = row.message_id {
            descriptor.locations.push(SegmentLocation {
                redundancy: row.redundancy,
                message_id,
                usenet_subject: row.subjects.usenet,
            });
        }
    }
    descriptors.sort_by_key(|d| d.segment_index);
    *missing += descriptors.iter().filter(|d| d.locations.is_empty()).count() as u64;
    descriptors
}
