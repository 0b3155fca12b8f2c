//! Download engine
//!
//! Reconstructs a share from its decrypted index. Files proceed in
//! index order; the segments of one file fetch concurrently through the
//! connection pool and land in a pre-allocated sink at
//! `segment_index * segment_length` offsets, so arrival order never
//! matters. Every fetched body is unperturbed, GCM-opened, and verified
//! against the descriptor's SHA-256 before it touches the sink; a
//! corrupt or missing copy fails over to the next redundancy copy.
//!
//! A segment with no surviving copy fails its file; remaining files
//! still complete. The caller receives a manifest of successes and
//! failures, never a silent partial success.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::error::{EngineError, Result};
use silo_core::config::SiloConfig;
use silo_core::manifest::{DownloadManifest, FailedFile};
use silo_core::types::{FileId, Sha256Digest};
use silo_core::CancelToken;
use silo_crypto::cipher::{decrypt, Sealed};
use silo_crypto::hash::StreamingHasher;
use silo_index::{pack, redundancy};
use silo_nntp::{BackoffPolicy, ConnectionPool, NntpError};
use silo_publish::{PlaintextIndex, SegmentDescriptor};

struct FetchCtx {
    pool: Arc<ConnectionPool>,
    data_key: [u8; 32],
    article_timeout: Duration,
    backoff: BackoffPolicy,
    cancel: CancelToken,
}

/// Retrieves and reassembles published folder versions
pub struct DownloadEngine {
    pool: Arc<ConnectionPool>,
    article_timeout: Duration,
    retry: silo_core::config::RetrySettings,
    max_in_flight: usize,
}

impl DownloadEngine {
    pub fn new(pool: Arc<ConnectionPool>, config: &SiloConfig) -> Self {
        Self {
            pool,
            article_timeout: config.retry.article_timeout(),
            retry: config.retry.clone(),
            max_in_flight: config.pool.max_connections,
        }
    }

    /// Reconstruct every file of the index under `dest`
    pub async fn download(
        &self,
        index: &PlaintextIndex,
        dest: &Path,
        cancel: &CancelToken,
    ) -> Result<DownloadManifest> {
        tokio::fs::create_dir_all(dest).await?;
        let ctx = Arc::new(FetchCtx {
            pool: Arc::clone(&self.pool),
            data_key: index.data_key,
            article_timeout: self.article_timeout,
            backoff: BackoffPolicy::from_settings(&self.retry),
            cancel: cancel.clone(),
        });

        let mut manifest = DownloadManifest::default();
        let by_id: HashMap<FileId, (String, u64, Sha256Digest)> = index
            .files
            .iter()
            .map(|f| (f.file_id, (f.rel_path.clone(), f.size, f.sha256)))
            .collect();

        // large files first, in index order
        for file in &index.files {
            if file.segments.is_empty() {
                continue; // reached through a pack group below
            }
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            match self
                .reconstruct_file(&ctx, dest, &file.rel_path, file.size, file.sha256, &file.segments)
                .await
            {
                Ok(bytes) => {
                    manifest.succeeded.push(file.file_id);
                    manifest.bytes_written += bytes;
                }
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                Err(e) => {
                    tracing::warn!(file = %file.rel_path, error = %e, "file reconstruction failed");
                    manifest.failed.push(FailedFile {
                        file_id: file.file_id,
                        rel_path: file.rel_path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        // pack groups: one fetch covers many small files
        for group in &index.packs {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            match fetch_segment(&ctx, &group.segment).await {
                Ok(plaintext) => {
                    let unpacked = unpack_into(dest, &plaintext, &by_id).await;
                    match unpacked {
                        Ok(done) => {
                            for (file_id, bytes) in done {
                                manifest.succeeded.push(file_id);
                                manifest.bytes_written += bytes;
                            }
                        }
                        Err(e) => {
                            fail_pack_members(&mut manifest, group, &by_id, &e.to_string());
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(pack = %group.pack_id, error = %e, "pack retrieval failed");
                    fail_pack_members(&mut manifest, group, &by_id, &e.to_string());
                }
            }
        }

        tracing::info!(
            succeeded = manifest.succeeded.len(),
            failed = manifest.failed.len(),
            bytes = manifest.bytes_written,
            "download finished"
        );
        Ok(manifest)
    }

    /// Fetch all segments of one file concurrently and write them at
    /// their offsets into a pre-allocated sink
    async fn reconstruct_file(
        &self,
        ctx: &Arc<FetchCtx>,
        dest: &Path,
        rel_path: &str,
        size: u64,
        expected: Sha256Digest,
        segments: &[SegmentDescriptor],
    ) -> Result<u64> {
        let path = dest.join(rel_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = tokio::fs::File::create(&path).await?;
        file.set_len(size).await?;

        // writer task owns the sink; fetchers send (offset, bytes)
        let (tx, mut rx) = mpsc::channel::<(u64, Vec<u8>)>(16);
        let writer = tokio::spawn(async move {
            let mut file = file;
            let mut written = 0u64;
            while let Some((offset, bytes)) = rx.recv().await {
                file.seek(std::io::SeekFrom::Start(offset)).await?;
                file.write_all(&bytes).await?;
                written += bytes.len() as u64;
            }
            file.flush().await?;
            Ok::<u64, std::io::Error>(written)
        });

        let mut fetchers: JoinSet<Result<()>> = JoinSet::new();
        let mut first_error = None;
        for descriptor in segments.iter().cloned() {
            while fetchers.len() >= self.max_in_flight {
                collect_fetch_result(&mut fetchers, &mut first_error).await;
            }
            if first_error.is_some() {
                break;
            }
            let ctx = Arc::clone(ctx);
            let tx = tx.clone();
            fetchers.spawn(async move {
                let plaintext = fetch_segment(&ctx, &descriptor).await?;
                tx.send((descriptor.offset, plaintext))
                    .await
                    .map_err(|_| EngineError::Cancelled)?;
                Ok(())
            });
        }
        while !fetchers.is_empty() {
            collect_fetch_result(&mut fetchers, &mut first_error).await;
        }
        drop(tx);

        let written = writer.await.map_err(|e| {
            EngineError::Reconstruction(format!("writer task failed: {e}"))
        })??;

        if let Some(e) = first_error {
            return Err(e);
        }

        // per-file content address must match the record
        let actual = hash_file(path.clone()).await?;
        if actual != expected {
            return Err(EngineError::Reconstruction(rel_path.to_string()));
        }
        Ok(written)
    }
}

async fn collect_fetch_result(
    fetchers: &mut JoinSet<Result<()>>,
    first_error: &mut Option<EngineError>,
) {
    if let Some(joined) = fetchers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if first_error.is_none() {
                    *first_error = Some(e);
                }
            }
            Err(join_err) => {
                if first_error.is_none() {
                    *first_error =
                        Some(EngineError::Reconstruction(format!("fetch task: {join_err}")));
                }
            }
        }
    }
}

/// Fetch one logical segment, trying redundancy copies in order until
/// one decodes, decrypts, and hashes clean
async fn fetch_segment(ctx: &Arc<FetchCtx>, descriptor: &SegmentDescriptor) -> Result<Vec<u8>> {
    let mut locations: Vec<_> = descriptor.locations.iter().collect();
    locations.sort_by_key(|l| l.redundancy);

    for location in locations {
        if ctx.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let mut attempt = 0u32;
        loop {
            match fetch_copy(ctx, &location.message_id, location.redundancy, descriptor).await {
                Ok(plaintext) => return Ok(plaintext),
                Err(CopyFailure::Gone(reason)) => {
                    // this copy is missing or corrupt: fail over
                    tracing::debug!(
                        message_id = %location.message_id,
                        %reason,
                        "redundancy copy unusable, trying next"
                    );
                    break;
                }
                Err(CopyFailure::Transient(e)) => {
                    attempt += 1;
                    if ctx.backoff.exhausted(attempt) {
                        tracing::debug!(
                            message_id = %location.message_id,
                            error = %e,
                            "copy retries exhausted, trying next"
                        );
                        break;
                    }
                    tokio::time::sleep(ctx.backoff.delay(attempt - 1)).await;
                }
            }
        }
    }

    Err(EngineError::Unrecoverable {
        segment_index: descriptor.segment_index,
    })
}

enum CopyFailure {
    /// Missing article or integrity failure: next copy
    Gone(String),
    /// Network trouble: same copy again after backoff
    Transient(NntpError),
}

async fn fetch_copy(
    ctx: &Arc<FetchCtx>,
    message_id: &silo_core::types::MessageId,
    copy: u8,
    descriptor: &SegmentDescriptor,
) -> std::result::Result<Vec<u8>, CopyFailure> {
    let mut session = ctx
        .pool
        .acquire()
        .await
        .map_err(CopyFailure::Transient)?;

    let outcome = tokio::time::timeout(
        ctx.article_timeout,
        session.session().article(message_id),
    )
    .await;

    let article = match outcome {
        Ok(Ok(article)) => {
            ctx.pool.release(session, true).await;
            article
        }
        Ok(Err(NntpError::NotFound(id))) => {
            ctx.pool.release(session, true).await;
            return Err(CopyFailure::Gone(format!("no such article {id}")));
        }
        Ok(Err(e)) => {
            ctx.pool.release(session, false).await;
            return if e.is_transient() {
                Err(CopyFailure::Transient(e))
            } else {
                Err(CopyFailure::Gone(e.to_string()))
            };
        }
        Err(_elapsed) => {
            ctx.pool.release(session, false).await;
            return Err(CopyFailure::Transient(NntpError::Timeout));
        }
    };

    // strip the per-copy perturbation, open the GCM seal, verify the
    // content address; any failure burns only this copy
    let body = redundancy::decode_copy(&article.body, copy)
        .map_err(|e| CopyFailure::Gone(e.to_string()))?;
    let sealed = Sealed::from_bytes(&body).map_err(|e| CopyFailure::Gone(e.to_string()))?;
    let plaintext =
        decrypt(&sealed, &ctx.data_key).map_err(|e| CopyFailure::Gone(e.to_string()))?;

    let actual = silo_crypto::hash::sha256(&plaintext);
    if actual != descriptor.sha256 {
        return Err(CopyFailure::Gone(format!(
            "hash mismatch: expected {}, got {}",
            descriptor.sha256, actual
        )));
    }
    Ok(plaintext)
}

/// Write each known sub-file of a decoded pack payload; returns
/// (file_id, bytes) per success
async fn unpack_into(
    dest: &Path,
    plaintext: &[u8],
    by_id: &HashMap<FileId, (String, u64, Sha256Digest)>,
) -> Result<Vec<(FileId, u64)>> {
    let (entries, payload) = pack::decode(plaintext)?;
    let mut done = Vec::new();

    for entry in &entries {
        // entries from superseded versions are not in this snapshot
        let Some((rel_path, size, expected)) = by_id.get(&entry.file_id) else {
            continue;
        };
        let bytes = pack::slice_entry(&payload, entry);
        if bytes.len() as u64 != *size {
            return Err(EngineError::Reconstruction(rel_path.clone()));
        }
        let actual = silo_crypto::hash::sha256(bytes);
        if actual != *expected {
            return Err(EngineError::Reconstruction(rel_path.clone()));
        }

        let path = dest.join(rel_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        done.push((entry.file_id, bytes.len() as u64));
    }
    Ok(done)
}

fn fail_pack_members(
    manifest: &mut DownloadManifest,
    group: &silo_publish::IndexPack,
    by_id: &HashMap<FileId, (String, u64, Sha256Digest)>,
    reason: &str,
) {
    for entry in &group.entries {
        if let Some((rel_path, _, _)) = by_id.get(&entry.file_id) {
            manifest.failed.push(FailedFile {
                file_id: entry.file_id,
                rel_path: rel_path.clone(),
                reason: reason.to_string(),
            });
        }
    }
}

/// Streaming SHA-256 of a reconstructed file
async fn hash_file(path: PathBuf) -> Result<Sha256Digest> {
    tokio::task::spawn_blocking(move || -> Result<Sha256Digest> {
        use std::io::Read;
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = StreamingHasher::new();
        let mut buf = vec![0u8; 1024 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    })
    .await
    .map_err(|e| EngineError::Reconstruction(format!("hash task: {e}")))?
}
