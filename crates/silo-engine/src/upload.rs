//! Upload engine
//!
//! A bounded priority queue feeds a worker pool sized by the connection
//! pool limit. Each worker handles one segment at a time: reload the
//! plaintext, encrypt, perturb the redundancy copy, mint a Message-ID,
//! post, and commit `(message_id, subject, posted_at)` with the state
//! advance in a single transaction. Transient failures re-enter the
//! queue with exponential backoff and jitter; permanent failures mark
//! the segment `failed` with a cause.
//!
//! Ordering between segments is deliberately unspecified; reassembly
//! uses the indexed ordinal, never post order. Cancellation lets
//! in-flight posts finish (posts cannot be un-posted), then drains the
//! queue and marks what remains `cancelled`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::Result;
use crate::queue::JobQueue;
use silo_core::config::{NntpSettings, QueueSettings, RetrySettings, SiloConfig};
use silo_core::types::{Folder, PackGroup, SegmentParent, SegmentRecord, SegmentState};
use silo_core::CancelToken;
use silo_crypto::cipher::encrypt;
use silo_crypto::obfuscate::mint_message_id;
use silo_index::{payload, redundancy};
use silo_nntp::{build_article, BackoffPolicy, ConnectionPool, NntpError};
use silo_store::Store;

/// What this run did
#[derive(Clone, Debug, Default)]
pub struct UploadOutcome {
    pub posted: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// Where a segment's plaintext comes from at post time
#[derive(Clone)]
enum PayloadSource {
    File { rel_path: String },
    Pack { group: PackGroup },
}

#[derive(Clone)]
struct UploadJob {
    parent: SegmentParent,
    segment_index: u32,
    redundancy: u8,
    source: PayloadSource,
    attempt: u32,
}

enum Disposition {
    /// Worth a backoff retry
    Retry(NntpError),
    /// Marked failed, cause recorded
    Permanent(String),
}

struct WorkerCtx {
    store: Store,
    pool: Arc<ConnectionPool>,
    backoff: BackoffPolicy,
    nntp: NntpSettings,
    article_timeout: Duration,
    root: PathBuf,
    data_key: [u8; 32],
    queue: JobQueue<UploadJob>,
    cancel: CancelToken,
    posted: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

/// Posts the not-yet-posted segments of a folder version
pub struct UploadEngine {
    store: Store,
    pool: Arc<ConnectionPool>,
    nntp: NntpSettings,
    retry: RetrySettings,
    queue: QueueSettings,
    worker_count: usize,
}

impl UploadEngine {
    pub fn new(store: Store, pool: Arc<ConnectionPool>, config: &SiloConfig) -> Self {
        Self {
            store,
            pool,
            nntp: config.nntp.clone(),
            retry: config.retry.clone(),
            queue: config.queue.clone(),
            worker_count: config.pool.max_connections,
        }
    }

    /// Enumerate unposted segments of the folder's current version,
    /// dispatch them, and wait for the queue to drain. Safe to re-run
    /// after a crash: `uploading` leftovers re-queue, `posted` rows are
    /// skipped.
    pub async fn upload_folder(
        &self,
        folder: &Folder,
        data_key: [u8; 32],
        cancel: &CancelToken,
    ) -> Result<UploadOutcome> {
        let jobs = self.collect_jobs(folder)?;
        tracing::info!(
            folder = %folder.folder_id,
            version = folder.current_version,
            segments = jobs.len(),
            "starting upload run"
        );

        let ctx = Arc::new(WorkerCtx {
            store: self.store.clone(),
            pool: Arc::clone(&self.pool),
            backoff: BackoffPolicy::from_settings(&self.retry),
            nntp: self.nntp.clone(),
            article_timeout: self.retry.article_timeout(),
            root: PathBuf::from(&folder.root_path),
            data_key,
            queue: JobQueue::new(&self.queue),
            cancel: cancel.clone(),
            posted: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        });

        let mut workers = JoinSet::new();
        for _ in 0..self.worker_count.max(1) {
            let ctx = Arc::clone(&ctx);
            workers.spawn(async move { worker_loop(ctx).await });
        }

        // producer: ingestion blocks at the high-water mark
        for job in jobs {
            if !ctx.queue.push(0, job, cancel).await {
                break;
            }
        }
        ctx.queue.close();

        while workers.join_next().await.is_some() {}

        // whatever never dispatched is cancelled work
        for job in ctx.queue.drain_remaining() {
            if self
                .store
                .update_segment_state(
                    &job.parent,
                    job.segment_index,
                    job.redundancy,
                    SegmentState::Cancelled,
                    None,
                )
                .is_ok()
            {
                ctx.cancelled.fetch_add(1, Ordering::Relaxed);
            }
        }

        let outcome = UploadOutcome {
            posted: ctx.posted.load(Ordering::Relaxed),
            failed: ctx.failed.load(Ordering::Relaxed),
            cancelled: ctx.cancelled.load(Ordering::Relaxed),
        };
        tracing::info!(
            posted = outcome.posted,
            failed = outcome.failed,
            cancelled = outcome.cancelled,
            "upload run finished"
        );
        Ok(outcome)
    }

    /// Gather segment rows needing a post: `pending` (fresh), `queued`
    /// (interrupted), `uploading` (crashed mid-post; re-queued, which
    /// accepts at-least-once delivery)
    fn collect_jobs(&self, folder: &Folder) -> Result<Vec<UploadJob>> {
        let version = folder.current_version;
        let mut jobs = Vec::new();

        for row in self.store.stream_snapshot(&folder.folder_id, version)? {
            let file = row?;
            let parent = SegmentParent::File(file.file_id);
            let records: Vec<SegmentRecord> = self
                .store
                .stream_segments(&parent)?
                .collect::<std::result::Result<_, _>>()?;
            for record in records {
                if let Some(job) = self.normalize(record, || PayloadSource::File {
                    rel_path: file.rel_path.clone(),
                })? {
                    jobs.push(job);
                }
            }
        }

        let groups: Vec<PackGroup> = self
            .store
            .stream_all_pack_groups(&folder.folder_id)?
            .collect::<std::result::Result<_, _>>()?;
        for group in groups {
            if group.folder_version > version {
                continue;
            }
            let parent = SegmentParent::Pack(group.pack_id);
            let records: Vec<SegmentRecord> = self
                .store
                .stream_segments(&parent)?
                .collect::<std::result::Result<_, _>>()?;
            for record in records {
                if let Some(job) = self.normalize(record, || PayloadSource::Pack {
                    group: group.clone(),
                })? {
                    jobs.push(job);
                }
            }
        }
        Ok(jobs)
    }

    /// Normalize one record into a job if it still needs posting
    fn normalize(
        &self,
        record: SegmentRecord,
        source: impl FnOnce() -> PayloadSource,
    ) -> Result<Option<UploadJob>> {
        let state = match record.state {
            SegmentState::Posted | SegmentState::Failed => return Ok(None),
            SegmentState::Pending => {
                self.store.update_segment_state(
                    &record.parent,
                    record.segment_index,
                    record.redundancy,
                    SegmentState::Queued,
                    None,
                )?;
                SegmentState::Queued
            }
            // crash leftovers: commit did not reach, back to the queue
            SegmentState::Uploading => {
                self.store.update_segment_state(
                    &record.parent,
                    record.segment_index,
                    record.redundancy,
                    SegmentState::Queued,
                    None,
                )?;
                SegmentState::Queued
            }
            SegmentState::Queued => SegmentState::Queued,
            // a cancelled run's remains are not picked up implicitly
            SegmentState::Cancelled => return Ok(None),
        };
        debug_assert_eq!(state, SegmentState::Queued);

        Ok(Some(UploadJob {
            parent: record.parent,
            segment_index: record.segment_index,
            redundancy: record.redundancy,
            source: source(),
            attempt: 0,
        }))
    }
}

async fn worker_loop(ctx: Arc<WorkerCtx>) {
    while let Some(job) = ctx.queue.pop(&ctx.cancel).await {
        match post_one(&ctx, &job).await {
            Ok(true) => {
                ctx.posted.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {} // already posted elsewhere, skipped
            Err(Disposition::Retry(cause)) => handle_retry(&ctx, job, cause),
            Err(Disposition::Permanent(cause)) => {
                tracing::warn!(%cause, "segment failed permanently");
                let _ = ctx.store.update_segment_state(
                    &job.parent,
                    job.segment_index,
                    job.redundancy,
                    SegmentState::Failed,
                    Some(cause),
                );
                ctx.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn handle_retry(ctx: &Arc<WorkerCtx>, mut job: UploadJob, cause: NntpError) {
    job.attempt += 1;
    if ctx.backoff.exhausted(job.attempt) {
        tracing::warn!(%cause, attempts = job.attempt, "segment retries exhausted");
        let _ = ctx.store.update_segment_state(
            &job.parent,
            job.segment_index,
            job.redundancy,
            SegmentState::Failed,
            Some(format!("retries exhausted: {cause}")),
        );
        ctx.failed.fetch_add(1, Ordering::Relaxed);
        return;
    }

    // back to the queue, due after the backoff delay
    let delay = ctx.backoff.delay(job.attempt - 1);
    tracing::debug!(%cause, attempt = job.attempt, ?delay, "requeueing segment");
    let _ = ctx.store.update_segment_state(
        &job.parent,
        job.segment_index,
        job.redundancy,
        SegmentState::Queued,
        None,
    );
    let ready_at = Instant::now() + delay;
    ctx.queue.push_delayed(0, job, ready_at);
}

/// Returns Ok(true) on a committed post, Ok(false) on a skip
async fn post_one(ctx: &Arc<WorkerCtx>, job: &UploadJob) -> std::result::Result<bool, Disposition> {
    let record = ctx
        .store
        .get_segment(&job.parent, job.segment_index, job.redundancy)
        .map_err(|e| Disposition::Permanent(e.to_string()))?;
    if record.state == SegmentState::Posted {
        return Ok(false);
    }

    ctx.store
        .update_segment_state(
            &job.parent,
            job.segment_index,
            job.redundancy,
            SegmentState::Uploading,
            None,
        )
        .map_err(|e| Disposition::Permanent(e.to_string()))?;

    // rebuild the plaintext slice and seal it; the article body is
    // nonce || tag || ciphertext, perturbed per redundancy copy
    let plaintext = load_payload(&ctx.root, &job.source, &record)
        .map_err(|e| Disposition::Permanent(e.to_string()))?;
    let body = encrypt(&plaintext, &ctx.data_key)
        .map_err(|e| Disposition::Permanent(e.to_string()))?
        .to_bytes();
    let wire_body = redundancy::encode_copy(&body, job.redundancy);

    let message_id = mint_message_id();
    let article = build_article(
        &ctx.nntp.from,
        &ctx.nntp.group,
        &record.subjects.usenet,
        &message_id,
        wire_body,
    );

    let mut session = ctx.pool.acquire().await.map_err(classify)?;

    let outcome = tokio::time::timeout(ctx.article_timeout, async {
        session.session().select_group(&ctx.nntp.group).await?;
        session.session().post(&article).await
    })
    .await;

    match outcome {
        Ok(Ok(())) => {
            ctx.pool.release(session, true).await;
            ctx.store
                .commit_posted(
                    &job.parent,
                    job.segment_index,
                    job.redundancy,
                    &message_id,
                    chrono::Utc::now(),
                )
                .map_err(|e| Disposition::Permanent(e.to_string()))?;
            tracing::debug!(message_id = %message_id, "segment posted");
            Ok(true)
        }
        Ok(Err(e)) => {
            ctx.pool.release(session, false).await;
            Err(classify(e))
        }
        Err(_elapsed) => {
            // a timed-out post may still have landed; at-least-once is
            // the accepted contract, so retry with a fresh Message-ID
            ctx.pool.release(session, false).await;
            Err(Disposition::Retry(NntpError::Timeout))
        }
    }
}

fn classify(err: NntpError) -> Disposition {
    if err.is_transient() {
        Disposition::Retry(err)
    } else {
        Disposition::Permanent(err.to_string())
    }
}

fn load_payload(
    root: &Path,
    source: &PayloadSource,
    record: &SegmentRecord,
) -> crate::error::Result<Vec<u8>> {
    let bytes = match source {
        PayloadSource::File { rel_path } => payload::load_file_segment(root, rel_path, record)?,
        PayloadSource::Pack { group } => payload::load_pack_segment(root, group)?,
    };
    Ok(bytes)
}
