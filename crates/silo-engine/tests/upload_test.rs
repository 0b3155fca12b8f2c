//! Upload engine tests against a real store and the in-memory backend

use std::fs;
use std::sync::Arc;

use chrono::Utc;
use silo_core::types::{FileVersion, Folder, SegmentParent, SegmentState, Sha256Digest};
use silo_core::{CancelToken, SiloConfig};
use silo_engine::UploadEngine;
use silo_index::segmenter::{mint_file_id, SegmentPlanner};
use silo_nntp::testing::MemoryNntp;
use silo_nntp::ConnectionPool;
use silo_store::Store;
use tempfile::TempDir;

struct Fixture {
    _store_dir: TempDir,
    _source: TempDir,
    store: Store,
    backend: Arc<MemoryNntp>,
    engine: UploadEngine,
    folder: Folder,
}

fn fixture() -> Fixture {
    let store_dir = TempDir::new().unwrap();
    let source = TempDir::new().unwrap();
    let store = Store::open(store_dir.path()).unwrap();

    let mut config = SiloConfig::default();
    config.pool.max_connections = 2;
    config.pool.acquire_timeout_sec = 1;
    config.retry.retry_backoff_base_ms = 5;
    config.retry.retry_backoff_cap_ms = 20;

    let folder = Folder {
        folder_id: silo_core::types::FolderId::new([1; 32]),
        owner: silo_core::types::UserId::new([2; 32]),
        root_path: source.path().display().to_string(),
        ed25519_public: [3; 32],
        wrapped_signing_key: Vec::new(),
        wrapped_data_key: Vec::new(),
        current_version: 1,
        deleted: false,
        created_at: Utc::now(),
    };
    store.put_folder(&folder).unwrap();

    // one 1 MB file -> two segments at the default segment size
    fs::write(source.path().join("data.bin"), vec![0xA5u8; 1_000_000]).unwrap();
    let row = FileVersion {
        file_id: mint_file_id(),
        folder_id: folder.folder_id,
        rel_path: "data.bin".to_string(),
        version: 1,
        size: 1_000_000,
        sha256: Sha256Digest::default(),
        mime: None,
        mtime: 0,
        deleted: false,
        created_at: Utc::now(),
    };
    let mut planner = SegmentPlanner::new(folder.folder_id, 1, &config.segments, [7; 32]);
    let records = planner.plan_file(source.path(), &row).unwrap();
    assert_eq!(records.len(), 2);
    store.insert_file_with_segments(&row, &records).unwrap();

    let backend = MemoryNntp::new();
    let pool = Arc::new(ConnectionPool::new(backend.factory(), config.pool.clone()));
    let engine = UploadEngine::new(store.clone(), pool, &config);

    Fixture {
        _store_dir: store_dir,
        _source: source,
        store,
        backend,
        engine,
        folder,
    }
}

fn segment_states(fx: &Fixture) -> Vec<SegmentState> {
    let file = fx
        .store
        .stream_snapshot(&fx.folder.folder_id, 1)
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    fx.store
        .stream_segments(&SegmentParent::File(file.file_id))
        .unwrap()
        .map(|r| r.unwrap().state)
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_clean_run_posts_everything() {
    let fx = fixture();
    let outcome = fx
        .engine
        .upload_folder(&fx.folder, [9; 32], &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.posted, 2);
    assert_eq!(outcome.failed, 0);
    assert_eq!(fx.backend.article_count(), 2);
    assert!(segment_states(&fx)
        .iter()
        .all(|s| *s == SegmentState::Posted));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_permanent_rejection_marks_failed() {
    let fx = fixture();
    fx.backend.reject_posts(true);

    let outcome = fx
        .engine
        .upload_folder(&fx.folder, [9; 32], &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.posted, 0);
    assert_eq!(outcome.failed, 2);
    assert_eq!(fx.backend.article_count(), 0);

    let file = fx
        .store
        .stream_snapshot(&fx.folder.folder_id, 1)
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    for record in fx
        .store
        .stream_segments(&SegmentParent::File(file.file_id))
        .unwrap()
    {
        let record = record.unwrap();
        assert_eq!(record.state, SegmentState::Failed);
        assert!(record.failure.as_deref().unwrap().contains("502"));
        assert!(record.message_id.is_none());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancelled_run_drains_to_cancelled() {
    let fx = fixture();
    let cancel = CancelToken::new();
    cancel.cancel();

    let outcome = fx
        .engine
        .upload_folder(&fx.folder, [9; 32], &cancel)
        .await
        .unwrap();

    assert_eq!(outcome.posted, 0);
    assert_eq!(outcome.cancelled, 2);
    assert!(segment_states(&fx)
        .iter()
        .all(|s| *s == SegmentState::Cancelled));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rerun_after_permanent_failure_skips_failed() {
    let fx = fixture();
    fx.backend.reject_posts(true);
    fx.engine
        .upload_folder(&fx.folder, [9; 32], &CancelToken::new())
        .await
        .unwrap();

    // failed segments are not silently retried by a later run
    fx.backend.reject_posts(false);
    let outcome = fx
        .engine
        .upload_folder(&fx.folder, [9; 32], &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.posted, 0);
    assert_eq!(outcome.failed, 0);
}
