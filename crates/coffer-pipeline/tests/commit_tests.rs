//! Commit phases, rollback, and finalize recovery.

mod common;

use bytes::Bytes;
use coffer_core::{CommitMetadata, FileId, FinalizeState, ParentLink, PipelineConfig, UploadStatus};
use coffer_metadata::{MemorySessionStore, RecordStore, SessionStore, SqliteRecordStore};
use coffer_pipeline::{ModuleRegistry, NoArtifacts, Pipeline, PipelineError};
use common::mocks::FlakyRecordStore;
use common::{deliver, files_under, init_tracing, seeded_bytes, test_pipeline, OWNER};
use std::sync::atomic::Ordering;
use std::sync::Arc;

const MIB: usize = 1024 * 1024;

#[tokio::test]
async fn test_end_to_end_commit() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, records) = test_pipeline(dir.path()).await;

    // 1 MiB + 1 MiB + 512 KiB delivered out of order.
    let parts = vec![
        seeded_bytes(10, MIB),
        seeded_bytes(11, MIB),
        seeded_bytes(12, MIB / 2),
    ];
    let snap = deliver(&pipeline, "big-upload", "video.mp4", &parts, &[1, 0, 2])
        .await
        .unwrap();
    assert_eq!(snap.status, UploadStatus::Completed);

    let status = pipeline.get_status("big-upload").unwrap().unwrap();
    assert_eq!(status.bytes_uploaded, 2_621_440);
    assert!((status.progress_percent - 100.0).abs() < f64::EPSILON);

    let metadata = CommitMetadata {
        title: Some("Holiday video".to_string()),
        content_type: Some("video/mp4".to_string()),
        tags: vec!["holiday".to_string()],
        parent: Some(ParentLink {
            module: "archive".to_string(),
            id: "trip-2026".to_string(),
        }),
        ..CommitMetadata::default()
    };
    let receipt = pipeline
        .commit("documents", "big-upload", OWNER, &metadata)
        .await
        .unwrap();

    assert_eq!(receipt.file_size, 2_621_440);
    assert!(receipt.finalized);
    assert!(receipt.storage_path.starts_with("documents/"));
    assert!(!receipt.storage_path.contains(".staging"));

    // The committed file is on disk at the receipt path with the exact size.
    let final_abs = pipeline.config().storage_root.join(&receipt.storage_path);
    assert_eq!(
        tokio::fs::metadata(&final_abs).await.unwrap().len(),
        2_621_440
    );

    // Record is finalized and carries the metadata.
    let record = records.get(receipt.record_id).await.unwrap().unwrap();
    assert_eq!(record.finalize_state, FinalizeState::Finalized);
    assert_eq!(record.storage_path, receipt.storage_path);
    assert_eq!(record.title.as_deref(), Some("Holiday video"));
    assert_eq!(record.owner, OWNER);
    assert_eq!(record.content_hash, receipt.content_hash);

    let associations = records.associations(receipt.record_id).await.unwrap();
    assert_eq!(associations.tags, vec!["holiday".to_string()]);
    assert_eq!(associations.parent.unwrap().id, "trip-2026");

    // Session and temp files are gone.
    assert!(pipeline.get_status("big-upload").unwrap().is_none());
    assert!(files_under(&pipeline.config().temp_dir).is_empty());
}

#[tokio::test]
async fn test_commit_while_uploading_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, records) = test_pipeline(dir.path()).await;

    let parts = vec![Bytes::from_static(b"aaaa"), Bytes::from_static(b"bbbb")];
    deliver(&pipeline, "u1", "f.bin", &parts, &[0]).await.unwrap();

    let result = pipeline
        .commit("documents", "u1", OWNER, &CommitMetadata::default())
        .await;
    assert!(matches!(result, Err(PipelineError::InvalidState { .. })));

    // No record, session untouched.
    assert_eq!(records.count().await.unwrap(), 0);
    let status = pipeline.get_status("u1").unwrap().unwrap();
    assert_eq!(status.status, UploadStatus::Uploading);
}

#[tokio::test]
async fn test_commit_unknown_module_has_no_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, records) = test_pipeline(dir.path()).await;

    let parts = vec![Bytes::from_static(b"aaaa"), Bytes::from_static(b"bbbb")];
    deliver(&pipeline, "u1", "f.bin", &parts, &[0, 1]).await.unwrap();

    let result = pipeline
        .commit("no-such-module", "u1", OWNER, &CommitMetadata::default())
        .await;
    assert!(matches!(result, Err(PipelineError::NotFound(_))));

    assert_eq!(records.count().await.unwrap(), 0);
    // The upload is still committable afterwards.
    let receipt = pipeline
        .commit("documents", "u1", OWNER, &CommitMetadata::default())
        .await
        .unwrap();
    assert_eq!(receipt.file_size, 8);
}

#[tokio::test]
async fn test_commit_unknown_upload() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, _records) = test_pipeline(dir.path()).await;
    let result = pipeline
        .commit("documents", "never-seen", OWNER, &CommitMetadata::default())
        .await;
    assert!(matches!(result, Err(PipelineError::NotFound(_))));
}

#[tokio::test]
async fn test_commit_by_foreign_caller_mutates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, records) = test_pipeline(dir.path()).await;

    let parts = vec![Bytes::from_static(b"aaaa"), Bytes::from_static(b"bbbb")];
    deliver(&pipeline, "u1", "f.bin", &parts, &[0, 1]).await.unwrap();

    let result = pipeline
        .commit("documents", "u1", "mallory", &CommitMetadata::default())
        .await;
    assert!(matches!(result, Err(PipelineError::Ownership(_))));
    assert_eq!(records.count().await.unwrap(), 0);

    // The rightful owner can still commit.
    assert!(pipeline
        .commit("documents", "u1", OWNER, &CommitMetadata::default())
        .await
        .is_ok());
}

#[tokio::test]
async fn test_second_commit_finds_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, _records) = test_pipeline(dir.path()).await;

    let parts = vec![Bytes::from_static(b"aaaa"), Bytes::from_static(b"bbbb")];
    deliver(&pipeline, "u1", "f.bin", &parts, &[0, 1]).await.unwrap();
    pipeline
        .commit("documents", "u1", OWNER, &CommitMetadata::default())
        .await
        .unwrap();

    let result = pipeline
        .commit("documents", "u1", OWNER, &CommitMetadata::default())
        .await;
    assert!(matches!(result, Err(PipelineError::NotFound(_))));
}

#[tokio::test]
async fn test_commit_without_content_hash_releases_claim() {
    let dir = tempfile::tempdir().unwrap();
    init_tracing();
    let sessions = Arc::new(MemorySessionStore::new());
    let records = Arc::new(SqliteRecordStore::in_memory().await.unwrap());
    let pipeline = Pipeline::with_parts(
        PipelineConfig::rooted(dir.path()),
        sessions.clone(),
        records,
        ModuleRegistry::with_defaults(),
        Arc::new(NoArtifacts),
    )
    .await
    .unwrap();

    let parts = vec![Bytes::from_static(b"aaaa"), Bytes::from_static(b"bbbb")];
    deliver(&pipeline, "u1", "f.bin", &parts, &[0, 1]).await.unwrap();

    // Forge a completed session whose content hash was lost.
    let id = FileId::parse("u1").unwrap();
    sessions
        .update(
            &id,
            Box::new(|session| {
                session.content_hash = None;
                Ok(())
            }),
        )
        .unwrap();

    let result = pipeline
        .commit("documents", "u1", OWNER, &CommitMetadata::default())
        .await;
    assert!(matches!(result, Err(PipelineError::Internal(_))));

    // The claim was released: the session is not stuck mid-commit.
    let session = sessions.get(&id).unwrap().unwrap();
    assert!(session.commit_started_at.is_none());
}

#[tokio::test]
async fn test_associate_failure_rolls_back_completely() {
    let dir = tempfile::tempdir().unwrap();
    let inner = Arc::new(SqliteRecordStore::in_memory().await.unwrap());
    let flaky = Arc::new(FlakyRecordStore::new(inner));
    let pipeline = Pipeline::new(PipelineConfig::rooted(dir.path()), flaky.clone())
        .await
        .unwrap();

    let parts = vec![Bytes::from_static(b"aaaa"), Bytes::from_static(b"bbbb")];
    deliver(&pipeline, "u1", "f.bin", &parts, &[0, 1]).await.unwrap();

    flaky.fail_associate.store(true, Ordering::SeqCst);
    let result = pipeline
        .commit(
            "documents",
            "u1",
            OWNER,
            &CommitMetadata {
                tags: vec!["t".to_string()],
                ..CommitMetadata::default()
            },
        )
        .await;
    assert!(result.is_err());

    // No record, no file anywhere under storage, no leftover assembled file.
    assert_eq!(flaky.count().await.unwrap(), 0);
    assert!(files_under(&pipeline.config().storage_root).is_empty());
    assert!(files_under(&pipeline.config().temp_dir).is_empty());
    let status = pipeline.get_status("u1").unwrap().unwrap();
    assert_eq!(status.status, UploadStatus::Error);

    // Cleanup after the failed commit is a safe no-op rerun.
    pipeline.cleanup("u1").await.unwrap();
    pipeline.cleanup("u1").await.unwrap();
    assert!(pipeline.get_status("u1").unwrap().is_none());
}

#[tokio::test]
async fn test_insert_failure_rolls_back_completely() {
    let dir = tempfile::tempdir().unwrap();
    let inner = Arc::new(SqliteRecordStore::in_memory().await.unwrap());
    let flaky = Arc::new(FlakyRecordStore::new(inner));
    let pipeline = Pipeline::new(PipelineConfig::rooted(dir.path()), flaky.clone())
        .await
        .unwrap();

    let parts = vec![Bytes::from_static(b"aaaa"), Bytes::from_static(b"bbbb")];
    deliver(&pipeline, "u1", "f.bin", &parts, &[0, 1]).await.unwrap();

    flaky.fail_insert.store(true, Ordering::SeqCst);
    assert!(pipeline
        .commit("documents", "u1", OWNER, &CommitMetadata::default())
        .await
        .is_err());

    assert_eq!(flaky.count().await.unwrap(), 0);
    assert!(files_under(&pipeline.config().storage_root).is_empty());
}

#[tokio::test]
async fn test_finalize_failure_is_tolerated_and_recoverable() {
    let dir = tempfile::tempdir().unwrap();
    let inner = Arc::new(SqliteRecordStore::in_memory().await.unwrap());
    let flaky = Arc::new(FlakyRecordStore::new(inner));
    let pipeline = Pipeline::new(PipelineConfig::rooted(dir.path()), flaky.clone())
        .await
        .unwrap();

    let parts = vec![Bytes::from_static(b"aaaa"), Bytes::from_static(b"bbbb")];
    deliver(&pipeline, "u1", "f.bin", &parts, &[0, 1]).await.unwrap();

    flaky.fail_finalize.store(true, Ordering::SeqCst);
    let receipt = pipeline
        .commit("documents", "u1", OWNER, &CommitMetadata::default())
        .await
        .unwrap();

    // Commit succeeded, finalize did not: the record is durable and its
    // staging path points at a real file of the right size.
    assert!(!receipt.finalized);
    assert!(receipt.storage_path.contains(".staging"));
    let staged_abs = pipeline.config().storage_root.join(&receipt.storage_path);
    assert_eq!(tokio::fs::metadata(&staged_abs).await.unwrap().len(), 8);

    let record = flaky.get(receipt.record_id).await.unwrap().unwrap();
    assert_eq!(record.finalize_state, FinalizeState::Pending);
    assert_eq!(record.storage_path, receipt.storage_path);

    // The reconciliation pass recovers it once the store cooperates.
    flaky.fail_finalize.store(false, Ordering::SeqCst);
    assert_eq!(pipeline.finalize_pending().await.unwrap(), 1);

    let record = flaky.get(receipt.record_id).await.unwrap().unwrap();
    assert_eq!(record.finalize_state, FinalizeState::Finalized);
    assert!(!record.storage_path.contains(".staging"));
    let final_abs = pipeline.config().storage_root.join(&record.storage_path);
    assert_eq!(tokio::fs::metadata(&final_abs).await.unwrap().len(), 8);
    assert!(!staged_abs.exists());

    // Nothing left pending.
    assert_eq!(pipeline.finalize_pending().await.unwrap(), 0);
}
