//! Common test utilities and fixtures.

pub mod mocks;

use bytes::Bytes;
use coffer_core::{PipelineConfig, ProgressSnapshot};
use coffer_metadata::SqliteRecordStore;
use coffer_pipeline::{ChunkUpload, Pipeline, PipelineResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const OWNER: &str = "alice";

/// Install a test tracing subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Generate deterministic test data based on a seed.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Build a pipeline rooted in a temp directory with an in-memory record
/// store. Returns the record store too so tests can inspect it directly.
#[allow(dead_code)]
pub async fn test_pipeline(root: &Path) -> (Pipeline, Arc<SqliteRecordStore>) {
    init_tracing();
    let records = Arc::new(SqliteRecordStore::in_memory().await.unwrap());
    let pipeline = Pipeline::new(PipelineConfig::rooted(root), records.clone())
        .await
        .unwrap();
    (pipeline, records)
}

/// Deliver the given parts as chunks of one upload, in the given index
/// order. Returns the snapshot after the last delivery.
#[allow(dead_code)]
pub async fn deliver(
    pipeline: &Pipeline,
    file_id: &str,
    filename: &str,
    parts: &[Bytes],
    order: &[usize],
) -> PipelineResult<ProgressSnapshot> {
    let total_size = parts.iter().map(|p| p.len() as u64).sum();
    let mut last = None;
    for &i in order {
        last = Some(
            pipeline
                .save_chunk(ChunkUpload {
                    file_id: file_id.to_string(),
                    chunk_index: i as u32,
                    data: parts[i].clone(),
                    filename: filename.to_string(),
                    total_chunks: parts.len() as u32,
                    total_size,
                    owner: OWNER.to_string(),
                })
                .await?,
        );
    }
    Ok(last.expect("order must not be empty"))
}

/// All regular files under a directory, recursively.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub fn files_under(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                found.push(path);
            }
        }
    }
    found
}
