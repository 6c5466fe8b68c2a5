//! Core domain types and shared logic for the coffer ingestion pipeline.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Upload identifiers and the session lifecycle
//! - Chunk checksums and whole-file content hashes
//! - Persisted record shapes and commit metadata
//! - Pipeline configuration

pub mod config;
pub mod error;
pub mod hash;
pub mod record;
pub mod session;

pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use hash::{ChunkChecksum, ChunkHasher, ContentHash, ContentHasher};
pub use record::{
    Associations, CommitMetadata, FinalizeState, NewRecord, ParentLink, RecordId, RecordRow,
};
pub use session::{FileId, ProgressSnapshot, UploadSession, UploadStatus};

/// Default maximum chunk size: 8 MiB
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Default maximum assembled file size: 4 GiB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 4 * 1024 * 1024 * 1024;
