//! Filesystem layer for the coffer ingestion pipeline.
//!
//! Owns the on-disk layout of in-flight uploads:
//! - per-upload chunk files under `temp_uploads/<file_id>/chunk_<index>`
//! - the assembled file at `temp_uploads/complete_<file_id>_<filename>`
//!
//! plus the move primitive used by the commit phases (rename with a
//! copy-then-delete fallback across filesystem boundaries).

pub mod error;
pub mod fsops;
pub mod workspace;

pub use error::{StorageError, StorageResult};
pub use workspace::{sanitize_filename, UploadWorkspace};
