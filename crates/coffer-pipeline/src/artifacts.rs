//! Derived-artifact generation seam.

use crate::error::PipelineResult;
use async_trait::async_trait;
use coffer_core::RecordId;

/// Inputs available to a derived-artifact generator after a commit.
#[derive(Clone, Debug)]
pub struct ArtifactInput {
    pub record_id: RecordId,
    pub module: String,
    /// Current path relative to the storage root (final when the commit
    /// finalized, staging otherwise).
    pub storage_path: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub content_hash: String,
    pub file_size: u64,
}

/// Post-commit side effects (thumbnails, text extraction, indexing).
///
/// Generation runs fire-and-forget after the commit's point of no return:
/// a failure is logged by the caller and never affects the committed
/// record.
#[async_trait]
pub trait DerivedArtifacts: Send + Sync {
    async fn generate(&self, input: ArtifactInput) -> PipelineResult<()>;
}

/// Generator that produces nothing.
pub struct NoArtifacts;

#[async_trait]
impl DerivedArtifacts for NoArtifacts {
    async fn generate(&self, _input: ArtifactInput) -> PipelineResult<()> {
        Ok(())
    }
}
