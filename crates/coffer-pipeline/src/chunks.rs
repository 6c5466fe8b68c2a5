//! Chunk intake: validation, session bookkeeping, chunk persistence.

use crate::error::{PipelineError, PipelineResult};
use bytes::Bytes;
use coffer_core::{
    ChunkChecksum, FileId, PipelineConfig, ProgressSnapshot, UploadSession, UploadStatus,
};
use coffer_metadata::SessionStore;
use coffer_storage::{sanitize_filename, UploadWorkspace};
use std::sync::Arc;
use tracing::instrument;

/// One incoming chunk together with the upload's declared shape.
///
/// Every chunk re-declares the shape; the first one creates the session
/// and later ones must agree with it.
#[derive(Clone, Debug)]
pub struct ChunkUpload {
    pub file_id: String,
    pub chunk_index: u32,
    pub data: Bytes,
    pub filename: String,
    pub total_chunks: u32,
    pub total_size: u64,
    pub owner: String,
}

/// Accepts chunks, tracks per-upload sessions, and writes chunk files.
pub struct ChunkStore {
    sessions: Arc<dyn SessionStore>,
    workspace: Arc<UploadWorkspace>,
    config: Arc<PipelineConfig>,
}

impl ChunkStore {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        workspace: Arc<UploadWorkspace>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            sessions,
            workspace,
            config,
        }
    }

    /// Save one chunk and return the upload's progress afterwards.
    ///
    /// Validation happens before any disk or session mutation; a rejected
    /// chunk leaves no trace. Re-delivery of an index overwrites the chunk
    /// file and re-records its checksum without double-counting bytes.
    #[instrument(skip(self, upload), fields(
        file_id = %upload.file_id,
        chunk_index = upload.chunk_index,
        size = upload.data.len(),
    ))]
    pub async fn save(&self, upload: ChunkUpload) -> PipelineResult<ProgressSnapshot> {
        let file_id = FileId::parse(&upload.file_id)?;
        let filename = sanitize_filename(&upload.filename)?;

        if upload.total_chunks == 0 {
            return Err(PipelineError::Validation(
                "total_chunks must be at least 1".to_string(),
            ));
        }
        if upload.chunk_index >= upload.total_chunks {
            return Err(PipelineError::Validation(format!(
                "chunk index {} out of range for {} chunks",
                upload.chunk_index, upload.total_chunks
            )));
        }
        if upload.total_size > self.config.max_file_size {
            return Err(PipelineError::Validation(format!(
                "declared size {} exceeds maximum {}",
                upload.total_size, self.config.max_file_size
            )));
        }
        if upload.data.len() as u64 > self.config.max_chunk_size {
            return Err(PipelineError::Validation(format!(
                "chunk size {} exceeds maximum {}",
                upload.data.len(),
                self.config.max_chunk_size
            )));
        }

        let checksum = ChunkChecksum::compute(&upload.data);
        let template = UploadSession::new(
            file_id.clone(),
            filename.clone(),
            upload.total_chunks,
            upload.total_size,
            upload.owner.clone(),
        );
        let session = self.sessions.get_or_create(template)?;

        // Reject inconsistent deliveries before touching disk so a bad
        // chunk leaves the session and workspace unchanged.
        check_against_session(&session, &upload, &filename)?;

        if let Err(e) = self
            .workspace
            .write_chunk(&file_id, upload.chunk_index, &upload.data)
            .await
        {
            tracing::error!(file_id = %file_id, error = %e, "chunk write failed");
            let _ = self.sessions.update(
                &file_id,
                Box::new(|session| {
                    session.fail();
                    Ok(())
                }),
            );
            return Err(e.into());
        }

        let index = upload.chunk_index;
        let len = upload.data.len() as u64;
        let updated = self.sessions.update(
            &file_id,
            Box::new(move |session| {
                // Re-checked under the lock: the snapshot check above can
                // race with another caller.
                check_against_session(session, &upload, &filename)?;
                session.record_chunk(index, checksum, len);
                Ok(())
            }),
        )?;

        tracing::debug!(
            file_id = %file_id,
            received = updated.received.len(),
            total = updated.total_chunks,
            status = %updated.status,
            "chunk recorded"
        );
        Ok(updated.progress())
    }
}

fn check_against_session(
    session: &UploadSession,
    upload: &ChunkUpload,
    filename: &str,
) -> coffer_core::Result<()> {
    if session.owner != upload.owner {
        return Err(coffer_core::Error::Ownership(format!(
            "upload {} belongs to another owner",
            session.file_id
        )));
    }
    if session.filename != filename
        || session.total_chunks != upload.total_chunks
        || session.total_size != upload.total_size
    {
        return Err(coffer_core::Error::Validation(format!(
            "declared shape for upload {} does not match the session",
            session.file_id
        )));
    }
    if session.status != UploadStatus::Uploading {
        return Err(coffer_core::Error::InvalidState {
            expected: UploadStatus::Uploading.as_str().to_string(),
            actual: session.status.as_str().to_string(),
        });
    }
    Ok(())
}
