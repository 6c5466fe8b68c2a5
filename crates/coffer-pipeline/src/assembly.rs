//! Streaming reassembly of completed uploads.

use crate::error::{PipelineError, PipelineResult};
use coffer_core::{
    ChunkChecksum, ContentHash, FileId, PipelineConfig, UploadSession, UploadStatus,
};
use coffer_metadata::SessionStore;
use coffer_storage::UploadWorkspace;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tracing::instrument;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Concatenates a session's chunks into the assembled file, verifying
/// integrity as it streams.
pub struct AssemblyEngine {
    sessions: Arc<dyn SessionStore>,
    workspace: Arc<UploadWorkspace>,
    config: Arc<PipelineConfig>,
    permits: Arc<Semaphore>,
}

impl AssemblyEngine {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        workspace: Arc<UploadWorkspace>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_assemblies));
        Self {
            sessions,
            workspace,
            config,
            permits,
        }
    }

    /// Assemble a completed upload and return the assembled file's path.
    ///
    /// Requires the session to be in `Assembling` status. Chunks are
    /// streamed in index order through a fixed buffer; each one is checked
    /// against its recorded CRC32 and fed into the whole-file SHA-256. On
    /// success the session moves to `Completed` with its content hash set
    /// and the chunk files are removed. On failure the partial output is
    /// removed and the session moves to `Error`.
    #[instrument(skip(self), fields(file_id = %file_id))]
    pub async fn assemble(&self, file_id: &FileId) -> PipelineResult<PathBuf> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| PipelineError::Internal("assembly semaphore closed".to_string()))?;

        let session = self
            .sessions
            .get(file_id)?
            .ok_or_else(|| PipelineError::NotFound(format!("upload session {file_id}")))?;

        if session.status != UploadStatus::Assembling {
            return Err(PipelineError::InvalidState {
                expected: UploadStatus::Assembling.as_str().to_string(),
                actual: session.status.as_str().to_string(),
            });
        }
        // Declared size was validated at intake, but re-check before
        // writing: the ceiling may have been lowered since.
        if session.total_size > self.config.max_file_size {
            return Err(PipelineError::Validation(format!(
                "declared size {} exceeds maximum {}",
                session.total_size, self.config.max_file_size
            )));
        }

        let out_path = self.workspace.assembled_path(file_id, &session.filename);
        match self.stream_chunks(&session, &out_path).await {
            Ok(content_hash) => {
                self.sessions.update(
                    file_id,
                    Box::new(move |session| {
                        session.advance(UploadStatus::Completed)?;
                        session.content_hash = Some(content_hash);
                        Ok(())
                    }),
                )?;
                let removed = self.workspace.remove_chunks(file_id).await;
                tracing::info!(
                    file_id = %file_id,
                    path = %out_path.display(),
                    content_hash = %content_hash,
                    chunks_removed = removed,
                    "assembly complete"
                );
                Ok(out_path)
            }
            Err(e) => {
                tracing::error!(file_id = %file_id, error = %e, "assembly failed");
                if let Err(cleanup_err) = fs::remove_file(&out_path).await {
                    if cleanup_err.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(
                            path = %out_path.display(),
                            error = %cleanup_err,
                            "failed to remove partial assembled file"
                        );
                    }
                }
                let _ = self.sessions.update(
                    file_id,
                    Box::new(|session| {
                        session.fail();
                        Ok(())
                    }),
                );
                Err(e)
            }
        }
    }

    async fn stream_chunks(
        &self,
        session: &UploadSession,
        out_path: &std::path::Path,
    ) -> PipelineResult<ContentHash> {
        let mut out = fs::File::create(out_path).await?;
        let mut content_hasher = ContentHash::hasher();
        let mut written: u64 = 0;
        let mut buf = vec![0u8; COPY_BUF_SIZE];

        for index in 0..session.total_chunks {
            let expected = session.checksums.get(&index).copied().ok_or_else(|| {
                PipelineError::Internal(format!(
                    "session {} is assembling but chunk {index} has no checksum",
                    session.file_id
                ))
            })?;

            let chunk_path = self.workspace.chunk_path(&session.file_id, index);
            // A recorded chunk can be gone if a cleanup raced the assembly.
            let mut chunk = fs::File::open(&chunk_path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PipelineError::NotFound(format!(
                        "chunk {index} of upload {}",
                        session.file_id
                    ))
                } else {
                    PipelineError::Io(e)
                }
            })?;
            let mut chunk_hasher = ChunkChecksum::hasher();
            loop {
                let n = chunk.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                chunk_hasher.update(&buf[..n]);
                content_hasher.update(&buf[..n]);
                out.write_all(&buf[..n]).await?;
                written += n as u64;
            }

            let actual = chunk_hasher.finalize();
            if actual != expected {
                return Err(PipelineError::Integrity {
                    expected: expected.to_hex(),
                    actual: actual.to_hex(),
                });
            }
        }

        if written != session.total_size {
            return Err(PipelineError::Integrity {
                expected: format!("{} bytes", session.total_size),
                actual: format!("{written} bytes"),
            });
        }

        out.sync_all().await?;
        Ok(content_hasher.finalize())
    }
}
