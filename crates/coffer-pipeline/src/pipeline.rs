//! Pipeline facade tying the components together.

use crate::artifacts::{DerivedArtifacts, NoArtifacts};
use crate::assembly::AssemblyEngine;
use crate::chunks::{ChunkStore, ChunkUpload};
use crate::commit::{CommitOrchestrator, CommitReceipt};
use crate::error::{PipelineError, PipelineResult};
use crate::registry::ModuleRegistry;
use crate::sweeper::{self, SweeperHandle};
use coffer_core::{CommitMetadata, FileId, PipelineConfig, ProgressSnapshot, UploadStatus};
use coffer_metadata::{MemorySessionStore, RecordStore, SessionStore};
use coffer_storage::UploadWorkspace;
use std::sync::Arc;

/// The ingestion pipeline.
///
/// One instance owns the session store, the temp-upload workspace, and the
/// component wiring; callers interact only with this surface.
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    sessions: Arc<dyn SessionStore>,
    workspace: Arc<UploadWorkspace>,
    chunks: ChunkStore,
    assembly: AssemblyEngine,
    orchestrator: CommitOrchestrator,
}

impl Pipeline {
    /// Build a pipeline with the default parts: in-memory sessions, the
    /// built-in module registry, no derived artifacts.
    pub async fn new(
        config: PipelineConfig,
        records: Arc<dyn RecordStore>,
    ) -> PipelineResult<Self> {
        Self::with_parts(
            config,
            Arc::new(MemorySessionStore::new()),
            records,
            ModuleRegistry::with_defaults(),
            Arc::new(NoArtifacts),
        )
        .await
    }

    /// Build a pipeline from explicit parts.
    pub async fn with_parts(
        config: PipelineConfig,
        sessions: Arc<dyn SessionStore>,
        records: Arc<dyn RecordStore>,
        registry: ModuleRegistry,
        artifacts: Arc<dyn DerivedArtifacts>,
    ) -> PipelineResult<Self> {
        let config = Arc::new(config);
        let workspace = Arc::new(UploadWorkspace::new(&config.temp_dir).await?);
        let registry = Arc::new(registry);

        let chunks = ChunkStore::new(sessions.clone(), workspace.clone(), config.clone());
        let assembly = AssemblyEngine::new(sessions.clone(), workspace.clone(), config.clone());
        let orchestrator = CommitOrchestrator::new(
            sessions.clone(),
            records,
            workspace.clone(),
            registry,
            artifacts,
            config.clone(),
        );

        Ok(Self {
            config,
            sessions,
            workspace,
            chunks,
            assembly,
            orchestrator,
        })
    }

    /// Save one chunk. When it completes the received set, the upload is
    /// assembled before returning, so the snapshot reflects `Completed`
    /// (or the call errors and the session is `Error`).
    pub async fn save_chunk(&self, upload: ChunkUpload) -> PipelineResult<ProgressSnapshot> {
        let file_id = FileId::parse(&upload.file_id)?;
        let snapshot = self.chunks.save(upload).await?;
        if snapshot.status != UploadStatus::Assembling {
            return Ok(snapshot);
        }

        self.assembly.assemble(&file_id).await?;
        let session = self.sessions.get(&file_id)?.ok_or_else(|| {
            PipelineError::Internal(format!("session {file_id} vanished during assembly"))
        })?;
        Ok(session.progress())
    }

    /// Current progress of an upload, or None for an unknown id.
    pub fn get_status(&self, file_id: &str) -> PipelineResult<Option<ProgressSnapshot>> {
        let Ok(file_id) = FileId::parse(file_id) else {
            // An id that can never name a session is simply unknown.
            return Ok(None);
        };
        Ok(self.sessions.get(&file_id)?.map(|s| s.progress()))
    }

    /// Discard an upload: session removed, temp files deleted. A no-op
    /// for unknown ids, so re-running cleanup is always safe.
    pub async fn cleanup(&self, file_id: &str) -> PipelineResult<()> {
        let Ok(file_id) = FileId::parse(file_id) else {
            return Ok(());
        };
        let filename = self.sessions.get(&file_id)?.map(|s| s.filename);
        self.workspace.purge(&file_id, filename.as_deref()).await;
        self.sessions.remove(&file_id)?;
        Ok(())
    }

    /// Commit a completed upload into a module.
    pub async fn commit(
        &self,
        module: &str,
        file_id: &str,
        caller: &str,
        metadata: &CommitMetadata,
    ) -> PipelineResult<CommitReceipt> {
        let file_id = FileId::parse(file_id)?;
        self.orchestrator
            .commit(module, &file_id, caller, metadata)
            .await
    }

    /// Recover records whose finalize phase failed.
    pub async fn finalize_pending(&self) -> PipelineResult<usize> {
        self.orchestrator.finalize_pending().await
    }

    /// Start the background sweeper for this pipeline.
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        sweeper::spawn(
            self.sessions.clone(),
            self.workspace.clone(),
            self.config.clone(),
        )
    }

    /// Run one sweep pass immediately. Returns how many sessions were
    /// reaped.
    pub async fn sweep_once(&self) -> usize {
        sweeper::sweep_once(self.sessions.as_ref(), &self.workspace, &self.config).await
    }

    /// The pipeline's configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}
