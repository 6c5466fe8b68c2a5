//! Multi-phase commit of a completed upload.
//!
//! The phases, in order: locate and claim the session, plan paths through
//! the module binding, stage the assembled file, insert the record and its
//! associations in one transaction, commit (point of no return), finalize
//! placement, fire side effects, clean up. Failures before the transaction
//! commit undo everything; a failure during finalize leaves a valid record
//! at the staging path in the pending state, to be recovered by
//! [`CommitOrchestrator::finalize_pending`].

use crate::artifacts::{ArtifactInput, DerivedArtifacts};
use crate::error::{PipelineError, PipelineResult};
use crate::registry::ModuleRegistry;
use coffer_core::{CommitMetadata, FileId, NewRecord, PipelineConfig, RecordId, UploadStatus};
use coffer_metadata::{RecordStore, SessionStore};
use coffer_storage::{fsops, UploadWorkspace};
use std::path::Path;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::fs;
use tracing::instrument;

/// Outcome of a successful commit.
#[derive(Clone, Debug)]
pub struct CommitReceipt {
    pub record_id: RecordId,
    /// Path relative to the storage root: the final path when `finalized`,
    /// otherwise the staging path the record still references.
    pub storage_path: String,
    pub file_size: u64,
    /// SHA-256 of the committed file, hex-encoded.
    pub content_hash: String,
    /// False when the finalize phase failed and the record was left
    /// pending. The commit itself is durable either way.
    pub finalized: bool,
}

/// Runs the commit phases and their compensation.
pub struct CommitOrchestrator {
    sessions: Arc<dyn SessionStore>,
    records: Arc<dyn RecordStore>,
    workspace: Arc<UploadWorkspace>,
    registry: Arc<ModuleRegistry>,
    artifacts: Arc<dyn DerivedArtifacts>,
    config: Arc<PipelineConfig>,
}

impl CommitOrchestrator {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        records: Arc<dyn RecordStore>,
        workspace: Arc<UploadWorkspace>,
        registry: Arc<ModuleRegistry>,
        artifacts: Arc<dyn DerivedArtifacts>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            sessions,
            records,
            workspace,
            registry,
            artifacts,
            config,
        }
    }

    /// Commit a completed upload into a module.
    #[instrument(skip(self, metadata), fields(file_id = %file_id))]
    pub async fn commit(
        &self,
        module: &str,
        file_id: &FileId,
        caller: &str,
        metadata: &CommitMetadata,
    ) -> PipelineResult<CommitReceipt> {
        // Resolve the binding before claiming anything: an unknown module
        // must leave no trace.
        let binding = self
            .registry
            .resolve(module)
            .ok_or_else(|| PipelineError::NotFound(format!("module {module}")))?
            .clone();

        // Locate and claim. The closure runs under the session lock, so a
        // second concurrent commit observes the claim and fails here.
        let now = OffsetDateTime::now_utc();
        let caller_owned = caller.to_string();
        let session = self.sessions.update(
            file_id,
            Box::new(move |session| {
                if session.owner != caller_owned {
                    return Err(coffer_core::Error::Ownership(format!(
                        "upload {} belongs to another owner",
                        session.file_id
                    )));
                }
                if session.status != UploadStatus::Completed {
                    return Err(coffer_core::Error::InvalidState {
                        expected: UploadStatus::Completed.as_str().to_string(),
                        actual: session.status.as_str().to_string(),
                    });
                }
                if session.commit_started_at.is_some() {
                    return Err(coffer_core::Error::InvalidState {
                        expected: "no commit in progress".to_string(),
                        actual: "commit in progress".to_string(),
                    });
                }
                session.commit_started_at = Some(now);
                Ok(())
            }),
        )?;

        let content_hash = match session.content_hash {
            Some(hash) => hash,
            None => {
                self.release_claim(file_id);
                return Err(PipelineError::Internal(format!(
                    "session {file_id} is completed but has no content hash"
                )));
            }
        };

        let assembled_abs = self.workspace.assembled_path(file_id, &session.filename);
        let file_size = match fs::metadata(&assembled_abs).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                self.release_claim(file_id);
                return Err(if e.kind() == std::io::ErrorKind::NotFound {
                    PipelineError::NotFound(format!("assembled file for upload {file_id}"))
                } else {
                    e.into()
                });
            }
        };

        let paths = binding.plan_paths(file_id, &session.filename, now);
        let staging_abs = self.config.storage_root.join(&paths.staging);
        let final_abs = self.config.storage_root.join(&paths.final_path);

        // Stage the assembled file under the module subtree.
        if let Err(e) = fsops::move_file(&assembled_abs, &staging_abs).await {
            self.roll_back(file_id, &session.filename, None).await;
            return Err(e.into());
        }

        // Record and associations in one transaction.
        let new_record = NewRecord {
            module: module.to_string(),
            title: metadata.title.clone().or_else(|| Some(session.filename.clone())),
            file_name: session.filename.clone(),
            storage_path: paths.staging.clone(),
            file_size,
            content_hash: content_hash.to_hex(),
            content_type: metadata.content_type.clone(),
            owner: session.owner.clone(),
            created_at: now,
        };
        let associations = binding.associations(metadata);

        let mut tx = match self.records.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                self.roll_back(file_id, &session.filename, Some(&staging_abs))
                    .await;
                return Err(e.into());
            }
        };
        let record_id = match tx.insert_record(&new_record).await {
            Ok(id) => id,
            Err(e) => {
                let _ = tx.rollback().await;
                self.roll_back(file_id, &session.filename, Some(&staging_abs))
                    .await;
                return Err(e.into());
            }
        };
        if let Err(e) = tx.attach_associations(record_id, &associations).await {
            let _ = tx.rollback().await;
            self.roll_back(file_id, &session.filename, Some(&staging_abs))
                .await;
            return Err(e.into());
        }

        // Point of no return.
        if let Err(e) = tx.commit().await {
            self.roll_back(file_id, &session.filename, Some(&staging_abs))
                .await;
            return Err(e.into());
        }

        // Finalize placement. A failure here is tolerated: the record is
        // durable and its staging path is valid.
        let finalized = match self
            .finalize_record(record_id, &staging_abs, &final_abs, &paths.final_path)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    record_id = %record_id,
                    file_id = %file_id,
                    error = %e,
                    "finalize failed; record left pending at staging path"
                );
                false
            }
        };
        let storage_path = if finalized {
            paths.final_path.clone()
        } else {
            paths.staging.clone()
        };

        // Side effects, fire-and-forget.
        let artifacts = self.artifacts.clone();
        let input = ArtifactInput {
            record_id,
            module: module.to_string(),
            storage_path: storage_path.clone(),
            file_name: session.filename.clone(),
            content_type: metadata.content_type.clone(),
            content_hash: content_hash.to_hex(),
            file_size,
        };
        tokio::spawn(async move {
            if let Err(e) = artifacts.generate(input).await {
                tracing::warn!(
                    record_id = %record_id,
                    error = %e,
                    "derived artifact generation failed"
                );
            }
        });

        // Session and workspace cleanup, best-effort.
        let _ = self.sessions.remove(file_id);
        self.workspace.purge(file_id, Some(&session.filename)).await;

        tracing::info!(
            record_id = %record_id,
            module,
            file_id = %file_id,
            file_size,
            finalized,
            "commit complete"
        );
        Ok(CommitReceipt {
            record_id,
            storage_path,
            file_size,
            content_hash: content_hash.to_hex(),
            finalized,
        })
    }

    /// Re-run the finalize phase for records stuck in the pending state.
    ///
    /// Returns how many records were finalized. Records whose module is no
    /// longer registered or whose file cannot be found are logged and
    /// skipped.
    #[instrument(skip(self))]
    pub async fn finalize_pending(&self) -> PipelineResult<usize> {
        let pending = self.records.list_pending_finalize().await?;
        let mut recovered = 0;

        for record in pending {
            let Some(binding) = self.registry.resolve(&record.module) else {
                tracing::warn!(
                    record_id = %record.id,
                    module = %record.module,
                    "pending record references an unregistered module, skipping"
                );
                continue;
            };

            let staged_name = record
                .storage_path
                .rsplit('/')
                .next()
                .unwrap_or(&record.storage_path);
            let final_rel = binding.final_path_for(staged_name, record.created_at);
            let staging_abs = self.config.storage_root.join(&record.storage_path);
            let final_abs = self.config.storage_root.join(&final_rel);

            let result = if fs::try_exists(&staging_abs).await.unwrap_or(false) {
                self.finalize_record(record.id, &staging_abs, &final_abs, &final_rel)
                    .await
            } else if fs::try_exists(&final_abs).await.unwrap_or(false) {
                // The move already happened; only the state flip was lost.
                self.records
                    .finalize(record.id, &final_rel, OffsetDateTime::now_utc())
                    .await
                    .map(|_| ())
                    .map_err(Into::into)
            } else {
                Err(PipelineError::NotFound(format!(
                    "no file on disk for pending record {}",
                    record.id
                )))
            };

            match result {
                Ok(()) => {
                    tracing::info!(record_id = %record.id, path = final_rel, "pending record finalized");
                    recovered += 1;
                }
                Err(e) => {
                    tracing::warn!(record_id = %record.id, error = %e, "pending record not finalized");
                }
            }
        }
        Ok(recovered)
    }

    async fn finalize_record(
        &self,
        record_id: RecordId,
        staging_abs: &Path,
        final_abs: &Path,
        final_rel: &str,
    ) -> PipelineResult<()> {
        fsops::move_file(staging_abs, final_abs).await?;
        if let Err(e) = self
            .records
            .finalize(record_id, final_rel, OffsetDateTime::now_utc())
            .await
        {
            // Keep the stored path valid: the record still says staging.
            if let Err(back_err) = fsops::move_file(final_abs, staging_abs).await {
                tracing::error!(
                    record_id = %record_id,
                    error = %back_err,
                    "failed to move file back to staging after finalize state update failed"
                );
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn release_claim(&self, file_id: &FileId) {
        let _ = self.sessions.update(
            file_id,
            Box::new(|session| {
                session.commit_started_at = None;
                Ok(())
            }),
        );
    }

    /// Compensation for failures between staging and the transaction
    /// commit: remove the staged and assembled files, fail the session,
    /// and release its claim so the sweeper can still reap it.
    async fn roll_back(&self, file_id: &FileId, filename: &str, staged: Option<&Path>) {
        if let Some(staged) = staged {
            if let Err(e) = fsops::remove_file_if_exists(staged).await {
                tracing::warn!(path = %staged.display(), error = %e, "failed to remove staged file");
            }
        }
        self.workspace.purge(file_id, Some(filename)).await;
        let _ = self.sessions.update(
            file_id,
            Box::new(|session| {
                session.fail();
                session.commit_started_at = None;
                Ok(())
            }),
        );
        tracing::warn!(file_id = %file_id, "commit rolled back");
    }
}
