//! Background reaping of idle upload sessions.

use coffer_core::PipelineConfig;
use coffer_metadata::SessionStore;
use coffer_storage::UploadWorkspace;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::instrument;

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper to stop and wait for it to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.task.await;
    }
}

/// Spawn the periodic sweeper.
pub fn spawn(
    sessions: Arc<dyn SessionStore>,
    workspace: Arc<UploadWorkspace>,
    config: Arc<PipelineConfig>,
) -> SweeperHandle {
    let shutdown = Arc::new(Notify::new());
    let notify = shutdown.clone();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.sweep_interval());
        // The first tick fires immediately; skip it so a fresh pipeline
        // does not sweep at startup.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep_once(sessions.as_ref(), &workspace, &config).await;
                }
                _ = notify.notified() => {
                    tracing::debug!("sweeper shutting down");
                    break;
                }
            }
        }
    });

    SweeperHandle { shutdown, task }
}

/// Run one sweep pass: reap sessions idle past the timeout, deleting
/// their temp files. Returns how many sessions were reaped.
#[instrument(skip_all)]
pub async fn sweep_once(
    sessions: &dyn SessionStore,
    workspace: &UploadWorkspace,
    config: &PipelineConfig,
) -> usize {
    let now = OffsetDateTime::now_utc();
    let idle = match sessions.idle_sessions(now, config.session_idle_timeout()) {
        Ok(idle) => idle,
        Err(e) => {
            tracing::error!(error = %e, "sweep failed to scan sessions");
            return 0;
        }
    };

    let mut reaped = 0;
    for session in idle {
        // A claimed session is mid-commit; the commit's own cleanup will
        // remove it.
        if session.commit_started_at.is_some() {
            continue;
        }
        workspace
            .purge(&session.file_id, Some(&session.filename))
            .await;
        match sessions.remove(&session.file_id) {
            Ok(true) => {
                tracing::info!(
                    file_id = %session.file_id,
                    status = %session.status,
                    "idle session reaped"
                );
                reaped += 1;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(file_id = %session.file_id, error = %e, "failed to remove idle session");
            }
        }
    }
    reaped
}
