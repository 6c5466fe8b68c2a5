//! Temp-upload workspace layout and chunk file I/O.

use crate::error::{StorageError, StorageResult};
use crate::fsops;
use bytes::Bytes;
use coffer_core::FileId;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

/// Maximum accepted filename length.
const MAX_FILENAME_LEN: usize = 255;

/// Reduce a caller-supplied filename to a safe single path component.
///
/// Directory parts are stripped (only the final component survives), and
/// names that could escape the workspace or confuse the layout are
/// rejected rather than repaired.
pub fn sanitize_filename(raw: &str) -> StorageResult<String> {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();

    if name.is_empty() {
        return Err(StorageError::InvalidFilename("empty filename".to_string()));
    }
    if name == "." || name == ".." {
        return Err(StorageError::InvalidFilename(format!(
            "unsafe filename: {raw}"
        )));
    }
    if name.len() > MAX_FILENAME_LEN {
        return Err(StorageError::InvalidFilename(format!(
            "filename length {} exceeds maximum {}",
            name.len(),
            MAX_FILENAME_LEN
        )));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(StorageError::InvalidFilename(
            "filename contains control characters".to_string(),
        ));
    }
    Ok(name)
}

/// The temp-upload workspace.
///
/// Tooling outside the core relies on this layout, so it is part of the
/// external contract:
/// - chunks: `<root>/<file_id>/chunk_<index>`
/// - assembled file: `<root>/complete_<file_id>_<filename>`
pub struct UploadWorkspace {
    root: PathBuf,
}

impl UploadWorkspace {
    /// Create a workspace, ensuring the root directory exists.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Workspace root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one upload's chunk files.
    pub fn chunk_dir(&self, file_id: &FileId) -> PathBuf {
        self.root.join(file_id.as_str())
    }

    /// Path of one chunk file.
    pub fn chunk_path(&self, file_id: &FileId, index: u32) -> PathBuf {
        self.chunk_dir(file_id).join(format!("chunk_{index}"))
    }

    /// Deterministic path of the assembled file.
    pub fn assembled_path(&self, file_id: &FileId, filename: &str) -> PathBuf {
        self.root.join(format!("complete_{file_id}_{filename}"))
    }

    /// Write one chunk file, overwriting any previous delivery of the same
    /// index (re-delivery is last-write-wins by contract).
    #[instrument(skip(self, data), fields(file_id = %file_id, size = data.len()))]
    pub async fn write_chunk(
        &self,
        file_id: &FileId,
        index: u32,
        data: &Bytes,
    ) -> StorageResult<()> {
        fs::create_dir_all(self.chunk_dir(file_id)).await?;
        let path = self.chunk_path(file_id, index);
        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Check whether a chunk file exists.
    pub async fn chunk_exists(&self, file_id: &FileId, index: u32) -> StorageResult<bool> {
        fs::try_exists(self.chunk_path(file_id, index))
            .await
            .map_err(StorageError::Io)
    }

    /// Delete one upload's chunk files and directory.
    ///
    /// Best-effort: a file that cannot be removed (a lock, a permission
    /// hiccup) is logged and skipped rather than failing the caller, since
    /// the durable output no longer depends on the chunks. Returns how many
    /// files were removed.
    #[instrument(skip(self), fields(file_id = %file_id))]
    pub async fn remove_chunks(&self, file_id: &FileId) -> usize {
        let dir = self.chunk_dir(file_id);
        let mut removed = 0;

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "failed to scan chunk directory");
                return 0;
            }
        };

        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => match fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        tracing::warn!(
                            path = %entry.path().display(),
                            error = %e,
                            "failed to remove chunk file, skipping"
                        );
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "chunk directory scan aborted");
                    break;
                }
            }
        }

        if let Err(e) = fs::remove_dir(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(dir = %dir.display(), error = %e, "chunk directory not removed");
            }
        }
        removed
    }

    /// Remove everything this upload left in the workspace: chunk files
    /// and, when the filename is known, the assembled file. Best-effort.
    #[instrument(skip(self), fields(file_id = %file_id))]
    pub async fn purge(&self, file_id: &FileId, filename: Option<&str>) {
        self.remove_chunks(file_id).await;
        if let Some(filename) = filename {
            let assembled = self.assembled_path(file_id, filename);
            match fsops::remove_file_if_exists(&assembled).await {
                Ok(true) => {
                    tracing::debug!(path = %assembled.display(), "removed assembled file");
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        path = %assembled.display(),
                        error = %e,
                        "failed to remove assembled file, skipping"
                    );
                }
            }
        }
    }
}
