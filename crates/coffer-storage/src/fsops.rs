//! Filesystem move/remove primitives.

use crate::error::{StorageError, StorageResult};
use std::path::Path;
use tokio::fs;
use tracing::instrument;
use uuid::Uuid;

/// Move a file, preferring an atomic rename.
///
/// When rename fails (typically `EXDEV` across filesystem boundaries) the
/// fallback copies to a unique sibling of the target, syncs, renames into
/// place, and removes the source. Parent directories of the target are
/// created as needed.
#[instrument]
pub async fn move_file(from: &Path, to: &Path) -> StorageResult<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).await?;
    }

    let rename_err = match fs::rename(from, to).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    tracing::debug!(
        from = %from.display(),
        to = %to.display(),
        error = %rename_err,
        "rename failed, falling back to copy-then-delete"
    );

    // Copy to a unique temp name next to the target, then rename into place
    // so a crash mid-copy never leaves a partial file at the target path.
    let temp_name = format!(".tmp.{}", Uuid::new_v4());
    let temp_path = to.with_file_name(
        to.file_name()
            .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
            .unwrap_or_else(|| temp_name.clone()),
    );

    let copy_result = async {
        fs::copy(from, &temp_path).await?;
        let file = fs::File::open(&temp_path).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, to).await?;
        Ok::<_, std::io::Error>(())
    }
    .await;

    if let Err(copy_err) = copy_result {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StorageError::Io(copy_err));
    }

    if let Err(e) = fs::remove_file(from).await {
        tracing::warn!(
            path = %from.display(),
            error = %e,
            "failed to remove source after copy-then-delete move"
        );
    }

    Ok(())
}

/// Remove a file, treating "already gone" as success.
///
/// Returns true when a file was actually removed.
pub async fn remove_file_if_exists(path: &Path) -> StorageResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::Io(e)),
    }
}
