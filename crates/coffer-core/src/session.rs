//! Upload session types and lifecycle.

use crate::hash::{ChunkChecksum, ContentHash};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use time::OffsetDateTime;

/// Maximum accepted length for a file id.
const MAX_FILE_ID_LEN: usize = 128;

/// Opaque correlation key for one upload.
///
/// The id names a directory under the temp-upload root, so it is restricted
/// to a filesystem-safe charset at parse time.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(String);

impl FileId {
    /// Parse and validate a file id.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() {
            return Err(crate::Error::InvalidFileId("empty".to_string()));
        }
        if s.len() > MAX_FILE_ID_LEN {
            return Err(crate::Error::InvalidFileId(format!(
                "length {} exceeds maximum {}",
                s.len(),
                MAX_FILE_ID_LEN
            )));
        }
        if s.starts_with('.') {
            return Err(crate::Error::InvalidFileId(format!(
                "must not start with '.': {s}"
            )));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(crate::Error::InvalidFileId(format!(
                "contains unsafe characters: {s}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upload session status.
///
/// Advances strictly forward: `Uploading -> Assembling -> {Completed, Error}`.
/// `Error` may also be entered directly from `Uploading` on a failed chunk
/// write. No transition ever moves backwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Chunks are still arriving.
    Uploading,
    /// All chunks received, assembly pending or in progress.
    Assembling,
    /// Assembly finished and verified; ready to commit.
    Completed,
    /// The upload failed and cannot proceed.
    Error,
}

impl UploadStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Uploading => 0,
            Self::Assembling => 1,
            Self::Completed => 2,
            Self::Error => 2,
        }
    }

    /// Check whether the session reached a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Check whether advancing to `next` is a legal forward transition.
    pub fn can_advance_to(self, next: UploadStatus) -> bool {
        next.rank() > self.rank()
    }

    /// Status name as used in snapshots and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Assembling => "assembling",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-upload session state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadSession {
    /// Correlation key for this upload.
    pub file_id: FileId,
    /// Declared filename (already sanitized).
    pub filename: String,
    /// Declared number of chunks.
    pub total_chunks: u32,
    /// Declared total byte size of the assembled file.
    pub total_size: u64,
    /// Identity of the uploader.
    pub owner: String,
    /// Indices of chunks received so far. A set, not a counter, so
    /// re-delivery of an already-seen index is idempotent.
    pub received: BTreeSet<u32>,
    /// Checksum recorded for each received chunk index.
    pub checksums: BTreeMap<u32, ChunkChecksum>,
    /// Bytes received so far (each index counted once).
    pub bytes_received: u64,
    /// Current status.
    pub status: UploadStatus,
    /// Whole-file hash, filled in at assembly completion.
    pub content_hash: Option<ContentHash>,
    /// Set when a commit claims this session, guarding against a second
    /// concurrent commit of the same upload.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub commit_started_at: Option<OffsetDateTime>,
    /// When the session was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the session was last updated.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UploadSession {
    /// Create a new session in `Uploading` status.
    pub fn new(
        file_id: FileId,
        filename: String,
        total_chunks: u32,
        total_size: u64,
        owner: String,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            file_id,
            filename,
            total_chunks,
            total_size,
            owner,
            received: BTreeSet::new(),
            checksums: BTreeMap::new(),
            bytes_received: 0,
            status: UploadStatus::Uploading,
            content_hash: None,
            commit_started_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check whether every declared chunk has been received.
    pub fn is_complete(&self) -> bool {
        self.received.len() as u64 == u64::from(self.total_chunks)
    }

    /// Record a chunk arrival. Returns true when the index is new.
    ///
    /// A repeated index replaces the stored checksum (last write wins) but
    /// does not double-count bytes. When the received set reaches the
    /// declared total, the status flips to `Assembling`.
    pub fn record_chunk(&mut self, index: u32, checksum: ChunkChecksum, len: u64) -> bool {
        let newly_received = self.received.insert(index);
        if newly_received {
            self.bytes_received += len;
        }
        self.checksums.insert(index, checksum);
        if self.is_complete() && self.status == UploadStatus::Uploading {
            self.status = UploadStatus::Assembling;
        }
        self.touch();
        newly_received
    }

    /// Advance the status, enforcing the forward-only invariant.
    pub fn advance(&mut self, next: UploadStatus) -> crate::Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(crate::Error::InvalidStatusTransition {
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Force the session into `Error` status. Used on failure paths where
    /// a transition error would mask the original failure; a session already
    /// terminal stays as it is.
    pub fn fail(&mut self) {
        if !self.status.is_terminal() {
            self.status = UploadStatus::Error;
            self.touch();
        }
    }

    /// Idle age relative to `now`.
    pub fn idle_age(&self, now: OffsetDateTime) -> time::Duration {
        now - self.updated_at
    }

    /// Build a progress snapshot from the current state.
    pub fn progress(&self) -> ProgressSnapshot {
        let progress_percent = if self.total_size == 0 {
            if self.is_complete() {
                100.0
            } else {
                0.0
            }
        } else {
            (self.bytes_received as f64 / self.total_size as f64 * 100.0).min(100.0)
        };
        ProgressSnapshot {
            bytes_uploaded: self.bytes_received,
            total_size: self.total_size,
            status: self.status,
            progress_percent,
        }
    }

    fn touch(&mut self) {
        self.updated_at = OffsetDateTime::now_utc();
    }
}

/// Snapshot of upload progress returned to callers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Bytes received so far.
    pub bytes_uploaded: u64,
    /// Declared total size.
    pub total_size: u64,
    /// Current session status.
    pub status: UploadStatus,
    /// Percentage of declared bytes received (0..=100).
    pub progress_percent: f64,
}
