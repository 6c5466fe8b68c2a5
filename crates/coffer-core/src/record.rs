//! Persisted record types and commit metadata.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for a persisted record.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Generate a new random record ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::Validation(format!("invalid record ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Finalize state of a persisted record.
///
/// A record is inserted in `Pending` while its file still sits at the
/// staging path. The finalize phase flips it to `Finalized` together with
/// the path update; records stuck in `Pending` are picked up by the
/// reconciliation pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalizeState {
    Pending,
    Finalized,
}

impl FinalizeState {
    /// State name as stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Finalized => "finalized",
        }
    }

    /// Parse from the stored name.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "finalized" => Ok(Self::Finalized),
            other => Err(crate::Error::Validation(format!(
                "unknown finalize state: {other}"
            ))),
        }
    }
}

impl fmt::Display for FinalizeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A new record to insert at commit time.
#[derive(Clone, Debug)]
pub struct NewRecord {
    /// Owning module name ("documents", "archive", ...).
    pub module: String,
    /// Display title; defaults to the filename when absent.
    pub title: Option<String>,
    /// Original (sanitized) filename.
    pub file_name: String,
    /// Path relative to the storage root. At insert time this is the
    /// staging path; finalize rewrites it to the final path.
    pub storage_path: String,
    /// Byte size of the file on disk.
    pub file_size: u64,
    /// SHA-256 of the file contents, hex-encoded.
    pub content_hash: String,
    /// Declared content type, if any.
    pub content_type: Option<String>,
    /// Identity of the uploader.
    pub owner: String,
    /// Timestamp used for both created_at and the path scheme, so the
    /// final path stays reproducible from the stored record.
    pub created_at: OffsetDateTime,
}

/// A persisted record row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordRow {
    pub id: RecordId,
    pub module: String,
    pub title: Option<String>,
    pub file_name: String,
    pub storage_path: String,
    pub file_size: u64,
    pub content_hash: String,
    pub content_type: Option<String>,
    pub owner: String,
    pub finalize_state: FinalizeState,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A link from a record to a parent entity in another module.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    /// Module of the parent entity.
    pub module: String,
    /// Identifier of the parent entity.
    pub id: String,
}

/// Cross-entity associations attached at commit time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Associations {
    /// Tags to attach.
    pub tags: Vec<String>,
    /// Optional parent-entity reference.
    pub parent: Option<ParentLink>,
}

impl Associations {
    /// Check whether there is anything to attach.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.parent.is_none()
    }
}

/// Caller-supplied metadata for a commit.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CommitMetadata {
    /// Display title for the record.
    #[serde(default)]
    pub title: Option<String>,
    /// Declared content type.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Tags to associate.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Parent entity to link.
    #[serde(default)]
    pub parent: Option<ParentLink>,
    /// Free-form extra metadata passed through from the transport layer.
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
