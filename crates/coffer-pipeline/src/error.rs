//! Pipeline error taxonomy.
//!
//! Lower-layer errors converge here so callers see one classification:
//! what was rejected up front (`Validation`, `Ownership`, `InvalidState`),
//! what failed integrity checks (`Integrity`), what does not exist
//! (`NotFound`), and what broke underneath (`Io`, `Metadata`, `Internal`).

use coffer_metadata::MetadataError;
use coffer_storage::StorageError;
use thiserror::Error;

/// Pipeline operation errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("integrity failure: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("ownership error: {0}")]
    Ownership(String),

    #[error("invalid state: expected {expected}, found {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

impl From<coffer_core::Error> for PipelineError {
    fn from(err: coffer_core::Error) -> Self {
        use coffer_core::Error;
        match err {
            Error::InvalidFileId(_)
            | Error::InvalidFilename(_)
            | Error::Validation(_)
            | Error::InvalidHash(_) => Self::Validation(err.to_string()),
            Error::ChecksumMismatch { expected, actual } => Self::Integrity { expected, actual },
            Error::InvalidStatusTransition { from, to } => Self::InvalidState {
                expected: to,
                actual: from,
            },
            Error::InvalidState { expected, actual } => Self::InvalidState { expected, actual },
            Error::Ownership(msg) => Self::Ownership(msg),
        }
    }
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => Self::NotFound(what),
            StorageError::Io(e) => Self::Io(e),
            StorageError::InvalidFilename(msg) => Self::Validation(format!("invalid filename: {msg}")),
        }
    }
}

impl From<MetadataError> for PipelineError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(what) => Self::NotFound(what),
            MetadataError::Domain(e) => e.into(),
            MetadataError::Io(e) => Self::Io(e),
            MetadataError::Internal(msg) => Self::Internal(msg),
            MetadataError::AlreadyExists(_) | MetadataError::Database(_) => {
                Self::Metadata(err.to_string())
            }
        }
    }
}
