//! Persistence seams for the coffer ingestion pipeline.
//!
//! Two stores with different lifetimes back the pipeline:
//! - [`SessionStore`] holds in-flight upload sessions; the default
//!   [`MemorySessionStore`] keeps them in memory under one lock.
//! - [`RecordStore`] holds committed file records durably; the
//!   [`SqliteRecordStore`] backs it with SQLite and real transactions.

pub mod error;
pub mod records;
pub mod session;
pub mod sqlite;

pub use error::{MetadataError, MetadataResult};
pub use records::{RecordStore, RecordTransaction};
pub use session::{MemorySessionStore, SessionStore, SessionUpdate};
pub use sqlite::{SqliteRecordStore, SqliteTransaction};
