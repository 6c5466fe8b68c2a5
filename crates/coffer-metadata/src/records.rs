//! Record store trait seams.

use crate::error::MetadataResult;
use async_trait::async_trait;
use coffer_core::{Associations, NewRecord, RecordId, RecordRow};
use time::OffsetDateTime;

/// Store for committed file records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Open a transaction covering record insert and association attach.
    async fn begin(&self) -> MetadataResult<Box<dyn RecordTransaction>>;

    /// Get a record by id.
    async fn get(&self, id: RecordId) -> MetadataResult<Option<RecordRow>>;

    /// Get the associations attached to a record.
    async fn associations(&self, id: RecordId) -> MetadataResult<Associations>;

    /// Flip a pending record to finalized, rewriting its storage path.
    ///
    /// Returns true when the flip happened, false when the record was
    /// already finalized (re-running finalize is idempotent). Unknown id
    /// is `NotFound`.
    async fn finalize(
        &self,
        id: RecordId,
        final_path: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Records still in the pending finalize state, oldest first.
    async fn list_pending_finalize(&self) -> MetadataResult<Vec<RecordRow>>;

    /// Total number of records.
    async fn count(&self) -> MetadataResult<u64>;
}

/// One open record transaction.
///
/// Dropping a transaction without calling [`commit`](Self::commit) rolls it
/// back; [`rollback`](Self::rollback) does so explicitly.
#[async_trait]
pub trait RecordTransaction: Send {
    /// Insert a new record in the pending finalize state. Returns its id.
    async fn insert_record(&mut self, record: &NewRecord) -> MetadataResult<RecordId>;

    /// Attach tags and the optional parent link to a record.
    async fn attach_associations(
        &mut self,
        id: RecordId,
        associations: &Associations,
    ) -> MetadataResult<()>;

    /// Commit the transaction.
    async fn commit(self: Box<Self>) -> MetadataResult<()>;

    /// Roll the transaction back.
    async fn rollback(self: Box<Self>) -> MetadataResult<()>;
}
