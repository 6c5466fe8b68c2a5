//! Fault-injection wrappers for commit rollback tests.

use async_trait::async_trait;
use coffer_core::{Associations, NewRecord, RecordId, RecordRow};
use coffer_metadata::{MetadataError, MetadataResult, RecordStore, RecordTransaction};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;

/// Record store that fails on demand at specific commit phases.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct FlakyRecordStore {
    inner: Arc<dyn RecordStore>,
    pub fail_insert: AtomicBool,
    pub fail_associate: AtomicBool,
    pub fail_finalize: AtomicBool,
}

#[allow(dead_code)]
impl FlakyRecordStore {
    pub fn new(inner: Arc<dyn RecordStore>) -> Self {
        Self {
            inner,
            fail_insert: AtomicBool::new(false),
            fail_associate: AtomicBool::new(false),
            fail_finalize: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RecordStore for FlakyRecordStore {
    async fn begin(&self) -> MetadataResult<Box<dyn RecordTransaction>> {
        let inner = self.inner.begin().await?;
        Ok(Box::new(FlakyTransaction {
            inner,
            fail_insert: self.fail_insert.load(Ordering::SeqCst),
            fail_associate: self.fail_associate.load(Ordering::SeqCst),
        }))
    }

    async fn get(&self, id: RecordId) -> MetadataResult<Option<RecordRow>> {
        self.inner.get(id).await
    }

    async fn associations(&self, id: RecordId) -> MetadataResult<Associations> {
        self.inner.associations(id).await
    }

    async fn finalize(
        &self,
        id: RecordId,
        final_path: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool> {
        if self.fail_finalize.load(Ordering::SeqCst) {
            return Err(MetadataError::Internal(
                "injected finalize failure".to_string(),
            ));
        }
        self.inner.finalize(id, final_path, updated_at).await
    }

    async fn list_pending_finalize(&self) -> MetadataResult<Vec<RecordRow>> {
        self.inner.list_pending_finalize().await
    }

    async fn count(&self) -> MetadataResult<u64> {
        self.inner.count().await
    }
}

struct FlakyTransaction {
    inner: Box<dyn RecordTransaction>,
    fail_insert: bool,
    fail_associate: bool,
}

#[async_trait]
impl RecordTransaction for FlakyTransaction {
    async fn insert_record(&mut self, record: &NewRecord) -> MetadataResult<RecordId> {
        if self.fail_insert {
            return Err(MetadataError::Internal(
                "injected insert failure".to_string(),
            ));
        }
        self.inner.insert_record(record).await
    }

    async fn attach_associations(
        &mut self,
        id: RecordId,
        associations: &Associations,
    ) -> MetadataResult<()> {
        if self.fail_associate {
            return Err(MetadataError::Internal(
                "injected associate failure".to_string(),
            ));
        }
        self.inner.attach_associations(id, associations).await
    }

    async fn commit(self: Box<Self>) -> MetadataResult<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> MetadataResult<()> {
        self.inner.rollback().await
    }
}
