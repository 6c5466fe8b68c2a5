//! In-flight upload session store.

use crate::error::{MetadataError, MetadataResult};
use coffer_core::{FileId, UploadSession};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use time::OffsetDateTime;

/// A single mutation applied to one session while the store's lock is held.
pub type SessionUpdate<'a> =
    Box<dyn FnOnce(&mut UploadSession) -> coffer_core::Result<()> + Send + 'a>;

/// Store for in-flight upload sessions.
///
/// Every mutation goes through [`SessionStore::update`], which runs the
/// closure while the store holds its lock: check-then-act sequences on one
/// session (owner check, status transition, commit claim) are atomic with
/// respect to other callers.
pub trait SessionStore: Send + Sync {
    /// Get a copy of a session.
    fn get(&self, file_id: &FileId) -> MetadataResult<Option<UploadSession>>;

    /// Get the stored session, inserting `template` when absent. Returns a
    /// copy of whichever session is now in the store.
    fn get_or_create(&self, template: UploadSession) -> MetadataResult<UploadSession>;

    /// Atomically mutate a session and return the updated copy.
    ///
    /// The closure either succeeds (the mutation is stored) or errors (the
    /// stored session is left untouched). Unknown id is `NotFound`.
    fn update(&self, file_id: &FileId, mutate: SessionUpdate<'_>)
        -> MetadataResult<UploadSession>;

    /// Remove a session. Returns true when one was present.
    fn remove(&self, file_id: &FileId) -> MetadataResult<bool>;

    /// Sessions idle for longer than `max_idle` relative to `now`.
    fn idle_sessions(
        &self,
        now: OffsetDateTime,
        max_idle: time::Duration,
    ) -> MetadataResult<Vec<UploadSession>>;

    /// Number of sessions currently tracked.
    fn len(&self) -> MetadataResult<usize>;

    /// Check whether the store is empty.
    fn is_empty(&self) -> MetadataResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// In-memory session store behind one `RwLock`.
///
/// Uploads are short-lived, so a single coarse lock over the table is
/// enough; a persistent backend would re-express `update` as a
/// compare-and-swap against its own storage.
#[derive(Default)]
pub struct MemorySessionStore {
    table: RwLock<HashMap<FileId, UploadSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_table(&self) -> MetadataResult<RwLockReadGuard<'_, HashMap<FileId, UploadSession>>> {
        self.table
            .read()
            .map_err(|_| MetadataError::Internal("session table lock poisoned".to_string()))
    }

    fn write_table(&self) -> MetadataResult<RwLockWriteGuard<'_, HashMap<FileId, UploadSession>>> {
        self.table
            .write()
            .map_err(|_| MetadataError::Internal("session table lock poisoned".to_string()))
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, file_id: &FileId) -> MetadataResult<Option<UploadSession>> {
        Ok(self.read_table()?.get(file_id).cloned())
    }

    fn get_or_create(&self, template: UploadSession) -> MetadataResult<UploadSession> {
        let mut table = self.write_table()?;
        let session = table
            .entry(template.file_id.clone())
            .or_insert_with(|| template);
        Ok(session.clone())
    }

    fn update(
        &self,
        file_id: &FileId,
        mutate: SessionUpdate<'_>,
    ) -> MetadataResult<UploadSession> {
        let mut table = self.write_table()?;
        let session = table
            .get_mut(file_id)
            .ok_or_else(|| MetadataError::NotFound(format!("upload session {file_id}")))?;

        // Mutate a scratch copy so a failed closure leaves the stored
        // session exactly as it was.
        let mut candidate = session.clone();
        mutate(&mut candidate)?;
        *session = candidate.clone();
        Ok(candidate)
    }

    fn remove(&self, file_id: &FileId) -> MetadataResult<bool> {
        Ok(self.write_table()?.remove(file_id).is_some())
    }

    fn idle_sessions(
        &self,
        now: OffsetDateTime,
        max_idle: time::Duration,
    ) -> MetadataResult<Vec<UploadSession>> {
        Ok(self
            .read_table()?
            .values()
            .filter(|session| session.idle_age(now) > max_idle)
            .cloned()
            .collect())
    }

    fn len(&self) -> MetadataResult<usize> {
        Ok(self.read_table()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_core::{ChunkChecksum, UploadStatus};

    fn sample_session(id: &str) -> UploadSession {
        UploadSession::new(
            FileId::parse(id).unwrap(),
            "report.pdf".to_string(),
            2,
            10,
            "alice".to_string(),
        )
    }

    #[test]
    fn test_get_or_create_returns_existing() {
        let store = MemorySessionStore::new();
        let first = store.get_or_create(sample_session("u1")).unwrap();

        let mut other = sample_session("u1");
        other.owner = "mallory".to_string();
        let second = store.get_or_create(other).unwrap();

        assert_eq!(second.owner, first.owner);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_update_applies_mutation() {
        let store = MemorySessionStore::new();
        let id = FileId::parse("u1").unwrap();
        store.get_or_create(sample_session("u1")).unwrap();

        let updated = store
            .update(
                &id,
                Box::new(|session| {
                    session.record_chunk(0, ChunkChecksum::compute(b"x"), 4);
                    Ok(())
                }),
            )
            .unwrap();

        assert_eq!(updated.bytes_received, 4);
        assert_eq!(store.get(&id).unwrap().unwrap().bytes_received, 4);
    }

    #[test]
    fn test_failed_update_leaves_session_untouched() {
        let store = MemorySessionStore::new();
        let id = FileId::parse("u1").unwrap();
        store.get_or_create(sample_session("u1")).unwrap();

        let result = store.update(
            &id,
            Box::new(|session| {
                session.record_chunk(0, ChunkChecksum::compute(b"x"), 4);
                session.advance(UploadStatus::Uploading)
            }),
        );

        assert!(result.is_err());
        let stored = store.get(&id).unwrap().unwrap();
        assert_eq!(stored.bytes_received, 0);
        assert_eq!(stored.status, UploadStatus::Uploading);
    }

    #[test]
    fn test_update_unknown_id_is_not_found() {
        let store = MemorySessionStore::new();
        let id = FileId::parse("nope").unwrap();
        let result = store.update(&id, Box::new(|_| Ok(())));
        assert!(matches!(result, Err(MetadataError::NotFound(_))));
    }

    #[test]
    fn test_idle_sessions() {
        let store = MemorySessionStore::new();
        let id = FileId::parse("u1").unwrap();
        store.get_or_create(sample_session("u1")).unwrap();
        store.get_or_create(sample_session("u2")).unwrap();

        // Age one session artificially.
        store
            .update(
                &id,
                Box::new(|session| {
                    session.updated_at = OffsetDateTime::now_utc() - time::Duration::hours(2);
                    Ok(())
                }),
            )
            .unwrap();

        let idle = store
            .idle_sessions(OffsetDateTime::now_utc(), time::Duration::hours(1))
            .unwrap();
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].file_id, id);
    }

    #[test]
    fn test_remove() {
        let store = MemorySessionStore::new();
        let id = FileId::parse("u1").unwrap();
        store.get_or_create(sample_session("u1")).unwrap();
        assert!(store.remove(&id).unwrap());
        assert!(!store.remove(&id).unwrap());
        assert!(store.is_empty().unwrap());
    }
}
