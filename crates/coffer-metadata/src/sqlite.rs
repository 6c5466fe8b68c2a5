//! SQLite-backed record store.

use crate::error::{MetadataError, MetadataResult};
use crate::records::{RecordStore, RecordTransaction};
use async_trait::async_trait;
use coffer_core::{Associations, FinalizeState, NewRecord, ParentLink, RecordId, RecordRow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    module TEXT NOT NULL,
    title TEXT,
    file_name TEXT NOT NULL,
    storage_path TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    content_type TEXT,
    owner TEXT NOT NULL,
    finalize_state TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_module ON records(module);
CREATE INDEX IF NOT EXISTS idx_records_finalize_state ON records(finalize_state);

CREATE TABLE IF NOT EXISTS record_tags (
    record_id TEXT NOT NULL REFERENCES records(id) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    PRIMARY KEY (record_id, tag)
);

CREATE TABLE IF NOT EXISTS record_links (
    record_id TEXT PRIMARY KEY REFERENCES records(id) ON DELETE CASCADE,
    parent_module TEXT NOT NULL,
    parent_id TEXT NOT NULL
);
"#;

/// SQLite-backed record store.
pub struct SqliteRecordStore {
    pool: Pool<Sqlite>,
}

impl SqliteRecordStore {
    /// Open (or create) a store at the given path and run migrations.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));
        Self::connect(opts).await
    }

    /// Open an in-memory store (tests).
    pub async fn in_memory() -> MetadataResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        Self::connect(opts).await
    }

    async fn connect(opts: SqliteConnectOptions) -> MetadataResult<Self> {
        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // avoids persistent "database is locked" failures. It also keeps
            // an in-memory database alive for the pool's lifetime.
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct DbRecord {
    id: String,
    module: String,
    title: Option<String>,
    file_name: String,
    storage_path: String,
    file_size: i64,
    content_hash: String,
    content_type: Option<String>,
    owner: String,
    finalize_state: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<DbRecord> for RecordRow {
    type Error = MetadataError;

    fn try_from(row: DbRecord) -> MetadataResult<Self> {
        Ok(RecordRow {
            id: RecordId::parse(&row.id)?,
            module: row.module,
            title: row.title,
            file_name: row.file_name,
            storage_path: row.storage_path,
            file_size: u64::try_from(row.file_size).map_err(|_| {
                MetadataError::Internal(format!("negative file size stored for record {}", row.id))
            })?,
            content_hash: row.content_hash,
            content_type: row.content_type,
            owner: row.owner,
            finalize_state: FinalizeState::parse(&row.finalize_state)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn size_to_db(size: u64) -> MetadataResult<i64> {
    i64::try_from(size)
        .map_err(|_| MetadataError::Internal(format!("file size {size} exceeds storable range")))
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn begin(&self) -> MetadataResult<Box<dyn RecordTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    async fn get(&self, id: RecordId) -> MetadataResult<Option<RecordRow>> {
        let row = sqlx::query_as::<_, DbRecord>("SELECT * FROM records WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(RecordRow::try_from).transpose()
    }

    async fn associations(&self, id: RecordId) -> MetadataResult<Associations> {
        let tags: Vec<String> =
            sqlx::query_scalar("SELECT tag FROM record_tags WHERE record_id = ? ORDER BY tag")
                .bind(id.to_string())
                .fetch_all(&self.pool)
                .await?;

        let parent: Option<(String, String)> = sqlx::query_as(
            "SELECT parent_module, parent_id FROM record_links WHERE record_id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(Associations {
            tags,
            parent: parent.map(|(module, id)| ParentLink { module, id }),
        })
    }

    async fn finalize(
        &self,
        id: RecordId,
        final_path: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool> {
        let result = sqlx::query(
            "UPDATE records SET storage_path = ?, finalize_state = 'finalized', updated_at = ? \
             WHERE id = ? AND finalize_state = 'pending'",
        )
        .bind(final_path)
        .bind(updated_at)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        // No pending row flipped: either the record is gone or it was
        // already finalized (re-running finalize is idempotent).
        let state: Option<String> =
            sqlx::query_scalar("SELECT finalize_state FROM records WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        match state {
            None => Err(MetadataError::NotFound(format!("record {id}"))),
            Some(_) => Ok(false),
        }
    }

    async fn list_pending_finalize(&self) -> MetadataResult<Vec<RecordRow>> {
        let rows = sqlx::query_as::<_, DbRecord>(
            "SELECT * FROM records WHERE finalize_state = 'pending' ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RecordRow::try_from).collect()
    }

    async fn count(&self) -> MetadataResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

/// One open transaction against the SQLite store.
pub struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl RecordTransaction for SqliteTransaction {
    async fn insert_record(&mut self, record: &NewRecord) -> MetadataResult<RecordId> {
        let id = RecordId::new();
        sqlx::query(
            r#"
            INSERT INTO records (
                id, module, title, file_name, storage_path, file_size,
                content_hash, content_type, owner, finalize_state,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&record.module)
        .bind(&record.title)
        .bind(&record.file_name)
        .bind(&record.storage_path)
        .bind(size_to_db(record.file_size)?)
        .bind(&record.content_hash)
        .bind(&record.content_type)
        .bind(&record.owner)
        .bind(record.created_at)
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn attach_associations(
        &mut self,
        id: RecordId,
        associations: &Associations,
    ) -> MetadataResult<()> {
        for tag in &associations.tags {
            sqlx::query("INSERT OR IGNORE INTO record_tags (record_id, tag) VALUES (?, ?)")
                .bind(id.to_string())
                .bind(tag)
                .execute(&mut *self.tx)
                .await?;
        }
        if let Some(parent) = &associations.parent {
            sqlx::query(
                "INSERT INTO record_links (record_id, parent_module, parent_id) VALUES (?, ?, ?)",
            )
            .bind(id.to_string())
            .bind(&parent.module)
            .bind(&parent.id)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> MetadataResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> MetadataResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
