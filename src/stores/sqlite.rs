//! Metadata records in SQLite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::{MetadataStore, StoreError, StoreResult};
use crate::models::blob_record::BlobRecord;

/// Schema applied by [`SqliteMetadataStore::run_migrations`].
const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Clone)]
pub struct SqliteMetadataStore {
    /// Shared SQLite connection pool.
    db: Arc<SqlitePool>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        let statements = INIT_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert(&self, record: &BlobRecord) -> StoreResult<()> {
        match sqlx::query(
            "INSERT INTO files (id, filename, size, mime_type, uploaded_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(&record.filename)
        .bind(record.size)
        .bind(&record.mime_type)
        .bind(record.uploaded_at)
        .bind(record.expires_at)
        .execute(&*self.db)
        .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::DuplicateId(record.id)),
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    async fn get(&self, id: Uuid) -> StoreResult<BlobRecord> {
        sqlx::query_as::<_, BlobRecord>(
            "SELECT id, filename, size, mime_type, uploaded_at, expires_at
             FROM files WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::NotFound(id),
            other => StoreError::Sqlx(other),
        })
    }

    async fn find_expired(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<BlobRecord>> {
        let rows = sqlx::query_as::<_, BlobRecord>(
            "SELECT id, filename, size, mime_type, uploaded_at, expires_at
             FROM files
             WHERE expires_at < ?
             ORDER BY expires_at ASC
             LIMIT ?",
        )
        .bind(before)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            debug!(%id, "metadata record already missing");
        }
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        let value = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        if value != 1 {
            return Err(StoreError::Sqlx(sqlx::Error::Protocol(format!(
                "unexpected result: {}",
                value
            ))));
        }
        Ok(())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteMetadataStore {
        // One connection: every `:memory:` connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteMetadataStore::new(Arc::new(pool));
        store.run_migrations().await.unwrap();
        store
    }

    fn record(expires_at: DateTime<Utc>) -> BlobRecord {
        BlobRecord {
            id: Uuid::new_v4(),
            filename: "report.pdf".into(),
            size: 1234,
            mime_type: "application/pdf".into(),
            uploaded_at: expires_at - TimeDelta::hours(2),
            expires_at,
        }
    }

    #[tokio::test]
    async fn insert_then_get_returns_same_record() {
        let store = store().await;
        let rec = record(Utc::now() + TimeDelta::hours(2));
        store.insert(&rec).await.unwrap();
        assert_eq!(store.get(rec.id).await.unwrap(), rec);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = store().await;
        let rec = record(Utc::now());
        store.insert(&rec).await.unwrap();
        assert!(matches!(
            store.insert(&rec).await,
            Err(StoreError::DuplicateId(id)) if id == rec.id
        ));
    }

    #[tokio::test]
    async fn missing_record_is_not_found_and_delete_is_idempotent() {
        let store = store().await;
        let rec = record(Utc::now());
        store.insert(&rec).await.unwrap();

        store.delete(rec.id).await.unwrap();
        store.delete(rec.id).await.unwrap();
        assert!(matches!(store.get(rec.id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn find_expired_respects_cutoff_order_and_limit() {
        let store = store().await;
        let now = Utc::now();
        let oldest = record(now - TimeDelta::minutes(30));
        let older = record(now - TimeDelta::minutes(10));
        let at_cutoff = record(now);
        let live = record(now + TimeDelta::minutes(10));
        for rec in [&live, &older, &at_cutoff, &oldest] {
            store.insert(rec).await.unwrap();
        }

        let expired = store.find_expired(now, 10).await.unwrap();
        let ids: Vec<Uuid> = expired.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![oldest.id, older.id]);

        let first = store.find_expired(now, 1).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, oldest.id);
    }

    #[tokio::test]
    async fn health_check_succeeds_on_open_pool() {
        store().await.health_check().await.unwrap();
    }
}
