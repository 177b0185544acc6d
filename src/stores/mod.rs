//! Storage backends for payloads and their metadata.
//!
//! The two stores are independent: no transaction spans them. Callers keep
//! them consistent by writing the blob before its record and by treating
//! every delete as idempotent.

pub mod disk;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io;
use thiserror::Error;
use uuid::Uuid;

use crate::models::blob_record::BlobRecord;

pub use disk::DiskBlobStore;
pub use memory::{MemoryBlobStore, MemoryMetadataStore};
pub use sqlite::SqliteMetadataStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("`{0}` not found")]
    NotFound(Uuid),
    #[error("record `{0}` already exists")]
    DuplicateId(Uuid),
    #[error("store operation `{0}` timed out")]
    Timeout(&'static str),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Raw payload storage keyed by file id.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `id`. The payload becomes visible only once fully written.
    async fn put(&self, id: Uuid, data: Bytes) -> StoreResult<()>;

    /// Read the full payload. `StoreError::NotFound` if absent.
    async fn get(&self, id: Uuid) -> StoreResult<Bytes>;

    async fn exists(&self, id: Uuid) -> StoreResult<bool>;

    /// Remove a payload. Succeeds when it is already gone.
    async fn delete(&self, id: Uuid) -> StoreResult<()>;

    /// Ids of payloads written before `cutoff`, at most `limit` of them.
    async fn list_stored_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Uuid>>;

    async fn health_check(&self) -> StoreResult<()>;
}

/// Durable metadata records keyed by file id.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new record. `StoreError::DuplicateId` if the id is taken.
    async fn insert(&self, record: &BlobRecord) -> StoreResult<()>;

    /// Fetch a record. `StoreError::NotFound` if absent.
    async fn get(&self, id: Uuid) -> StoreResult<BlobRecord>;

    /// Records with `expires_at < before`, oldest expiry first, at most `limit`.
    ///
    /// The cutoff comes from the caller; implementations never read a clock.
    async fn find_expired(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<BlobRecord>>;

    /// Remove a record. Succeeds when it is already gone.
    async fn delete(&self, id: Uuid) -> StoreResult<()>;

    async fn health_check(&self) -> StoreResult<()>;
}
