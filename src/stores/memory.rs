//! In-memory stores backed by `DashMap`. Suitable for development and testing.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use std::sync::Arc;
use uuid::Uuid;

use super::{BlobStore, MetadataStore, StoreError, StoreResult};
use crate::{
    expiry::{Clock, SystemClock},
    models::blob_record::BlobRecord,
};

struct StoredBlob {
    data: Bytes,
    stored_at: DateTime<Utc>,
}

/// Payloads held in a concurrent map keyed by id.
pub struct MemoryBlobStore {
    blobs: DashMap<Uuid, StoredBlob>,
    /// Stamps `stored_at` for the orphan listing.
    clock: Arc<dyn Clock>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            blobs: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, id: Uuid, data: Bytes) -> StoreResult<()> {
        let stored_at = self.clock.now();
        self.blobs.insert(id, StoredBlob { data, stored_at });
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Bytes> {
        self.blobs
            .get(&id)
            .map(|blob| blob.data.clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn exists(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.blobs.contains_key(&id))
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        self.blobs.remove(&id);
        Ok(())
    }

    async fn list_stored_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Uuid>> {
        Ok(self
            .blobs
            .iter()
            .filter(|entry| entry.value().stored_at < cutoff)
            .map(|entry| *entry.key())
            .take(limit)
            .collect())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Metadata records held in a concurrent map keyed by id.
#[derive(Default)]
pub struct MemoryMetadataStore {
    records: DashMap<Uuid, BlobRecord>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert(&self, record: &BlobRecord) -> StoreResult<()> {
        match self.records.entry(record.id) {
            Entry::Occupied(_) => Err(StoreError::DuplicateId(record.id)),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: Uuid) -> StoreResult<BlobRecord> {
        self.records
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn find_expired(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<BlobRecord>> {
        let mut expired: Vec<BlobRecord> = self
            .records
            .iter()
            .filter(|entry| entry.value().expires_at < before)
            .map(|entry| entry.value().clone())
            .collect();
        expired.sort_by_key(|r| r.expires_at);
        expired.truncate(limit);
        Ok(expired)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        self.records.remove(&id);
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}
