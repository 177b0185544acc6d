//! Test fixtures: a memory-backed service on a manual clock, plus store
//! wrappers that fail or stall on demand.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use std::{sync::Arc, time::Duration};
use uuid::Uuid;

use crate::{
    expiry::ManualClock,
    models::blob_record::BlobRecord,
    services::share_service::{ShareService, ShareSettings},
    stores::{
        BlobStore, MemoryBlobStore, MemoryMetadataStore, MetadataStore, StoreError, StoreResult,
    },
};

pub(crate) struct Harness {
    pub service: ShareService,
    pub blobs: Arc<MemoryBlobStore>,
    pub metadata: Arc<MemoryMetadataStore>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(settings: ShareSettings) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let blobs = Arc::new(MemoryBlobStore::with_clock(clock.clone()));
        let metadata = Arc::new(MemoryMetadataStore::new());
        let service = ShareService::new(blobs.clone(), metadata.clone(), settings)
            .with_clock(clock.clone());
        Self {
            service,
            blobs,
            metadata,
            clock,
        }
    }
}

fn injected_failure() -> StoreError {
    StoreError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "injected failure",
    ))
}

/// Memory metadata store whose inserts can be made to fail.
pub(crate) struct UnreliableMetadataStore {
    inner: MemoryMetadataStore,
    fail_inserts: bool,
}

impl UnreliableMetadataStore {
    pub fn failing_inserts() -> Self {
        Self {
            inner: MemoryMetadataStore::new(),
            fail_inserts: true,
        }
    }
}

#[async_trait]
impl MetadataStore for UnreliableMetadataStore {
    async fn insert(&self, record: &BlobRecord) -> StoreResult<()> {
        if self.fail_inserts {
            return Err(injected_failure());
        }
        self.inner.insert(record).await
    }

    async fn get(&self, id: Uuid) -> StoreResult<BlobRecord> {
        self.inner.get(id).await
    }

    async fn find_expired(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<BlobRecord>> {
        self.inner.find_expired(before, limit).await
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        self.inner.delete(id).await
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.inner.health_check().await
    }
}

/// Memory blob store that refuses to delete selected ids.
pub(crate) struct StubbornBlobStore {
    pub inner: MemoryBlobStore,
    pub undeletable: DashSet<Uuid>,
}

impl StubbornBlobStore {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            inner: MemoryBlobStore::with_clock(clock),
            undeletable: DashSet::new(),
        }
    }
}

#[async_trait]
impl BlobStore for StubbornBlobStore {
    async fn put(&self, id: Uuid, data: Bytes) -> StoreResult<()> {
        self.inner.put(id, data).await
    }

    async fn get(&self, id: Uuid) -> StoreResult<Bytes> {
        self.inner.get(id).await
    }

    async fn exists(&self, id: Uuid) -> StoreResult<bool> {
        self.inner.exists(id).await
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        if self.undeletable.contains(&id) {
            return Err(injected_failure());
        }
        self.inner.delete(id).await
    }

    async fn list_stored_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Uuid>> {
        self.inner.list_stored_before(cutoff, limit).await
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.inner.health_check().await
    }
}

/// Blob store whose writes stall for a fixed delay.
pub(crate) struct SlowBlobStore {
    inner: MemoryBlobStore,
    delay: Duration,
}

impl SlowBlobStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryBlobStore::new(),
            delay,
        }
    }
}

#[async_trait]
impl BlobStore for SlowBlobStore {
    async fn put(&self, id: Uuid, data: Bytes) -> StoreResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.put(id, data).await
    }

    async fn get(&self, id: Uuid) -> StoreResult<Bytes> {
        self.inner.get(id).await
    }

    async fn exists(&self, id: Uuid) -> StoreResult<bool> {
        self.inner.exists(id).await
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        self.inner.delete(id).await
    }

    async fn list_stored_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Uuid>> {
        self.inner.list_stored_before(cutoff, limit).await
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.inner.health_check().await
    }
}
