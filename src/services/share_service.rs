//! src/services/share_service.rs
//!
//! ShareService: upload, download and inspect time-limited files. Payloads
//! live in a [`BlobStore`], their records in a [`MetadataStore`]; both are
//! long-lived handles injected at construction and shared with the reaper.
//!
//! Writes go blob first, then metadata, so a reader never sees a record
//! without its payload. Deletes go through [`ShareService::reap`] from both
//! the lazy expiry path and the reaper.

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use std::{future::Future, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    expiry::{Clock, DEFAULT_TTL_SECS, ExpiryPolicy, SystemClock},
    models::{
        blob_record::BlobRecord,
        descriptor::{DownloadedFile, UploadDescriptor},
    },
    services::link::LinkEncoder,
    stores::{BlobStore, MetadataStore, StoreError, StoreResult},
};

/// 50 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:3000";

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("file is empty")]
    EmptyFile,
    #[error("file size {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },
    #[error("file `{0}` not found")]
    NotFound(String),
    #[error("file `{0}` has expired")]
    Expired(Uuid),
    #[error("data for file `{0}` is missing")]
    DataMissing(Uuid),
    #[error("failed to encode download link: {0}")]
    LinkEncoding(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

pub type ShareResult<T> = Result<T, ShareError>;

/// Tunables for [`ShareService`].
#[derive(Clone, Debug)]
pub struct ShareSettings {
    pub max_upload_bytes: usize,
    pub ttl: TimeDelta,
    pub public_base_url: String,
    /// Upper bound on any single store call.
    pub store_timeout: Duration,
}

impl Default for ShareSettings {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            ttl: TimeDelta::seconds(DEFAULT_TTL_SECS),
            public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

#[derive(Clone)]
pub struct ShareService {
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    policy: ExpiryPolicy,
    clock: Arc<dyn Clock>,
    links: LinkEncoder,
    max_upload_bytes: usize,
    store_timeout: Duration,
}

impl ShareService {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        settings: ShareSettings,
    ) -> Self {
        Self {
            blobs,
            metadata,
            policy: ExpiryPolicy::new(settings.ttl),
            clock: Arc::new(SystemClock),
            links: LinkEncoder::new(settings.public_base_url),
            max_upload_bytes: settings.max_upload_bytes,
            store_timeout: settings.store_timeout,
        }
    }

    /// Replace the wall clock, e.g. with a [`crate::expiry::ManualClock`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Validate and store a new file, returning its descriptor.
    ///
    /// Nothing is written when validation fails. If the metadata insert fails
    /// after the blob was written, the blob is removed best-effort; a blob
    /// that cannot be removed is left for the reaper's orphan sweep.
    pub async fn upload(
        &self,
        data: Bytes,
        filename: &str,
        mime_type: Option<&str>,
    ) -> ShareResult<UploadDescriptor> {
        let size = data.len();
        if size == 0 {
            return Err(ShareError::EmptyFile);
        }
        if size > self.max_upload_bytes {
            return Err(ShareError::TooLarge {
                size,
                max: self.max_upload_bytes,
            });
        }

        let id = Uuid::new_v4();
        let download_url = self.links.download_url(id);
        let qr_code = self.links.qr_data_url(&download_url).map_err(|err| {
            error!(%id, error = %err, "upload: encoding download link failed");
            ShareError::LinkEncoding(err.to_string())
        })?;

        let uploaded_at = self.clock.now();
        let record = BlobRecord {
            id,
            filename: filename.to_string(),
            size: size as i64,
            mime_type: BlobRecord::mime_or_default(mime_type),
            uploaded_at,
            expires_at: self.policy.compute_expiry(uploaded_at),
        };

        if let Err(err) = self.bounded("blob put", self.blobs.put(id, data)).await {
            error!(%id, error = %err, "upload: writing blob failed");
            self.rollback_blob(id).await;
            return Err(err.into());
        }

        if let Err(err) = self
            .bounded("metadata insert", self.metadata.insert(&record))
            .await
        {
            error!(%id, error = %err, "upload: writing metadata failed");
            self.rollback_blob(id).await;
            return Err(err.into());
        }

        info!(%id, size, expires_at = %record.expires_at, "stored upload");

        Ok(UploadDescriptor {
            id,
            filename: record.filename,
            size: record.size,
            mime_type: record.mime_type,
            download_url,
            qr_code,
            uploaded_at: record.uploaded_at,
            expires_at: record.expires_at,
        })
    }

    /// Read a live file's payload and metadata.
    ///
    /// An expired file is reaped on the spot and reported as `Expired`.
    pub async fn download(&self, id: &str) -> ShareResult<DownloadedFile> {
        let record = self.live_record(id, "download").await?;
        let id = record.id;

        let present = self
            .bounded("blob exists", self.blobs.exists(id))
            .await
            .map_err(|err| storage_failure(id, "download", err))?;
        if !present {
            error!(%id, "download: metadata present but blob missing");
            return Err(ShareError::DataMissing(id));
        }

        let data = match self.bounded("blob get", self.blobs.get(id)).await {
            Ok(data) => data,
            Err(StoreError::NotFound(_)) => {
                error!(%id, "download: blob vanished after existence check");
                return Err(ShareError::DataMissing(id));
            }
            Err(err) => return Err(storage_failure(id, "download", err)),
        };

        debug!(%id, bytes = data.len(), "serving download");
        Ok(DownloadedFile { record, data })
    }

    /// Metadata for a live file. Expired files are reaped here too.
    pub async fn get_info(&self, id: &str) -> ShareResult<BlobRecord> {
        self.live_record(id, "get_info").await
    }

    /// Delete a file's blob, then its record. Both deletes tolerate absence,
    /// so racing callers all succeed.
    pub async fn reap(&self, id: Uuid) -> ShareResult<()> {
        self.bounded("blob delete", self.blobs.delete(id)).await?;
        self.bounded("metadata delete", self.metadata.delete(id))
            .await?;
        debug!(%id, "reaped file");
        Ok(())
    }

    /// Up to `limit` records expired as of `now`.
    pub async fn expired_batch(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> ShareResult<Vec<BlobRecord>> {
        let rows = self
            .bounded("metadata find_expired", self.metadata.find_expired(now, limit))
            .await?;
        Ok(rows
            .into_iter()
            .filter(|record| self.policy.is_expired(record, now))
            .collect())
    }

    /// Delete up to `limit` blobs that have no metadata and are older than
    /// one TTL as of `now`. Returns how many were removed.
    pub async fn sweep_orphan_blobs(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> ShareResult<usize> {
        let cutoff = self.policy.orphan_cutoff(now);
        let candidates = self
            .bounded(
                "blob list_stored_before",
                self.blobs.list_stored_before(cutoff, limit),
            )
            .await?;

        let mut removed = 0;
        for id in candidates {
            match self.bounded("metadata get", self.metadata.get(id)).await {
                Ok(_) => continue,
                Err(StoreError::NotFound(_)) => {}
                Err(err) => {
                    warn!(%id, error = %err, "orphan sweep: metadata lookup failed");
                    continue;
                }
            }
            match self.bounded("blob delete", self.blobs.delete(id)).await {
                Ok(()) => {
                    warn!(%id, "orphan sweep: removed blob without metadata");
                    removed += 1;
                }
                Err(err) => warn!(%id, error = %err, "orphan sweep: blob delete failed"),
            }
        }
        Ok(removed)
    }

    pub async fn check_metadata_store(&self) -> ShareResult<()> {
        self.bounded("metadata health", self.metadata.health_check())
            .await?;
        Ok(())
    }

    pub async fn check_blob_store(&self) -> ShareResult<()> {
        self.bounded("blob health", self.blobs.health_check())
            .await?;
        Ok(())
    }

    /// Parse, look up, and expiry-check a record.
    async fn live_record(&self, raw_id: &str, op: &'static str) -> ShareResult<BlobRecord> {
        let Ok(id) = Uuid::parse_str(raw_id) else {
            return Err(ShareError::NotFound(raw_id.to_string()));
        };

        let record = match self.bounded("metadata get", self.metadata.get(id)).await {
            Ok(record) => record,
            Err(StoreError::NotFound(_)) => return Err(ShareError::NotFound(id.to_string())),
            Err(err) => return Err(storage_failure(id, op, err)),
        };

        let now = self.clock.now();
        if self.policy.is_expired(&record, now) {
            if let Err(err) = self.reap(id).await {
                warn!(%id, error = %err, "{}: reaping expired file failed", op);
            } else {
                info!(%id, expires_at = %record.expires_at, "{}: reaped expired file", op);
            }
            return Err(ShareError::Expired(id));
        }

        Ok(record)
    }

    async fn rollback_blob(&self, id: Uuid) {
        if let Err(err) = self.bounded("blob delete", self.blobs.delete(id)).await {
            warn!(%id, error = %err, "upload rollback failed; orphan blob left for the reaper");
        }
    }

    /// Run a store call under the configured timeout.
    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        tokio::time::timeout(self.store_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(op))?
    }
}

fn storage_failure(id: Uuid, op: &str, err: StoreError) -> ShareError {
    error!(%id, error = %err, "{}: store failure", op);
    ShareError::Storage(err)
}
