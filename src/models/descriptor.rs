//! Response shapes returned to callers of the share service.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::blob_record::BlobRecord;

/// Returned after a successful upload.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadDescriptor {
    pub id: Uuid,
    pub filename: String,
    pub size: i64,
    pub mime_type: String,
    /// Externally visible link to the download page.
    pub download_url: String,
    /// QR code of `download_url` as a `data:` URL.
    pub qr_code: String,
    pub uploaded_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A payload read back together with its metadata.
#[derive(Clone, Debug)]
pub struct DownloadedFile {
    pub record: BlobRecord,
    pub data: Bytes,
}
