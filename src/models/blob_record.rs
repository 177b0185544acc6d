//! Represents an uploaded file's metadata record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Content type recorded when the uploader did not send one.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Metadata describing a single stored payload.
///
/// The record does not hold the payload bytes; those live in the blob store
/// under the same `id`. A record is immutable from insert until deletion.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct BlobRecord {
    /// Random identifier shared with the payload.
    pub id: Uuid,

    /// Original filename supplied by the uploader.
    pub filename: String,

    /// Payload length in bytes.
    pub size: i64,

    /// Content type (MIME type).
    pub mime_type: String,

    /// When the payload was accepted.
    pub uploaded_at: DateTime<Utc>,

    /// Instant after which the record and its payload are invalid.
    pub expires_at: DateTime<Utc>,
}

impl BlobRecord {
    /// Normalize an optional uploader-supplied content type.
    pub fn mime_or_default(mime_type: Option<&str>) -> String {
        match mime_type.map(str::trim) {
            Some(mime) if !mime.is_empty() => mime.to_string(),
            _ => DEFAULT_MIME_TYPE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_blank_mime_falls_back_to_octet_stream() {
        assert_eq!(BlobRecord::mime_or_default(None), DEFAULT_MIME_TYPE);
        assert_eq!(BlobRecord::mime_or_default(Some("  ")), DEFAULT_MIME_TYPE);
        assert_eq!(BlobRecord::mime_or_default(Some("text/plain")), "text/plain");
    }
}
