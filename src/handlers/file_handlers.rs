//! HTTP handlers for upload, download and file inspection.
//! Thin adapters over `ShareService`; all policy lives in the service.

use crate::{
    errors::AppError,
    models::{blob_record::BlobRecord, descriptor::UploadDescriptor},
    services::share_service::ShareService,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State, multipart::MultipartError},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::json;

/// Multipart field carrying the payload.
const FILE_FIELD: &str = "file";
/// Used when the client sends no filename.
const DEFAULT_FILENAME: &str = "upload";

/// Escape everything outside the RFC 3986 unreserved set.
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// `GET /api/`
pub async fn api_root() -> impl IntoResponse {
    Json(json!({ "message": "File Sharing API" }))
}

/// `POST /api/upload`: multipart body with a single `file` field.
pub async fn upload_file(
    State(service): State<ShareService>,
    mut multipart: Multipart,
) -> Result<Json<UploadDescriptor>, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field
            .file_name()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_FILENAME)
            .to_string();
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.map_err(multipart_error)?;

        let descriptor = service
            .upload(data, &filename, content_type.as_deref())
            .await?;
        return Ok(Json(descriptor));
    }

    Err(AppError::bad_request("No file uploaded"))
}

/// `GET /api/download/{id}`: the payload as an attachment.
pub async fn download_file(
    State(service): State<ShareService>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let file = service.download(&id).await?;

    let mut response = Response::new(Body::from(file.data));
    *response.status_mut() = StatusCode::OK;
    set_file_headers(response.headers_mut(), &file.record);
    Ok(response)
}

/// `GET /api/file/{id}`: metadata only.
pub async fn file_info(
    State(service): State<ShareService>,
    Path(id): Path<String>,
) -> Result<Json<BlobRecord>, AppError> {
    Ok(Json(service.get_info(&id).await?))
}

fn multipart_error(err: MultipartError) -> AppError {
    AppError::new(err.status(), err.body_text())
}

fn set_file_headers(headers: &mut HeaderMap, record: &BlobRecord) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&record.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&record.size.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition(&record.filename),
    );

    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    if let Ok(value) = HeaderValue::from_str(&record.uploaded_at.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

/// `attachment` disposition with an ASCII fallback name and an RFC 5987
/// `filename*` carrying the original.
fn content_disposition(filename: &str) -> HeaderValue {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        utf8_percent_encode(filename, ATTR_CHAR)
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_keeps_ascii_names_readable() {
        let value = content_disposition("a.txt");
        assert_eq!(
            value.to_str().unwrap(),
            "attachment; filename=\"a.txt\"; filename*=UTF-8''a.txt"
        );
    }

    #[test]
    fn disposition_escapes_quotes_and_unicode() {
        let value = content_disposition("résumé \"final\".pdf");
        let text = value.to_str().unwrap();
        assert!(text.starts_with("attachment; filename=\"r_sum_ _final_.pdf\""));
        assert!(text.ends_with("filename*=UTF-8''r%C3%A9sum%C3%A9%20%22final%22.pdf"));
    }

    #[test]
    fn disposition_encodes_path_separators_and_non_latin_names() {
        let value = content_disposition("報告/2024;v1~draft.txt");
        let text = value.to_str().unwrap();
        assert!(text.starts_with("attachment; filename=\"__/2024;v1~draft.txt\""));
        assert!(text.ends_with("filename*=UTF-8''%E5%A0%B1%E5%91%8A%2F2024%3Bv1~draft.txt"));
    }
}
