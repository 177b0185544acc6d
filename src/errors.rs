use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::services::share_service::ShareError;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 410 Gone
    pub fn gone(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::GONE, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

/// Store internals stay in the logs; callers only see a generic message.
impl From<ShareError> for AppError {
    fn from(err: ShareError) -> Self {
        match err {
            ShareError::EmptyFile => AppError::bad_request("File is empty"),
            ShareError::TooLarge { max, .. } => {
                AppError::bad_request(format!("File size exceeds the {} byte limit", max))
            }
            ShareError::NotFound(_) => AppError::not_found("File not found"),
            ShareError::Expired(_) => AppError::gone("File has expired"),
            ShareError::DataMissing(_) => AppError::internal("File data not found"),
            ShareError::LinkEncoding(_) | ShareError::Storage(_) => {
                AppError::internal("Internal storage error")
            }
        }
    }
}
