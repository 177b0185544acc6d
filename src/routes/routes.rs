//! Defines routes for the file sharing API.
//!
//! ## Structure
//! - **Health**
//!   - `GET  /healthz`: liveness
//!   - `GET  /readyz`: store readiness
//!
//! - **Files** (under `/api`)
//!   - `GET  /api/`: service banner
//!   - `POST /api/upload`: multipart upload, returns the descriptor
//!   - `GET  /api/download/{id}`: payload as an attachment
//!   - `GET  /api/file/{id}`: metadata only
//!
//! The file routes are limited per client address and the whole router
//! answers CORS requests from the configured origins.

use std::{convert::Infallible, sync::Arc};

use crate::{
    handlers::{
        file_handlers::{api_root, download_file, file_info, upload_file},
        health_handlers::{healthz, readyz},
    },
    ratelimit::{RateLimitLayer, RateLimitTier, RateLimiter},
    services::share_service::ShareService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, header},
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

/// Headroom for multipart boundaries and part headers, so a payload just over
/// the size limit still reaches the service and is rejected as too large.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Origin entry that allows any origin.
pub const ANY_ORIGIN: &str = "*";

/// Transport settings layered over the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    /// Browser origins allowed to call the API. `*` allows any.
    pub cors_origins: Vec<String>,
    /// Per-client limits on the file routes.
    pub rate_limits: bool,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            cors_origins: vec![ANY_ORIGIN.to_string()],
            rate_limits: true,
        }
    }
}

/// Build the router. State is supplied by the caller with `with_state`.
pub fn routes(max_upload_bytes: usize, rate_limits: bool) -> Router<ShareService> {
    let limit = |tier: RateLimitTier| {
        RateLimitLayer::new(rate_limits.then(|| Arc::new(RateLimiter::new(tier))))
    };

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/", get(api_root))
        .route(
            "/api/upload",
            post(upload_file)
                .layer::<_, Infallible>(DefaultBodyLimit::max(
                    max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES),
                ))
                .layer(limit(RateLimitTier::UPLOADS)),
        )
        .route(
            "/api/download/{id}",
            get(download_file).layer(limit(RateLimitTier::DOWNLOADS)),
        )
        .route(
            "/api/file/{id}",
            get(file_info).layer(limit(RateLimitTier::METADATA)),
        )
}

/// CORS policy for `origins`. Entries that are not valid header values are
/// skipped.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::CONTENT_DISPOSITION]);

    if origins.iter().any(|origin| origin == ANY_ORIGIN) {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Router with the service attached and default transport settings.
pub fn app(service: ShareService) -> Router {
    app_with(service, &HttpSettings::default())
}

/// Router with the service attached, ready to serve.
pub fn app_with(service: ShareService, http: &HttpSettings) -> Router {
    routes(service.max_upload_bytes(), http.rate_limits)
        .with_state(service)
        .layer(cors_layer(&http.cors_origins))
}
