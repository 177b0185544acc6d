//! Per-client request limits for the file routes.

pub mod limiter;
pub mod middleware;

pub use limiter::{RateLimitExceeded, RateLimitResult, RateLimitTier, RateLimiter};
pub use middleware::RateLimitLayer;
