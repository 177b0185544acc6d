//! Ephemeral file sharing: uploads get a random id, a download link with a QR
//! code, and a fixed lifetime after which both the payload and its metadata
//! are reclaimed, lazily on access or by the background reaper.

pub mod config;
pub mod errors;
pub mod expiry;
pub mod handlers;
pub mod models;
pub mod ratelimit;
pub mod routes;
pub mod services;
pub mod stores;
