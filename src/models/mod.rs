//! Core data models for the file sharing service.
//!
//! `BlobRecord` maps to the `files` table via `sqlx::FromRow`; the descriptor
//! types are what the service hands back to its callers.

pub mod blob_record;
pub mod descriptor;
