use anyhow::{Context, Result, anyhow, ensure};
use axum::http::HeaderValue;
use chrono::TimeDelta;
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr, time::Duration};

use crate::{
    expiry::{DEFAULT_TTL_SECS, MAX_TTL_SECS},
    routes::routes::{ANY_ORIGIN, HttpSettings},
    services::{
        reaper::{DEFAULT_REAPER_BATCH_SIZE, DEFAULT_REAPER_INTERVAL},
        share_service::{
            DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_PUBLIC_BASE_URL, DEFAULT_STORE_TIMEOUT,
            ShareSettings,
        },
    },
};

/// Where payloads and records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    /// Payloads on disk, records in SQLite.
    Disk,
    /// Everything in process memory; lost on restart.
    Memory,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Origin used to build download links and their QR codes.
    pub public_base_url: String,
    pub max_upload_bytes: usize,
    pub ttl_secs: i64,
    pub reaper_interval_secs: u64,
    pub reaper_batch_size: usize,
    pub store_timeout_secs: u64,
    pub storage_backend: StorageBackend,
    /// Browser origins allowed by CORS; `*` allows any.
    pub cors_origins: Vec<String>,
    pub rate_limits: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Ephemeral file sharing service")]
pub struct Args {
    /// Host to bind to (overrides FILE_SHARE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_SHARE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where payloads are stored (overrides FILE_SHARE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FILE_SHARE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public origin for download links (overrides FILE_SHARE_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Largest accepted upload in bytes (overrides FILE_SHARE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// File lifetime in seconds (overrides FILE_SHARE_TTL_SECS)
    #[arg(long)]
    pub ttl_secs: Option<i64>,

    /// Seconds between reaper cycles (overrides FILE_SHARE_REAPER_INTERVAL_SECS)
    #[arg(long)]
    pub reaper_interval_secs: Option<u64>,

    /// Records reaped per cycle (overrides FILE_SHARE_REAPER_BATCH_SIZE)
    #[arg(long)]
    pub reaper_batch_size: Option<usize>,

    /// Timeout for a single store operation (overrides FILE_SHARE_STORE_TIMEOUT_SECS)
    #[arg(long)]
    pub store_timeout_secs: Option<u64>,

    /// Storage backend (overrides FILE_SHARE_STORAGE_BACKEND)
    #[arg(long, value_enum)]
    pub storage_backend: Option<StorageBackend>,

    /// Comma-separated CORS origins (overrides FILE_SHARE_CORS_ORIGINS)
    #[arg(long)]
    pub cors_origins: Option<String>,

    /// Per-client rate limits on/off (overrides FILE_SHARE_RATE_LIMITS)
    #[arg(long)]
    pub rate_limits: Option<bool>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        Self::resolve(Args::parse(), |key| env::var(key))
    }

    /// Merge parsed args over values from `lookup`, falling back to defaults.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<(Self, bool)>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        // --- Environment fallback ---
        let env_host = lookup("FILE_SHARE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_var(&lookup, "FILE_SHARE_PORT", 8000u16)?;
        let env_storage =
            lookup("FILE_SHARE_STORAGE_DIR").unwrap_or_else(|_| "./data/blobs".into());
        let env_db = lookup("FILE_SHARE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/files.db".into());
        let env_base_url = lookup("FILE_SHARE_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_PUBLIC_BASE_URL.into());
        let env_max = parse_var(
            &lookup,
            "FILE_SHARE_MAX_UPLOAD_BYTES",
            DEFAULT_MAX_UPLOAD_BYTES,
        )?;
        let env_ttl = parse_var(&lookup, "FILE_SHARE_TTL_SECS", DEFAULT_TTL_SECS)?;
        let env_interval = parse_var(
            &lookup,
            "FILE_SHARE_REAPER_INTERVAL_SECS",
            DEFAULT_REAPER_INTERVAL.as_secs(),
        )?;
        let env_batch = parse_var(
            &lookup,
            "FILE_SHARE_REAPER_BATCH_SIZE",
            DEFAULT_REAPER_BATCH_SIZE,
        )?;
        let env_timeout = parse_var(
            &lookup,
            "FILE_SHARE_STORE_TIMEOUT_SECS",
            DEFAULT_STORE_TIMEOUT.as_secs(),
        )?;

        let env_backend = match lookup("FILE_SHARE_STORAGE_BACKEND") {
            Ok(value) => <StorageBackend as ValueEnum>::from_str(&value, true)
                .map_err(|err| anyhow!(err))
                .with_context(|| format!("parsing FILE_SHARE_STORAGE_BACKEND value `{}`", value))?,
            Err(_) => StorageBackend::Disk,
        };
        let env_cors = lookup("FILE_SHARE_CORS_ORIGINS").unwrap_or_else(|_| ANY_ORIGIN.into());
        let env_rate_limits = parse_var(&lookup, "FILE_SHARE_RATE_LIMITS", true)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_base_url: args.public_base_url.unwrap_or(env_base_url),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max),
            ttl_secs: args.ttl_secs.unwrap_or(env_ttl),
            reaper_interval_secs: args.reaper_interval_secs.unwrap_or(env_interval),
            reaper_batch_size: args.reaper_batch_size.unwrap_or(env_batch),
            store_timeout_secs: args.store_timeout_secs.unwrap_or(env_timeout),
            storage_backend: args.storage_backend.unwrap_or(env_backend),
            cors_origins: split_origins(&args.cors_origins.unwrap_or(env_cors)),
            rate_limits: args.rate_limits.unwrap_or(env_rate_limits),
        };
        cfg.validate()?;

        Ok((cfg, args.migrate))
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.max_upload_bytes > 0, "max upload size must be positive");
        ensure!(self.ttl_secs > 0, "ttl must be positive");
        ensure!(
            self.ttl_secs <= MAX_TTL_SECS,
            "ttl of {} seconds exceeds the maximum of {}",
            self.ttl_secs,
            MAX_TTL_SECS
        );
        ensure!(
            self.reaper_interval_secs > 0,
            "reaper interval must be positive"
        );
        ensure!(self.reaper_batch_size > 0, "reaper batch size must be positive");
        ensure!(self.store_timeout_secs > 0, "store timeout must be positive");
        ensure!(!self.cors_origins.is_empty(), "at least one CORS origin is required");
        for origin in &self.cors_origins {
            HeaderValue::from_str(origin)
                .with_context(|| format!("invalid CORS origin `{}`", origin))?;
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn share_settings(&self) -> Result<ShareSettings> {
        let ttl = TimeDelta::try_seconds(self.ttl_secs)
            .with_context(|| format!("ttl of {} seconds is out of range", self.ttl_secs))?;
        Ok(ShareSettings {
            max_upload_bytes: self.max_upload_bytes,
            ttl,
            public_base_url: self.public_base_url.clone(),
            store_timeout: Duration::from_secs(self.store_timeout_secs),
        })
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            cors_origins: self.cors_origins.clone(),
            rate_limits: self.rate_limits,
        }
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read `key` through `lookup`, parsing it when present.
fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Result<String, env::VarError>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
