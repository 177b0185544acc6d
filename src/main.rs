use anyhow::Result;
use ephemeral_share::{
    config::{AppConfig, StorageBackend},
    routes::routes::app_with,
    services::{reaper::Reaper, share_service::ShareService},
    stores::{DiskBlobStore, MemoryBlobStore, MemoryMetadataStore, SqliteMetadataStore},
};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{fs, io::ErrorKind, net::SocketAddr, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;
    let settings = cfg.share_settings()?;

    tracing::info!("Starting ephemeral-share with config: {:?}", cfg);

    // --- Initialize stores ---
    let (service, db) = match cfg.storage_backend {
        StorageBackend::Disk => {
            // Ensure storage directory exists
            if !Path::new(&cfg.storage_dir).exists() {
                fs::create_dir_all(&cfg.storage_dir)?;
                tracing::info!("Created storage directory at {}", cfg.storage_dir);
            }

            let db = connect_sqlite(&cfg.database_url).await?;
            let metadata = SqliteMetadataStore::new(db.clone());
            metadata.run_migrations().await?;

            // --- Handle migration mode ---
            if migrate {
                tracing::info!("Database migration complete.");
                return Ok(()); // exit after migration
            }

            let blobs = DiskBlobStore::new(cfg.storage_dir.clone());
            let service = ShareService::new(Arc::new(blobs), Arc::new(metadata), settings);
            (service, Some(db))
        }
        StorageBackend::Memory => {
            if migrate {
                tracing::info!("Memory backend has no schema to migrate.");
                return Ok(());
            }
            tracing::warn!("Using the memory backend; files are lost on restart");
            let service = ShareService::new(
                Arc::new(MemoryBlobStore::new()),
                Arc::new(MemoryMetadataStore::new()),
                settings,
            );
            (service, None)
        }
    };

    let reaper =
        Reaper::new(service.clone(), cfg.reaper_batch_size).spawn(cfg.reaper_interval());

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    let app = app_with(service, &cfg.http_settings());
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    reaper.shutdown().await;
    if let Some(db) = db {
        db.close().await;
    }
    served?;

    Ok(())
}

/// Open the SQLite pool, creating the database file and its directory.
async fn connect_sqlite(db_url: &str) -> Result<Arc<SqlitePool>> {
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    // Create parent directory if needed
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(Arc::new(pool))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
