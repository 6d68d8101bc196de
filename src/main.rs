use anyhow::Result;
use std::{io::ErrorKind, sync::Arc};
use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;
mod state;

use config::{AppConfig, LogFormat, StorageKind};
use services::{
    file_service::{FileService, ImageSettings},
    storage::{FileSystemStorage, MemoryStorage, StorageHandle},
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;

    // --- Logging setup (RUST_LOG wins over the configured level) ---
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    match cfg.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    tracing::info!("Starting blob-store with config: {:?}", cfg);

    // --- Initialize storage backend ---
    let (storage, storage_dir) = match cfg.storage {
        StorageKind::Filesystem => {
            tokio::fs::create_dir_all(&cfg.storage_dir).await?;
            let storage = FileSystemStorage::new(&cfg.storage_dir, cfg.lock_lifetime);
            tracing::info!(dir = %storage.root().display(), "using filesystem storage");
            (Arc::new(storage) as StorageHandle, Some(cfg.storage_dir.clone()))
        }
        StorageKind::InMemory => {
            tracing::warn!("using in-memory storage, files are lost on exit");
            (Arc::new(MemoryStorage::new()) as StorageHandle, None)
        }
    };

    // --- Initialize core service ---
    let service = FileService::new(
        storage,
        ImageSettings {
            format: cfg.image_format,
            max_dimension: cfg.image_max_dimension,
        },
    );
    let state = AppState {
        service: Arc::new(service),
        security: Arc::new(cfg.security.clone()),
        storage_dir,
        size_limit: cfg.size_limit,
        timeout: cfg.timeout,
    };

    // --- Build router ---
    let app = routes::routes::routes(state);

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
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves on SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
