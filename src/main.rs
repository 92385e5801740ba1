//! Vault Uploads Server
//!
//! Chunked, content-verified asset uploads for a personal-memory vault.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vault_uploads::access::AllowAll;
use vault_uploads::config::{Config, StoreBackend};
use vault_uploads::record::InMemoryRecords;
use vault_uploads::routes;
use vault_uploads::state::AppState;
use vault_uploads::storage::{KvStore, MemoryKvStore, SqliteKvStore};
use vault_uploads::upload::SessionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "vault_uploads=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;

    tracing::info!("Starting Vault Uploads Server v{}", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn KvStore> = match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; uploads do not survive a restart");
            Arc::new(MemoryKvStore::with_max_value_size(config.store.max_value_size))
        }
        StoreBackend::Sqlite => Arc::new(
            SqliteKvStore::connect(&config.store.database_url, config.store.max_value_size)
                .await
                .with_context(|| format!("failed to open {}", config.store.database_url))?,
        ),
    };

    let limits = config.upload_limits();
    tracing::info!(
        max_chunk_size = limits.max_chunk_size,
        max_blob_size = limits.max_blob_size,
        inactivity_secs = limits.inactivity.num_seconds(),
        "Upload limits"
    );

    let sessions = SessionManager::new(
        store,
        Arc::new(InMemoryRecords::new()),
        Arc::new(AllowAll),
        limits,
    );

    // Sessions left open by a previous process lost their hash state
    let report = sessions.sweep().await.context("startup sweep failed")?;
    tracing::info!(
        scanned = report.sessions_scanned,
        lost = report.sessions_lost,
        expired = report.sessions_expired,
        "Startup sweep complete"
    );

    let app_state = AppState::new(config, sessions);

    let server = &app_state.config().server;
    let addr: SocketAddr = format!("{}:{}", server.host, server.port)
        .parse()
        .context("invalid SERVER_HOST/SERVER_PORT")?;

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::app(app_state).layer(cors);

    tracing::info!("Vault Uploads Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
