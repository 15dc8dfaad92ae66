//! Creditgate Service - usage metering and credit gating over HTTP
//!
//! This is the main entry point for the creditgate service.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use creditgate_service::{create_router, AppState, ServiceConfig, StoreBackend};
use creditgate_store::{LedgerStore, MemoryStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,creditgate=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Creditgate Service");

    // Load configuration from environment
    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        store_backend = ?config.store_backend,
        inference_configured = %config.inference_url.is_some(),
        security_buffer = %config.guard.security_buffer,
        rate_limit_max = %config.rate_limit_max,
        "Service configuration loaded"
    );

    let store = open_store(&config).await?;

    // Build app state
    let state = AppState::new(store, config.clone());

    // Create the router
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Open the configured ledger backend.
async fn open_store(
    config: &ServiceConfig,
) -> Result<Arc<dyn LedgerStore>, Box<dyn std::error::Error>> {
    match config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory ledger - balances are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::RocksDb => open_rocksdb(config),
        StoreBackend::Postgres => open_postgres(config).await,
    }
}

#[cfg(feature = "rocksdb-backend")]
fn open_rocksdb(config: &ServiceConfig) -> Result<Arc<dyn LedgerStore>, Box<dyn std::error::Error>> {
    tracing::info!(path = %config.data_dir, "Opening RocksDB store");
    Ok(Arc::new(creditgate_store::RocksStore::open(&config.data_dir)?))
}

#[cfg(not(feature = "rocksdb-backend"))]
fn open_rocksdb(_config: &ServiceConfig) -> Result<Arc<dyn LedgerStore>, Box<dyn std::error::Error>> {
    Err("STORE_BACKEND=rocksdb requires the rocksdb-backend feature".into())
}

#[cfg(feature = "postgres-backend")]
async fn open_postgres(
    config: &ServiceConfig,
) -> Result<Arc<dyn LedgerStore>, Box<dyn std::error::Error>> {
    let url = config
        .database_url
        .as_deref()
        .ok_or("STORE_BACKEND=postgres requires DATABASE_URL")?;

    tracing::info!("Connecting to PostgreSQL store");
    let store = creditgate_store::PgStore::connect(url).await?;
    store.migrate().await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres-backend"))]
async fn open_postgres(
    _config: &ServiceConfig,
) -> Result<Arc<dyn LedgerStore>, Box<dyn std::error::Error>> {
    Err("STORE_BACKEND=postgres requires the postgres-backend feature".into())
}
