mod api;
mod config;
mod import;
mod models;
mod platforms;
mod quota;
mod storage;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use config::{Config, DatabaseBackend};
use storage::{PostgresStorage, SqliteStorage, Storage};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Initialize storage
    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.database.url);
            Arc::new(SqliteStorage::new(&config.database.url, config.database.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage: {}", config.database.url);
            Arc::new(
                PostgresStorage::new(&config.database.url, config.database.max_connections).await?,
            )
        }
    };

    // Initialize database
    info!("Initializing database...");
    storage.init().await?;
    info!("Database initialized successfully");

    info!(
        "Import quota: {} events/month over a {}-month window",
        config.import.monthly_event_limit, config.import.quota_window_months
    );

    // Create router
    let config = Arc::new(config);
    let router = api::create_api_router(Arc::clone(&storage), Arc::clone(&config));

    // Start API server
    let api_addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let listener = tokio::net::TcpListener::bind(&api_addr).await?;
    info!("🚀 API server listening on http://{}", api_addr);
    info!("   - Batch ingestion at http://{}/api/batch-import-events/...", api_addr);

    axum::serve(listener, router).await?;

    Ok(())
}
