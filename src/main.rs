use anyhow::{Context, Result};
use hreflang_sync::config::Config;
use hreflang_sync::db::Database;
use hreflang_sync::engine::Engine;
use hreflang_sync::network::{ContentHost, StaticNetwork};
use hreflang_sync::server::{self, AppState};
use hreflang_sync::store::{MemoryStore, Store};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored when variables come from the environment)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hreflang_sync=info".parse()?),
        )
        .init();

    info!("Starting hreflang sync service");

    let config = Config::from_env()?;

    let network = Arc::new(StaticNetwork::load(&config.network_file)?);
    info!(
        "✓ Loaded network from {} ({} sites, main site {})",
        config.network_file,
        network.sites().len(),
        network.main_site_id()
    );

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => Arc::new(Database::new(url).await?),
        None => {
            warn!("DATABASE_URL not set, maps and settings are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let engine = Engine::new(network, store, &config)?;

    // Record locale collisions present at startup
    let duplicates = engine.settings.check_duplicate_locales().await?;
    if !duplicates.is_empty() {
        warn!("{} locale(s) are claimed by more than one site", duplicates.len());
    }

    let app = server::router(AppState::new(engine, config.api_key.clone()));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("✓ Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
