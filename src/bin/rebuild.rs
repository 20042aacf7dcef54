//! Rebuild driver - starts a network-wide rebuild and polls it to completion
//!
//! Usage:
//!   cargo run --bin rebuild
//!
//! Optional environment variables:
//! - HREFLANG_API_URL (defaults to http://localhost:8080)
//! - API_KEY (sent as X-API-Key when set)
//! - REBUILD_POLL_MS (defaults to 100)

use anyhow::{Context, Result};
use hreflang_sync::rebuild::RebuildProgress;
use hreflang_sync::server::API_KEY_HEADER;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

struct DriverConfig {
    api_url: String,
    api_key: Option<String>,
    poll_interval: Duration,
}

impl DriverConfig {
    fn from_env() -> Self {
        Self {
            api_url: std::env::var("HREFLANG_API_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            api_key: std::env::var("API_KEY").ok().filter(|v| !v.is_empty()),
            poll_interval: Duration::from_millis(
                std::env::var("REBUILD_POLL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(100),
            ),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/hreflang/v1/rebuild/{}", self.api_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Deserialize)]
struct RebuildResponse {
    success: bool,
    #[serde(default)]
    status: Option<RebuildProgress>,
    #[serde(default)]
    message: Option<String>,
}

async fn call(client: &reqwest::Client, config: &DriverConfig, path: &str) -> Result<RebuildResponse> {
    let mut request = client.post(config.endpoint(path));
    if let Some(key) = &config.api_key {
        request = request.header(API_KEY_HEADER, key);
    }

    let response = request
        .send()
        .await
        .with_context(|| format!("Failed to call rebuild/{}", path))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("rebuild/{} returned {}: {}", path, status, body);
    }

    response
        .json()
        .await
        .with_context(|| format!("Failed to parse rebuild/{} response", path))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("rebuild=info".parse()?),
        )
        .init();

    let config = DriverConfig::from_env();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .context("Failed to build HTTP client")?;

    let started = call(&client, &config, "start").await?;
    let Some(mut progress) = started.status else {
        anyhow::bail!("Rebuild did not start: {}", started.message.unwrap_or_default());
    };
    info!("✓ Rebuild started across {} sites", progress.total_sites);

    let mut batches = 0;
    while !progress.completed {
        tokio::time::sleep(config.poll_interval).await;

        let response = call(&client, &config, "process").await?;
        if !response.success {
            warn!(
                "Rebuild stopped: {}",
                response.message.unwrap_or_else(|| "no message".to_string())
            );
            break;
        }
        let Some(next) = response.status else {
            anyhow::bail!("Batch response carried no progress");
        };

        progress = next;
        batches += 1;
        info!(
            "Site {}/{} (id {:?}): item {}/{}",
            (progress.current_site_index + 1).min(progress.total_sites),
            progress.total_sites,
            progress.current_site_id,
            progress.current_item_index,
            progress.total_items
        );
    }

    if progress.completed {
        info!("✓ Rebuild completed after {} batches", batches);
    }
    Ok(())
}
