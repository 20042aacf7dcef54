use crate::map_store::HreflangMap;
use crate::network::ItemId;
use crate::store::Store;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::info;

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect and create tables if they do not exist yet
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        let db = Self { pool };
        db.create_tables().await?;

        info!("✓ Database ready");
        Ok(db)
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS hreflang_maps (
                item_id BIGINT PRIMARY KEY,
                map JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create hreflang_maps table")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS hreflang_options (
                name TEXT PRIMARY KEY,
                value JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create hreflang_options table")?;

        Ok(())
    }
}

impl Store for Database {
    fn get_map(&self, item_id: ItemId) -> BoxFuture<'_, Result<Option<HreflangMap>>> {
        Box::pin(async move {
            let map: Option<Json<HreflangMap>> =
                sqlx::query_scalar("SELECT map FROM hreflang_maps WHERE item_id = $1")
                    .bind(item_id)
                    .fetch_optional(&self.pool)
                    .await
                    .context("Failed to load hreflang map")?;
            Ok(map.map(|Json(map)| map))
        })
    }

    fn put_map(&self, item_id: ItemId, map: HreflangMap) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO hreflang_maps (item_id, map, updated_at)
                 VALUES ($1, $2, NOW())
                 ON CONFLICT (item_id) DO UPDATE SET map = EXCLUDED.map, updated_at = NOW()",
            )
            .bind(item_id)
            .bind(Json(map))
            .execute(&self.pool)
            .await
            .context("Failed to save hreflang map")?;
            Ok(())
        })
    }

    fn delete_map(&self, item_id: ItemId) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM hreflang_maps WHERE item_id = $1")
                .bind(item_id)
                .execute(&self.pool)
                .await
                .context("Failed to delete hreflang map")?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn clear_maps(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM hreflang_maps")
                .execute(&self.pool)
                .await
                .context("Failed to clear hreflang maps")?;
            Ok(result.rows_affected())
        })
    }

    fn get_option<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move {
            let value: Option<Value> =
                sqlx::query_scalar("SELECT value FROM hreflang_options WHERE name = $1")
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await
                    .with_context(|| format!("Failed to load option '{}'", name))?;
            Ok(value)
        })
    }

    fn put_option<'a>(&'a self, name: &'a str, value: Value) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO hreflang_options (name, value, updated_at)
                 VALUES ($1, $2, NOW())
                 ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()",
            )
            .bind(name)
            .bind(value)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to save option '{}'", name))?;
            Ok(())
        })
    }

    fn delete_option<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM hreflang_options WHERE name = $1")
                .bind(name)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to delete option '{}'", name))?;
            Ok(())
        })
    }
}
