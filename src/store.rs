//! Persistence boundary for every piece of engine state.
//!
//! Hreflang maps are stored per main-site item; everything else (settings,
//! archive tables, rebuild progress) is a named JSON option, mirroring a
//! host key-value settings table.

use crate::map_store::HreflangMap;
use crate::network::{ItemId, SiteId};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

pub const NETWORK_SETTINGS: &str = "network_settings";
pub const ARCHIVE_PAGES: &str = "archive_pages";
pub const NETWORK_ARCHIVE_MAP: &str = "network_archive_map";
pub const DUPLICATE_LOCALES: &str = "duplicate_locales";
pub const REBUILD_PROGRESS: &str = "rebuild_progress";

/// Option name of a site's `path -> archive_id` lookup table.
pub fn site_archive_paths(site_id: SiteId) -> String {
    format!("site_archive_paths:{}", site_id)
}

pub trait Store: Send + Sync {
    fn get_map(&self, item_id: ItemId) -> BoxFuture<'_, Result<Option<HreflangMap>>>;

    fn put_map(&self, item_id: ItemId, map: HreflangMap) -> BoxFuture<'_, Result<()>>;

    /// Returns whether a map existed.
    fn delete_map(&self, item_id: ItemId) -> BoxFuture<'_, Result<bool>>;

    /// Returns the number of maps removed.
    fn clear_maps(&self) -> BoxFuture<'_, Result<u64>>;

    fn get_option<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<Value>>>;

    fn put_option<'a>(&'a self, name: &'a str, value: Value) -> BoxFuture<'a, Result<()>>;

    fn delete_option<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Read a typed option, `None` when absent.
pub async fn load_option<T: DeserializeOwned>(store: &dyn Store, name: &str) -> Result<Option<T>> {
    match store.get_option(name).await? {
        Some(value) => {
            let parsed = serde_json::from_value(value)
                .with_context(|| format!("Malformed stored option '{}'", name))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

pub async fn save_option<T: Serialize>(store: &dyn Store, name: &str, value: &T) -> Result<()> {
    let value = serde_json::to_value(value)
        .with_context(|| format!("Failed to serialize option '{}'", name))?;
    store.put_option(name, value).await
}

#[derive(Default)]
struct MemoryState {
    maps: HashMap<ItemId, HreflangMap>,
    options: HashMap<String, Value>,
}

/// Process-local store used by tests and database-less deployments.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn map_count(&self) -> usize {
        self.state.lock().await.maps.len()
    }
}

impl Store for MemoryStore {
    fn get_map(&self, item_id: ItemId) -> BoxFuture<'_, Result<Option<HreflangMap>>> {
        Box::pin(async move { Ok(self.state.lock().await.maps.get(&item_id).cloned()) })
    }

    fn put_map(&self, item_id: ItemId, map: HreflangMap) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.state.lock().await.maps.insert(item_id, map);
            Ok(())
        })
    }

    fn delete_map(&self, item_id: ItemId) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move { Ok(self.state.lock().await.maps.remove(&item_id).is_some()) })
    }

    fn clear_maps(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let count = state.maps.len() as u64;
            state.maps.clear();
            Ok(count)
        })
    }

    fn get_option<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move { Ok(self.state.lock().await.options.get(name).cloned()) })
    }

    fn put_option<'a>(&'a self, name: &'a str, value: Value) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.state.lock().await.options.insert(name.to_string(), value);
            Ok(())
        })
    }

    fn delete_option<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.state.lock().await.options.remove(name);
            Ok(())
        })
    }
}
