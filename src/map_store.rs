//! Per-item hreflang maps owned by the main site.
//!
//! Every populated map carries the main site's own entries (its locale key,
//! the language-only alias when no other site claims it, and `x-default`)
//! as long as the main item resolves to a published URL.

use crate::locale::{self, LocaleFormat, LocaleResolver};
use crate::network::{ContentHost, ItemId};
use crate::permalink::PermalinkFetcher;
use crate::store::Store;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const X_DEFAULT: &str = "x-default";

/// Locale key -> absolute URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HreflangMap(BTreeMap<String, String>);

impl HreflangMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, locale: &str) -> Option<&str> {
        self.0.get(locale).map(String::as_str)
    }

    pub fn contains(&self, locale: &str) -> bool {
        self.0.contains_key(locale)
    }

    /// Returns the previous URL for the locale, if any.
    pub fn insert(&mut self, locale: impl Into<String>, url: impl Into<String>) -> Option<String> {
        self.0.insert(locale.into(), url.into())
    }

    pub fn remove(&mut self, locale: &str) -> Option<String> {
        self.0.remove(locale)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for HreflangMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Clone)]
pub struct MapStore {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn PermalinkFetcher>,
    host: Arc<dyn ContentHost>,
    locales: LocaleResolver,
}

impl MapStore {
    pub fn new(
        store: Arc<dyn Store>,
        fetcher: Arc<dyn PermalinkFetcher>,
        host: Arc<dyn ContentHost>,
        locales: LocaleResolver,
    ) -> Self {
        Self {
            store,
            fetcher,
            host,
            locales,
        }
    }

    /// Stored map for a main-site item, empty when none exists.
    pub async fn get(&self, item_id: ItemId) -> Result<HreflangMap> {
        Ok(self.store.get_map(item_id).await?.unwrap_or_default())
    }

    /// Merge one entry (last write wins) and fill in missing main-site entries.
    pub async fn set_locale(&self, item_id: ItemId, locale_key: &str, url: &str) -> Result<HreflangMap> {
        let mut map = self.get(item_id).await?;
        map.insert(locale_key, url);

        let map = self.ensure_main_entries(map, item_id, false).await;
        self.store.put_map(item_id, map.clone()).await?;

        debug!("Set {} for item {} -> {}", locale_key, item_id, url);
        Ok(map)
    }

    /// Drop one entry. Missing maps or keys are a successful no-op.
    pub async fn remove_locale(&self, item_id: ItemId, locale_key: &str) -> Result<bool> {
        let Some(mut map) = self.store.get_map(item_id).await? else {
            return Ok(false);
        };

        if map.remove(locale_key).is_none() {
            return Ok(false);
        }

        if map.is_empty() {
            self.store.delete_map(item_id).await?;
        } else {
            self.store.put_map(item_id, map).await?;
        }

        debug!("Removed {} from item {}", locale_key, item_id);
        Ok(true)
    }

    /// Guarantee the main site's locale, its language alias and `x-default`.
    ///
    /// The main item's URL is only fetched when one of the entries is missing
    /// or `force_refresh` is set. A failed fetch leaves the map as it was.
    pub async fn ensure_main_entries(
        &self,
        mut map: HreflangMap,
        item_id: ItemId,
        force_refresh: bool,
    ) -> HreflangMap {
        let settings = self.locales.settings().await;
        let main_site_id = self.host.main_site_id();
        let main_locale = self
            .locales
            .resolve_with(&settings, main_site_id, LocaleFormat::Key);

        let missing = !map.contains(&main_locale) || !map.contains(X_DEFAULT);
        if !missing && !force_refresh {
            return map;
        }

        let Some(url) = self.fetcher.get_permalink(main_site_id, item_id).await else {
            warn!(
                "Could not resolve main site URL for item {}; main entries left unchanged",
                item_id
            );
            return map;
        };

        if let Some(prefix) = locale::language_prefix(&main_locale) {
            let claimed = self
                .host
                .satellite_sites()
                .iter()
                .any(|site| self.locales.resolve_with(&settings, site.id, LocaleFormat::Key) == prefix);
            if !claimed {
                map.insert(prefix, url.clone());
            }
        }

        map.insert(main_locale, url.clone());
        map.insert(X_DEFAULT, url);
        map
    }

    /// Remove the whole map of one main-site item.
    pub async fn delete(&self, item_id: ItemId) -> Result<bool> {
        let existed = self.store.delete_map(item_id).await?;
        if existed {
            info!("Deleted hreflang map for item {}", item_id);
        }
        Ok(existed)
    }

    pub async fn clear_all(&self) -> Result<u64> {
        let removed = self.store.clear_maps().await?;
        info!("Cleared {} hreflang maps", removed);
        Ok(removed)
    }

    pub async fn put(&self, item_id: ItemId, map: HreflangMap) -> Result<()> {
        self.store.put_map(item_id, map).await
    }
}
