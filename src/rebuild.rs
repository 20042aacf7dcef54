//! Resumable, batched rebuild of every hreflang map in the network.
//!
//! Progress is a persisted record, so each call runs to completion and the
//! driving client can stop calling at any point. Only one rebuild exists at
//! a time: starting a new one supersedes the previous record.

use crate::locale::{LocaleFormat, LocaleResolver};
use crate::map_store::{HreflangMap, MapStore};
use crate::network::{ContentHost, ItemId, SiteId};
use crate::permalink::PermalinkFetcher;
use crate::store::{self, Store};
use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

pub const DEFAULT_BATCH_SIZE: usize = 25;
pub const MIN_BATCH_SIZE: usize = 25;
pub const MAX_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildProgress {
    pub total_sites: usize,
    /// Satellite sites in processing order
    pub sites: Vec<SiteId>,
    pub current_site_index: usize,
    pub current_site_id: Option<SiteId>,
    /// Eligible items of the current site
    pub current_site_items: Vec<ItemId>,
    pub current_item_index: usize,
    pub total_items: usize,
    pub completed: bool,
    /// Unix timestamp (seconds)
    pub started_at: i64,
}

impl RebuildProgress {
    fn current_batch(&self, batch_size: usize) -> &[ItemId] {
        let start = self.current_item_index.min(self.current_site_items.len());
        let end = (start + batch_size).min(self.current_site_items.len());
        &self.current_site_items[start..end]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Processed {
        progress: RebuildProgress,
        /// Items whose locale entry was written in this batch
        updated: usize,
    },
    /// No rebuild has started, or the last one already completed
    Idle,
}

#[derive(Clone)]
pub struct Rebuilder {
    host: Arc<dyn ContentHost>,
    store: Arc<dyn Store>,
    fetcher: Arc<dyn PermalinkFetcher>,
    maps: MapStore,
    locales: LocaleResolver,
    batch_size: usize,
}

impl Rebuilder {
    pub fn new(
        host: Arc<dyn ContentHost>,
        store: Arc<dyn Store>,
        fetcher: Arc<dyn PermalinkFetcher>,
        maps: MapStore,
        locales: LocaleResolver,
        batch_size: usize,
    ) -> Self {
        Self {
            host,
            store,
            fetcher,
            maps,
            locales,
            batch_size: batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Clear every map and position the rebuild at the first eligible item.
    pub async fn start(&self) -> Result<RebuildProgress> {
        self.maps.clear_all().await?;

        let sites: Vec<SiteId> = self.host.satellite_sites().iter().map(|s| s.id).collect();
        let mut progress = RebuildProgress {
            total_sites: sites.len(),
            sites,
            current_site_index: 0,
            current_site_id: None,
            current_site_items: Vec::new(),
            current_item_index: 0,
            total_items: 0,
            completed: false,
            started_at: Utc::now().timestamp(),
        };

        self.enter_site(&mut progress, 0);
        self.save_progress(&progress).await?;

        info!(
            "Rebuild started: {} sites, first site {:?} with {} items",
            progress.total_sites, progress.current_site_id, progress.total_items
        );
        Ok(progress)
    }

    /// Process the next batch of the current site and advance.
    ///
    /// Progress is persisted before returning. Replaying a batch is harmless
    /// because every write is a keyed merge.
    pub async fn process_batch(&self) -> Result<BatchOutcome> {
        let Some(mut progress) = self.status().await? else {
            return Ok(BatchOutcome::Idle);
        };
        if progress.completed {
            return Ok(BatchOutcome::Idle);
        }

        let mut updated = 0;
        if let Some(site_id) = progress.current_site_id {
            let batch = progress.current_batch(self.batch_size).to_vec();
            updated = self.process_items(site_id, &batch).await;
            progress.current_item_index += batch.len();
        }

        if progress.current_item_index >= progress.current_site_items.len() {
            let next = progress.current_site_index + 1;
            self.enter_site(&mut progress, next);
        }

        self.save_progress(&progress).await?;

        if progress.completed {
            info!("Rebuild completed");
        }
        Ok(BatchOutcome::Processed { progress, updated })
    }

    /// Snapshot of the current rebuild, `None` if none was ever started.
    pub async fn status(&self) -> Result<Option<RebuildProgress>> {
        store::load_option(self.store.as_ref(), store::REBUILD_PROGRESS).await
    }

    /// Recompute one main-site item's map from every satellite site.
    ///
    /// Writes straight to the item's map and leaves the network-wide
    /// progress record alone.
    pub async fn rebuild_item(&self, main_item_id: ItemId) -> Result<HreflangMap> {
        let settings = self.locales.settings().await;
        let mut map = HreflangMap::new();

        for site in self.host.satellite_sites() {
            let related: Vec<ItemId> = self
                .host
                .related_items(site.id)
                .into_iter()
                .filter(|&id| {
                    self.host
                        .item(site.id, id)
                        .is_some_and(|item| item.relation == Some(main_item_id))
                })
                .collect();

            if related.is_empty() {
                continue;
            }

            let locale = self.locales.resolve_with(&settings, site.id, LocaleFormat::Key);
            let permalinks = self.fetcher.get_permalinks(site.id, related).await;
            for url in permalinks.into_values().flatten() {
                map.insert(locale.clone(), url);
            }
        }

        let map = self.maps.ensure_main_entries(map, main_item_id, true).await;
        if map.is_empty() {
            self.maps.delete(main_item_id).await?;
        } else {
            self.maps.put(main_item_id, map.clone()).await?;
        }

        info!("Rebuilt hreflang map for item {} ({} entries)", main_item_id, map.len());
        Ok(map)
    }

    /// Move to the first site at or after `index` that has eligible items,
    /// or mark the rebuild completed.
    fn enter_site(&self, progress: &mut RebuildProgress, mut index: usize) {
        while index < progress.sites.len() {
            let site_id = progress.sites[index];
            let items = self.host.related_items(site_id);
            if !items.is_empty() {
                progress.current_site_index = index;
                progress.current_site_id = Some(site_id);
                progress.total_items = items.len();
                progress.current_site_items = items;
                progress.current_item_index = 0;
                return;
            }
            debug!("Site {} has no eligible items, skipping", site_id);
            index += 1;
        }

        progress.current_site_index = progress.sites.len();
        progress.current_site_id = None;
        progress.current_site_items = Vec::new();
        progress.current_item_index = 0;
        progress.total_items = 0;
        progress.completed = true;
    }

    async fn process_items(&self, site_id: SiteId, batch: &[ItemId]) -> usize {
        let locale = self.locales.resolve(site_id, LocaleFormat::Key).await;
        let permalinks = self.fetcher.get_permalinks(site_id, batch.to_vec()).await;
        let mut updated = 0;

        for &item_id in batch {
            let Some(relation) = self
                .host
                .item(site_id, item_id)
                .filter(|item| item.status.is_published())
                .and_then(|item| item.relation)
            else {
                continue;
            };

            let Some(url) = permalinks.get(&item_id).cloned().flatten() else {
                continue;
            };

            match self.maps.set_locale(relation, &locale, &url).await {
                Ok(_) => updated += 1,
                Err(e) => error!(
                    "Failed to store {} for item {} (site {} item {}): {:#}",
                    locale, relation, site_id, item_id, e
                ),
            }
        }

        debug!(
            "Site {}: {} of {} items written",
            site_id,
            updated,
            batch.len()
        );
        updated
    }

    async fn save_progress(&self, progress: &RebuildProgress) -> Result<()> {
        store::save_option(self.store.as_ref(), store::REBUILD_PROGRESS, progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map_store::X_DEFAULT;
    use crate::network::StaticNetwork;
    use crate::permalink::PermalinkClient;
    use crate::store::MemoryStore;
    use futures::future::BoxFuture;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    // ==================== Helper Functions ====================

    /// Wraps a real fetcher and records every batched request
    struct RecordingFetcher {
        inner: PermalinkClient,
        requested: Mutex<Vec<(SiteId, ItemId)>>,
    }

    impl PermalinkFetcher for RecordingFetcher {
        fn get_permalink(&self, site_id: SiteId, item_id: ItemId) -> BoxFuture<'_, Option<String>> {
            self.inner.get_permalink(site_id, item_id)
        }

        fn get_permalinks(
            &self,
            site_id: SiteId,
            item_ids: Vec<ItemId>,
        ) -> BoxFuture<'_, BTreeMap<ItemId, Option<String>>> {
            self.requested
                .lock()
                .unwrap()
                .extend(item_ids.iter().map(|id| (site_id, *id)));
            self.inner.get_permalinks(site_id, item_ids)
        }
    }

    /// Site 2 has 60 related items, site 3 none, site 4 has 3
    fn network() -> StaticNetwork {
        let mut items = serde_json::Map::new();
        items.insert(
            "1".into(),
            serde_json::json!((1..=60)
                .map(|i| serde_json::json!({
                    "id": 1000 + i, "status": "publish",
                    "permalink": format!("https://example.com/p{}/", i)
                }))
                .collect::<Vec<_>>()),
        );
        items.insert(
            "2".into(),
            serde_json::json!((1..=60)
                .map(|i| serde_json::json!({
                    "id": i, "status": "publish",
                    "permalink": format!("https://example.de/p{}/", i),
                    "relation": 1000 + i
                }))
                .collect::<Vec<_>>()),
        );
        items.insert(
            "4".into(),
            serde_json::json!([
                {"id": 1, "status": "publish", "permalink": "https://example.fr/p1/", "relation": 1001},
                {"id": 2, "status": "publish", "permalink": "https://example.fr/p2/", "relation": 1002},
                {"id": 3, "status": "draft", "permalink": "https://example.fr/?p=3", "relation": 1003},
                {"id": 4, "status": "publish", "permalink": "https://example.fr/p4/", "relation": 1004}
            ]),
        );

        let json = serde_json::json!({
            "main_site_id": 1,
            "sites": [
                {"id": 1, "base_url": "https://example.com", "locale": "en_US"},
                {"id": 2, "base_url": "https://example.de", "locale": "de_DE"},
                {"id": 3, "base_url": "https://example.it", "locale": "it_IT"},
                {"id": 4, "base_url": "https://example.fr", "locale": "fr_FR"}
            ],
            "items": items
        });
        StaticNetwork::from_json(&json.to_string()).expect("network")
    }

    fn create_rebuilder(
        host: Arc<StaticNetwork>,
    ) -> (Rebuilder, Arc<RecordingFetcher>, Arc<MemoryStore>) {
        let host_dyn: Arc<dyn ContentHost> = host;
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(RecordingFetcher {
            inner: PermalinkClient::new(host_dyn.clone(), Duration::from_secs(10)).unwrap(),
            requested: Mutex::new(Vec::new()),
        });
        let locales = LocaleResolver::new(host_dyn.clone(), store.clone(), "en_US".to_string());
        let maps = MapStore::new(store.clone(), fetcher.clone(), host_dyn.clone(), locales.clone());
        let rebuilder = Rebuilder::new(host_dyn, store.clone(), fetcher.clone(), maps, locales, 25);
        (rebuilder, fetcher, store)
    }

    async fn run_to_completion(rebuilder: &Rebuilder) -> Vec<RebuildProgress> {
        let mut snapshots = Vec::new();
        for _ in 0..100 {
            match rebuilder.process_batch().await.expect("batch") {
                BatchOutcome::Processed { progress, .. } => {
                    let done = progress.completed;
                    snapshots.push(progress);
                    if done {
                        return snapshots;
                    }
                }
                BatchOutcome::Idle => panic!("Rebuild went idle before completing"),
            }
        }
        panic!("Rebuild did not complete");
    }

    // ==================== start Tests ====================

    #[tokio::test]
    async fn test_start_initializes_progress() {
        let (rebuilder, _, _) = create_rebuilder(Arc::new(network()));

        let progress = rebuilder.start().await.expect("start");

        assert_eq!(progress.sites, vec![2, 3, 4]);
        assert_eq!(progress.total_sites, 3);
        assert_eq!(progress.current_site_id, Some(2));
        assert_eq!(progress.total_items, 60);
        assert_eq!(progress.current_item_index, 0);
        assert!(!progress.completed);
        assert_eq!(rebuilder.status().await.unwrap(), Some(progress));
    }

    #[tokio::test]
    async fn test_start_clears_existing_maps() {
        let (rebuilder, _, store) = create_rebuilder(Arc::new(network()));
        store.put_map(999, HreflangMap::new()).await.unwrap();

        rebuilder.start().await.unwrap();
        assert_eq!(store.map_count().await, 0);
    }

    #[tokio::test]
    async fn test_start_without_satellites_completes_immediately() {
        let host = StaticNetwork::from_json(
            r#"{"main_site_id": 1, "sites": [{"id": 1, "base_url": "https://example.com"}]}"#,
        )
        .unwrap();
        let (rebuilder, _, _) = create_rebuilder(Arc::new(host));

        let progress = rebuilder.start().await.unwrap();
        assert!(progress.completed);
        assert_eq!(progress.total_sites, 0);
        assert_eq!(rebuilder.process_batch().await.unwrap(), BatchOutcome::Idle);
    }

    // ==================== process_batch Tests ====================

    #[tokio::test]
    async fn test_process_batch_without_rebuild_is_idle() {
        let (rebuilder, _, _) = create_rebuilder(Arc::new(network()));
        assert_eq!(rebuilder.process_batch().await.unwrap(), BatchOutcome::Idle);
        assert!(rebuilder.status().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rebuild_visits_every_item_exactly_once() {
        let (rebuilder, fetcher, _) = create_rebuilder(Arc::new(network()));
        rebuilder.start().await.unwrap();

        let snapshots = run_to_completion(&rebuilder).await;

        let mut requested = fetcher.requested.lock().unwrap().clone();
        let total = requested.len();
        requested.sort();
        requested.dedup();
        assert_eq!(total, requested.len(), "No item fetched twice");
        assert_eq!(total, 63, "60 items on site 2 and 3 on site 4");
        assert!(!requested.contains(&(4, 3)), "Drafts are not eligible");

        // Three batches for site 2, one for site 4
        assert_eq!(snapshots.len(), 4);
        assert!(snapshots[..3].iter().all(|p| !p.completed));
        assert!(snapshots[3].completed);
        assert_eq!(snapshots[2].current_site_id, Some(4), "Empty site 3 is skipped");
    }

    #[tokio::test]
    async fn test_rebuild_populates_maps() {
        let (rebuilder, _, store) = create_rebuilder(Arc::new(network()));
        rebuilder.start().await.unwrap();
        run_to_completion(&rebuilder).await;

        let map = store.get_map(1001).await.unwrap().expect("map for 1001");
        assert_eq!(map.get("de-de"), Some("https://example.de/p1/"));
        assert_eq!(map.get("fr-fr"), Some("https://example.fr/p1/"));
        assert_eq!(map.get("en-us"), Some("https://example.com/p1/"));
        assert_eq!(map.get(X_DEFAULT), Some("https://example.com/p1/"));
        assert_eq!(store.map_count().await, 60);
    }

    #[tokio::test]
    async fn test_process_after_completion_does_not_mutate_progress() {
        let (rebuilder, _, _) = create_rebuilder(Arc::new(network()));
        rebuilder.start().await.unwrap();
        run_to_completion(&rebuilder).await;
        let before = rebuilder.status().await.unwrap();

        assert_eq!(rebuilder.process_batch().await.unwrap(), BatchOutcome::Idle);
        assert_eq!(rebuilder.status().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_item_unpublished_mid_rebuild_is_skipped() {
        let host = Arc::new(network());
        let (rebuilder, _, store) = create_rebuilder(host.clone());
        rebuilder.start().await.unwrap();

        let mut item = host.item(2, 1).unwrap();
        item.status = crate::network::PostStatus::Trash;
        host.upsert_item(2, item).unwrap();

        run_to_completion(&rebuilder).await;
        let map = store.get_map(1001).await.unwrap().unwrap();
        assert!(!map.contains("de-de"));
        assert!(map.contains("fr-fr"));
    }

    #[tokio::test]
    async fn test_batch_size_is_clamped() {
        let (_, fetcher, store) = create_rebuilder(Arc::new(network()));
        let host: Arc<dyn ContentHost> = Arc::new(network());
        let locales = LocaleResolver::new(host.clone(), store.clone(), "en_US".to_string());
        let maps = MapStore::new(store.clone(), fetcher.clone(), host.clone(), locales.clone());

        let small = Rebuilder::new(host.clone(), store.clone(), fetcher.clone(), maps.clone(), locales.clone(), 1);
        let large = Rebuilder::new(host, store, fetcher, maps, locales, 1000);
        assert_eq!(small.batch_size(), MIN_BATCH_SIZE);
        assert_eq!(large.batch_size(), MAX_BATCH_SIZE);
    }

    // ==================== rebuild_item Tests ====================

    #[tokio::test]
    async fn test_rebuild_item_collects_all_sites() {
        let (rebuilder, _, store) = create_rebuilder(Arc::new(network()));

        let map = rebuilder.rebuild_item(1002).await.expect("rebuild item");

        assert_eq!(map.get("de-de"), Some("https://example.de/p2/"));
        assert_eq!(map.get("fr-fr"), Some("https://example.fr/p2/"));
        assert_eq!(map.get(X_DEFAULT), Some("https://example.com/p2/"));
        assert_eq!(store.get_map(1002).await.unwrap(), Some(map));
        assert!(rebuilder.status().await.unwrap().is_none(), "Progress untouched");
    }

    #[tokio::test]
    async fn test_rebuild_item_replaces_stale_entries() {
        let (rebuilder, _, store) = create_rebuilder(Arc::new(network()));
        let mut stale = HreflangMap::new();
        stale.insert("es-es", "https://example.es/old/");
        store.put_map(1003, stale).await.unwrap();

        let map = rebuilder.rebuild_item(1003).await.unwrap();
        assert!(!map.contains("es-es"));
        assert!(!map.contains("fr-fr"), "Draft item on site 4 is not related");
        assert!(map.contains("de-de"));
    }
}
