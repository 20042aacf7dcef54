//! Reactions to content lifecycle events delivered by the host.
//!
//! Satellite events add or remove the site's own locale entry in the map of
//! the related main-site item. Main-site events refresh or drop the item's
//! map. Events are handled in delivery order with no coalescing.

use crate::locale::{LocaleFormat, LocaleResolver};
use crate::map_store::MapStore;
use crate::network::{ContentHost, ItemId, PostStatus, SiteId};
use crate::permalink::PermalinkFetcher;
use crate::rebuild::Rebuilder;
use crate::settings::SettingsService;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Permalink-relevant state of a main-site item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemState {
    pub status: PostStatus,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub post_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentEvent {
    RelationCreated {
        item_id: ItemId,
        relation: ItemId,
    },
    RelationChanged {
        item_id: ItemId,
        previous: ItemId,
        relation: ItemId,
    },
    RelationRemoved {
        item_id: ItemId,
        previous: ItemId,
    },
    /// Transition into the published state
    Published {
        item_id: ItemId,
        relation: Option<ItemId>,
    },
    Unpublished {
        item_id: ItemId,
        relation: Option<ItemId>,
    },
    Trashed {
        item_id: ItemId,
        relation: Option<ItemId>,
    },
    /// Sent before the host deletes the item
    Deleting {
        item_id: ItemId,
        relation: Option<ItemId>,
    },
    /// Any save, whatever changed
    Saved {
        item_id: ItemId,
        status: PostStatus,
        relation: Option<ItemId>,
    },
    MainItemUpdated {
        item_id: ItemId,
        before: ItemState,
        after: ItemState,
    },
    MainItemDeleting {
        item_id: ItemId,
    },
    SiteLocaleChanged,
}

impl ContentEvent {
    fn is_main_site_event(&self) -> bool {
        matches!(
            self,
            ContentEvent::MainItemUpdated { .. } | ContentEvent::MainItemDeleting { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Own locale entry written into the map of `item_id`
    Updated { item_id: ItemId, locale: String },
    /// Own locale entry dropped from the map of `item_id`
    Removed { item_id: ItemId, locale: String, existed: bool },
    /// Whole map of a main-site item dropped
    Deleted { item_id: ItemId, existed: bool },
    /// Map recomputed from every satellite site
    Rebuilt { item_id: ItemId, entries: usize },
    /// Main entries of an existing map refreshed
    Refreshed { item_id: ItemId, entries: usize },
    DuplicatesChecked { duplicates: usize },
    Skipped { reason: String },
}

fn skipped(reason: impl Into<String>) -> SyncOutcome {
    SyncOutcome::Skipped {
        reason: reason.into(),
    }
}

#[derive(Clone)]
pub struct Synchronizer {
    host: Arc<dyn ContentHost>,
    fetcher: Arc<dyn PermalinkFetcher>,
    maps: MapStore,
    locales: LocaleResolver,
    rebuilder: Rebuilder,
    settings: SettingsService,
}

impl Synchronizer {
    pub fn new(
        host: Arc<dyn ContentHost>,
        fetcher: Arc<dyn PermalinkFetcher>,
        maps: MapStore,
        locales: LocaleResolver,
        rebuilder: Rebuilder,
        settings: SettingsService,
    ) -> Self {
        Self {
            host,
            fetcher,
            maps,
            locales,
            rebuilder,
            settings,
        }
    }

    pub async fn handle(&self, site_id: SiteId, event: ContentEvent) -> Result<SyncOutcome> {
        if self.host.site(site_id).is_none() {
            anyhow::bail!("Unknown site {}", site_id);
        }

        let is_main = self.host.is_main_site(site_id);
        let network_wide = matches!(event, ContentEvent::SiteLocaleChanged);
        if !network_wide && is_main != event.is_main_site_event() {
            debug!("Ignoring {:?} on site {}", event, site_id);
            return Ok(skipped(if is_main {
                "satellite event on main site"
            } else {
                "main site event on satellite site"
            }));
        }

        let outcome = match event {
            ContentEvent::RelationCreated { item_id, relation } => {
                self.link(site_id, item_id, relation).await?
            }
            ContentEvent::RelationChanged {
                item_id,
                previous,
                relation,
            } => {
                self.unlink(site_id, previous).await?;
                self.link(site_id, item_id, relation).await?
            }
            ContentEvent::RelationRemoved { previous, .. } => self.unlink(site_id, previous).await?,
            ContentEvent::Published { item_id, relation } => match relation {
                Some(relation) => self.link(site_id, item_id, relation).await?,
                None => skipped("item has no relation"),
            },
            ContentEvent::Unpublished { relation, .. }
            | ContentEvent::Trashed { relation, .. }
            | ContentEvent::Deleting { relation, .. } => match relation {
                Some(relation) => self.unlink(site_id, relation).await?,
                None => skipped("item has no relation"),
            },
            ContentEvent::Saved {
                item_id,
                status,
                relation,
            } => match relation {
                Some(relation) if status.is_published() => {
                    self.link(site_id, item_id, relation).await?
                }
                Some(relation) => self.unlink(site_id, relation).await?,
                None => skipped("item has no relation"),
            },
            ContentEvent::MainItemUpdated {
                item_id,
                before,
                after,
            } => self.main_item_updated(item_id, &before, &after).await?,
            ContentEvent::MainItemDeleting { item_id } => SyncOutcome::Deleted {
                item_id,
                existed: self.maps.delete(item_id).await?,
            },
            ContentEvent::SiteLocaleChanged => SyncOutcome::DuplicatesChecked {
                duplicates: self.settings.check_duplicate_locales().await?.len(),
            },
        };

        Ok(outcome)
    }

    /// Write the item's own permalink under the site locale in the related map.
    async fn link(&self, site_id: SiteId, item_id: ItemId, relation: ItemId) -> Result<SyncOutcome> {
        let Some(url) = self.fetcher.get_permalink(site_id, item_id).await else {
            return Ok(skipped(format!(
                "item {} on site {} has no public permalink",
                item_id, site_id
            )));
        };

        let locale = self.locales.resolve(site_id, LocaleFormat::Key).await;
        self.maps.set_locale(relation, &locale, &url).await?;

        info!(
            "✓ Linked site {} item {} into map {} as {}",
            site_id, item_id, relation, locale
        );
        Ok(SyncOutcome::Updated {
            item_id: relation,
            locale,
        })
    }

    async fn unlink(&self, site_id: SiteId, relation: ItemId) -> Result<SyncOutcome> {
        let locale = self.locales.resolve(site_id, LocaleFormat::Key).await;
        let existed = self.maps.remove_locale(relation, &locale).await?;

        if existed {
            info!("✓ Removed {} from map {} (site {})", locale, relation, site_id);
        }
        Ok(SyncOutcome::Removed {
            item_id: relation,
            locale,
            existed,
        })
    }

    async fn main_item_updated(
        &self,
        item_id: ItemId,
        before: &ItemState,
        after: &ItemState,
    ) -> Result<SyncOutcome> {
        if !after.status.is_published() {
            return Ok(SyncOutcome::Deleted {
                item_id,
                existed: self.maps.delete(item_id).await?,
            });
        }

        let newly_published = !before.status.is_published();
        let permalink_changed = before.slug != after.slug || before.post_type != after.post_type;
        if !newly_published && !permalink_changed {
            return Ok(skipped("permalink unchanged"));
        }

        let existing = self.maps.get(item_id).await?;
        if existing.is_empty() {
            let map = self.rebuilder.rebuild_item(item_id).await?;
            return Ok(SyncOutcome::Rebuilt {
                item_id,
                entries: map.len(),
            });
        }

        let map = self.maps.ensure_main_entries(existing, item_id, true).await;
        if map.is_empty() {
            warn!("Map for item {} ended up empty after refresh", item_id);
        }
        self.maps.put(item_id, map.clone()).await?;

        Ok(SyncOutcome::Refreshed {
            item_id,
            entries: map.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map_store::{HreflangMap, X_DEFAULT};
    use crate::network::StaticNetwork;
    use crate::permalink::PermalinkClient;
    use crate::store::{MemoryStore, Store};
    use std::time::Duration;

    // ==================== Helper Functions ====================

    fn network() -> StaticNetwork {
        StaticNetwork::from_json(
            r#"{
                "main_site_id": 1,
                "sites": [
                    {"id": 1, "base_url": "https://example.com", "locale": "en_US"},
                    {"id": 2, "base_url": "https://example.de", "locale": "de_DE"},
                    {"id": 3, "base_url": "https://example.fr", "locale": "fr_FR"}
                ],
                "items": {
                    "1": [
                        {"id": 100, "slug": "hello", "status": "publish", "permalink": "https://example.com/hello/"},
                        {"id": 101, "slug": "other", "status": "publish", "permalink": "https://example.com/other/"}
                    ],
                    "2": [
                        {"id": 10, "status": "publish", "permalink": "https://example.de/hallo/", "relation": 100},
                        {"id": 11, "status": "draft", "permalink": "https://example.de/?p=11", "relation": 100}
                    ],
                    "3": [
                        {"id": 20, "status": "publish", "permalink": "https://example.fr/bonjour/", "relation": 100}
                    ]
                }
            }"#,
        )
        .expect("network")
    }

    fn create_synchronizer() -> (Synchronizer, Arc<StaticNetwork>, Arc<MemoryStore>) {
        let network = Arc::new(network());
        let host: Arc<dyn ContentHost> = network.clone();
        let store = Arc::new(MemoryStore::new());
        let fetcher: Arc<dyn PermalinkFetcher> =
            Arc::new(PermalinkClient::new(host.clone(), Duration::from_secs(10)).expect("client"));
        let locales = LocaleResolver::new(host.clone(), store.clone(), "en_US".to_string());
        let maps = MapStore::new(store.clone(), fetcher.clone(), host.clone(), locales.clone());
        let rebuilder = Rebuilder::new(
            host.clone(),
            store.clone(),
            fetcher.clone(),
            maps.clone(),
            locales.clone(),
            25,
        );
        let settings = SettingsService::new(store.clone(), host.clone(), locales.clone(), "n".to_string());
        let sync = Synchronizer::new(host, fetcher, maps, locales, rebuilder, settings);
        (sync, network, store)
    }

    fn state(status: PostStatus, slug: &str) -> ItemState {
        ItemState {
            status,
            slug: slug.to_string(),
            post_type: "post".to_string(),
        }
    }

    // ==================== Event Format Tests ====================

    #[test]
    fn test_event_deserializes_from_tagged_json() {
        let event: ContentEvent =
            serde_json::from_str(r#"{"type": "relation_changed", "item_id": 1, "previous": 2, "relation": 3}"#)
                .expect("Should parse");
        assert_eq!(
            event,
            ContentEvent::RelationChanged {
                item_id: 1,
                previous: 2,
                relation: 3
            }
        );

        let event: ContentEvent = serde_json::from_str(r#"{"type": "site_locale_changed"}"#).unwrap();
        assert_eq!(event, ContentEvent::SiteLocaleChanged);
    }

    // ==================== Satellite Event Tests ====================

    #[tokio::test]
    async fn test_relation_created_links_item() {
        let (sync, _, store) = create_synchronizer();

        let outcome = sync
            .handle(2, ContentEvent::RelationCreated { item_id: 10, relation: 100 })
            .await
            .expect("handle");

        assert_eq!(
            outcome,
            SyncOutcome::Updated { item_id: 100, locale: "de-de".to_string() }
        );
        let map = store.get_map(100).await.unwrap().unwrap();
        assert_eq!(map.get("de-de"), Some("https://example.de/hallo/"));
        assert_eq!(map.get(X_DEFAULT), Some("https://example.com/hello/"));
    }

    #[tokio::test]
    async fn test_relation_changed_moves_entry() {
        let (sync, _, store) = create_synchronizer();
        sync.handle(2, ContentEvent::RelationCreated { item_id: 10, relation: 100 })
            .await
            .unwrap();

        sync.handle(
            2,
            ContentEvent::RelationChanged { item_id: 10, previous: 100, relation: 101 },
        )
        .await
        .unwrap();

        assert!(!store.get_map(100).await.unwrap().unwrap().contains("de-de"));
        let moved = store.get_map(101).await.unwrap().unwrap();
        assert_eq!(moved.get("de-de"), Some("https://example.de/hallo/"));
    }

    #[tokio::test]
    async fn test_relation_removed_drops_entry() {
        let (sync, _, store) = create_synchronizer();
        sync.handle(2, ContentEvent::RelationCreated { item_id: 10, relation: 100 })
            .await
            .unwrap();

        let outcome = sync
            .handle(2, ContentEvent::RelationRemoved { item_id: 10, previous: 100 })
            .await
            .unwrap();

        assert!(matches!(outcome, SyncOutcome::Removed { existed: true, .. }));
        assert!(!store.get_map(100).await.unwrap().unwrap().contains("de-de"));
    }

    #[tokio::test]
    async fn test_unpublished_draft_cannot_link() {
        let (sync, _, store) = create_synchronizer();

        let outcome = sync
            .handle(2, ContentEvent::Published { item_id: 11, relation: Some(100) })
            .await
            .unwrap();

        assert!(matches!(outcome, SyncOutcome::Skipped { .. }));
        assert_eq!(store.map_count().await, 0);
    }

    #[tokio::test]
    async fn test_trashed_and_deleting_remove_entry() {
        let (sync, _, store) = create_synchronizer();
        sync.handle(2, ContentEvent::Published { item_id: 10, relation: Some(100) })
            .await
            .unwrap();
        sync.handle(3, ContentEvent::Published { item_id: 20, relation: Some(100) })
            .await
            .unwrap();

        sync.handle(2, ContentEvent::Trashed { item_id: 10, relation: Some(100) })
            .await
            .unwrap();
        sync.handle(3, ContentEvent::Deleting { item_id: 20, relation: Some(100) })
            .await
            .unwrap();

        let map = store.get_map(100).await.unwrap().unwrap();
        assert!(!map.contains("de-de"));
        assert!(!map.contains("fr-fr"));
        assert!(map.contains("en-us"));
    }

    #[tokio::test]
    async fn test_event_without_relation_is_skipped() {
        let (sync, _, _) = create_synchronizer();
        let outcome = sync
            .handle(2, ContentEvent::Unpublished { item_id: 10, relation: None })
            .await
            .unwrap();
        assert!(matches!(outcome, SyncOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn test_saved_follows_status() {
        let (sync, network, store) = create_synchronizer();
        sync.handle(
            2,
            ContentEvent::Saved { item_id: 10, status: PostStatus::Publish, relation: Some(100) },
        )
        .await
        .unwrap();
        assert!(store.get_map(100).await.unwrap().unwrap().contains("de-de"));

        let mut item = network.item(2, 10).unwrap();
        item.status = PostStatus::Draft;
        network.upsert_item(2, item).unwrap();
        sync.handle(
            2,
            ContentEvent::Saved { item_id: 10, status: PostStatus::Draft, relation: Some(100) },
        )
        .await
        .unwrap();
        assert!(!store.get_map(100).await.unwrap().unwrap().contains("de-de"));
    }

    #[tokio::test]
    async fn test_site_locale_override_used_for_entry() {
        let (sync, _, store) = create_synchronizer();
        let mut settings = crate::settings::NetworkSettings::default();
        settings.locales.insert(2, "de-at".to_string());
        crate::store::save_option(store.as_ref(), crate::store::NETWORK_SETTINGS, &settings)
            .await
            .unwrap();

        sync.handle(2, ContentEvent::RelationCreated { item_id: 10, relation: 100 })
            .await
            .unwrap();

        let map = store.get_map(100).await.unwrap().unwrap();
        assert!(map.contains("de-at"));
        assert!(!map.contains("de-de"));
    }

    // ==================== Main Site Event Tests ====================

    #[tokio::test]
    async fn test_main_item_unpublished_deletes_map() {
        let (sync, _, store) = create_synchronizer();
        sync.handle(2, ContentEvent::RelationCreated { item_id: 10, relation: 100 })
            .await
            .unwrap();

        let outcome = sync
            .handle(
                1,
                ContentEvent::MainItemUpdated {
                    item_id: 100,
                    before: state(PostStatus::Publish, "hello"),
                    after: state(PostStatus::Draft, "hello"),
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Deleted { item_id: 100, existed: true });
        assert!(store.get_map(100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_main_item_slug_change_refreshes_main_entries() {
        let (sync, network, store) = create_synchronizer();
        sync.handle(2, ContentEvent::RelationCreated { item_id: 10, relation: 100 })
            .await
            .unwrap();

        let mut item = network.item(1, 100).unwrap();
        item.slug = "hello-world".to_string();
        item.permalink = "https://example.com/hello-world/".to_string();
        network.upsert_item(1, item).unwrap();

        let outcome = sync
            .handle(
                1,
                ContentEvent::MainItemUpdated {
                    item_id: 100,
                    before: state(PostStatus::Publish, "hello"),
                    after: state(PostStatus::Publish, "hello-world"),
                },
            )
            .await
            .unwrap();

        assert!(matches!(outcome, SyncOutcome::Refreshed { item_id: 100, .. }));
        let map = store.get_map(100).await.unwrap().unwrap();
        assert_eq!(map.get(X_DEFAULT), Some("https://example.com/hello-world/"));
        assert_eq!(map.get("de-de"), Some("https://example.de/hallo/"));
    }

    #[tokio::test]
    async fn test_main_item_change_without_map_rebuilds_item() {
        let (sync, _, store) = create_synchronizer();

        let outcome = sync
            .handle(
                1,
                ContentEvent::MainItemUpdated {
                    item_id: 100,
                    before: state(PostStatus::Draft, "hello"),
                    after: state(PostStatus::Publish, "hello"),
                },
            )
            .await
            .unwrap();

        assert!(matches!(outcome, SyncOutcome::Rebuilt { item_id: 100, .. }));
        let map = store.get_map(100).await.unwrap().unwrap();
        assert!(map.contains("de-de"));
        assert!(map.contains("fr-fr"));
    }

    #[tokio::test]
    async fn test_main_item_unrelated_edit_is_skipped() {
        let (sync, _, store) = create_synchronizer();
        let mut existing = HreflangMap::new();
        existing.insert(X_DEFAULT, "https://example.com/hello/");
        store.put_map(100, existing.clone()).await.unwrap();

        let outcome = sync
            .handle(
                1,
                ContentEvent::MainItemUpdated {
                    item_id: 100,
                    before: state(PostStatus::Publish, "hello"),
                    after: state(PostStatus::Publish, "hello"),
                },
            )
            .await
            .unwrap();

        assert!(matches!(outcome, SyncOutcome::Skipped { .. }));
        assert_eq!(store.get_map(100).await.unwrap(), Some(existing));
    }

    #[tokio::test]
    async fn test_main_item_deleting_drops_map() {
        let (sync, _, store) = create_synchronizer();
        sync.handle(2, ContentEvent::RelationCreated { item_id: 10, relation: 100 })
            .await
            .unwrap();

        sync.handle(1, ContentEvent::MainItemDeleting { item_id: 100 })
            .await
            .unwrap();
        assert_eq!(store.map_count().await, 0);
    }

    #[tokio::test]
    async fn test_events_on_wrong_site_kind_are_skipped() {
        let (sync, _, store) = create_synchronizer();

        let on_main = sync
            .handle(1, ContentEvent::RelationCreated { item_id: 100, relation: 100 })
            .await
            .unwrap();
        let on_satellite = sync
            .handle(2, ContentEvent::MainItemDeleting { item_id: 100 })
            .await
            .unwrap();

        assert!(matches!(on_main, SyncOutcome::Skipped { .. }));
        assert!(matches!(on_satellite, SyncOutcome::Skipped { .. }));
        assert_eq!(store.map_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_site_fails() {
        let (sync, _, _) = create_synchronizer();
        assert!(sync.handle(9, ContentEvent::SiteLocaleChanged).await.is_err());
    }

    #[tokio::test]
    async fn test_site_locale_changed_checks_duplicates() {
        let (sync, _, store) = create_synchronizer();
        let mut settings = crate::settings::NetworkSettings::default();
        settings.locales.insert(3, "de_DE".to_string());
        crate::store::save_option(store.as_ref(), crate::store::NETWORK_SETTINGS, &settings)
            .await
            .unwrap();

        let outcome = sync.handle(3, ContentEvent::SiteLocaleChanged).await.unwrap();
        assert_eq!(outcome, SyncOutcome::DuplicatesChecked { duplicates: 1 });
    }
}
