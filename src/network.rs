//! Boundary to the host content runtime.
//!
//! Post storage, permalink generation and site membership belong to the host.
//! The engine only needs the read operations in [`ContentHost`]; the
//! [`StaticNetwork`] implementation loads a network description from JSON and
//! accepts item updates pushed through the event API.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

pub type SiteId = i64;
pub type ItemId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    #[serde(default)]
    pub name: String,
    pub base_url: String,
    /// Native locale as configured on the site itself (e.g. "fr_FR")
    #[serde(default)]
    pub locale: Option<String>,
    /// Path prefix of the site below its domain, used to strip request paths
    #[serde(default = "default_site_path")]
    pub path: String,
    /// Hosted independently: permalinks must be fetched over HTTP
    #[serde(default)]
    pub remote: bool,
    #[serde(default)]
    pub api_url: Option<String>,
}

fn default_site_path() -> String {
    "/".to_string()
}

impl Site {
    /// Base URL of the site's hreflang API.
    pub fn api_base(&self) -> String {
        match &self.api_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!(
                "{}/hreflang/v1/sites/{}",
                self.base_url.trim_end_matches('/'),
                self.id
            ),
        }
    }

    /// Absolute URL for a site-relative path.
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Publish,
    Draft,
    Pending,
    Private,
    Future,
    Trash,
}

impl PostStatus {
    pub fn is_published(self) -> bool {
        self == PostStatus::Publish
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ItemId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default = "default_post_type")]
    pub post_type: String,
    pub status: PostStatus,
    pub permalink: String,
    /// Id of the corresponding item on the main site
    #[serde(default)]
    pub relation: Option<ItemId>,
}

fn default_post_type() -> String {
    "post".to_string()
}

impl ContentItem {
    /// Public URL, only while the item is published.
    pub fn public_permalink(&self) -> Option<&str> {
        self.status.is_published().then_some(self.permalink.as_str())
    }
}

/// Read access to the host's sites and content.
pub trait ContentHost: Send + Sync {
    fn main_site_id(&self) -> SiteId;

    fn sites(&self) -> Vec<Site>;

    fn site(&self, site_id: SiteId) -> Option<Site> {
        self.sites().into_iter().find(|s| s.id == site_id)
    }

    fn item(&self, site_id: SiteId, item_id: ItemId) -> Option<ContentItem>;

    /// Published items of a site carrying a canonical relation, in id order.
    fn related_items(&self, site_id: SiteId) -> Vec<ItemId>;

    /// Published items whose title contains `query` (case-insensitive).
    fn search(&self, site_id: SiteId, query: &str, limit: usize) -> Vec<ContentItem>;

    fn is_main_site(&self, site_id: SiteId) -> bool {
        self.main_site_id() == site_id
    }

    /// All member sites except the main site, in id order.
    fn satellite_sites(&self) -> Vec<Site> {
        let main = self.main_site_id();
        let mut sites: Vec<Site> = self.sites().into_iter().filter(|s| s.id != main).collect();
        sites.sort_by_key(|s| s.id);
        sites
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub main_site_id: SiteId,
    pub sites: Vec<Site>,
    #[serde(default)]
    pub items: BTreeMap<SiteId, Vec<ContentItem>>,
}

/// In-process host backed by a JSON network description.
#[derive(Debug)]
pub struct StaticNetwork {
    main_site_id: SiteId,
    sites: Vec<Site>,
    items: RwLock<BTreeMap<SiteId, BTreeMap<ItemId, ContentItem>>>,
}

impl StaticNetwork {
    pub fn new(snapshot: NetworkSnapshot) -> Result<Self> {
        if !snapshot.sites.iter().any(|s| s.id == snapshot.main_site_id) {
            anyhow::bail!(
                "Main site {} is not listed among the network sites",
                snapshot.main_site_id
            );
        }

        let items = snapshot
            .items
            .into_iter()
            .map(|(site_id, items)| {
                let by_id = items.into_iter().map(|item| (item.id, item)).collect();
                (site_id, by_id)
            })
            .collect();

        Ok(Self {
            main_site_id: snapshot.main_site_id,
            sites: snapshot.sites,
            items: RwLock::new(items),
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: NetworkSnapshot =
            serde_json::from_str(json).context("Failed to parse network description")?;
        Self::new(snapshot)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read network file {}", path.display()))?;
        Self::from_json(&json)
    }

    /// Insert or replace an item on a site.
    pub fn upsert_item(&self, site_id: SiteId, item: ContentItem) -> Result<()> {
        if !self.sites.iter().any(|s| s.id == site_id) {
            anyhow::bail!("Unknown site {}", site_id);
        }
        let mut items = self
            .items
            .write()
            .map_err(|_| anyhow::anyhow!("network item lock poisoned"))?;
        items.entry(site_id).or_default().insert(item.id, item);
        Ok(())
    }

    pub fn remove_item(&self, site_id: SiteId, item_id: ItemId) -> Result<Option<ContentItem>> {
        let mut items = self
            .items
            .write()
            .map_err(|_| anyhow::anyhow!("network item lock poisoned"))?;
        Ok(items.get_mut(&site_id).and_then(|m| m.remove(&item_id)))
    }

    fn with_site_items<T>(
        &self,
        site_id: SiteId,
        f: impl FnOnce(&BTreeMap<ItemId, ContentItem>) -> T,
    ) -> Option<T> {
        // A poisoned lock only means a writer panicked mid-insert; the map is still usable
        let items = match self.items.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        items.get(&site_id).map(f)
    }
}

impl ContentHost for StaticNetwork {
    fn main_site_id(&self) -> SiteId {
        self.main_site_id
    }

    fn sites(&self) -> Vec<Site> {
        self.sites.clone()
    }

    fn item(&self, site_id: SiteId, item_id: ItemId) -> Option<ContentItem> {
        self.with_site_items(site_id, |items| items.get(&item_id).cloned())
            .flatten()
    }

    fn related_items(&self, site_id: SiteId) -> Vec<ItemId> {
        self.with_site_items(site_id, |items| {
            items
                .values()
                .filter(|item| item.status.is_published() && item.relation.is_some())
                .map(|item| item.id)
                .collect()
        })
        .unwrap_or_default()
    }

    fn search(&self, site_id: SiteId, query: &str, limit: usize) -> Vec<ContentItem> {
        let needle = query.to_lowercase();
        self.with_site_items(site_id, |items| {
            items
                .values()
                .filter(|item| item.status.is_published())
                .filter(|item| item.title.to_lowercase().contains(&needle))
                .take(limit)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
    }
}
