//! Hreflang mapping for archive (listing) pages.
//!
//! Each site maps its own relative paths to network-wide archive ids. The
//! network map joins sites on their locale key:
//! `archive_id -> locale_key -> absolute URL`.
//!
//! Lookups are exact string matches. Paths written with wildcard segments
//! (`news/page/*`) are stored verbatim and never match a request.

use crate::error::{ApiError, ApiResult};
use crate::locale::{LocaleFormat, LocaleResolver};
use crate::map_store::{HreflangMap, X_DEFAULT};
use crate::network::{ContentHost, SiteId};
use crate::settings::ArchivePage;
use crate::store::{self, Store};
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// `path -> archive_id` for one site.
pub type PathLookup = BTreeMap<String, String>;

/// `archive_id -> locale_key -> URL` across the network.
pub type NetworkArchiveMap = BTreeMap<String, BTreeMap<String, String>>;

/// Normalize a configured path to `/segment/.../`; `None` for blank input.
pub fn normalize_path(path: &str) -> Option<String> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }

    let inner = path.trim_matches('/');
    if inner.is_empty() {
        return Some("/".to_string());
    }
    Some(format!("/{}/", inner))
}

/// Request path relative to the site, with a single leading slash.
pub fn relative_request_path(request_path: &str, site_prefix: &str) -> String {
    let path = request_path
        .split(['?', '#'])
        .next()
        .unwrap_or_default();

    let relative = match path.strip_prefix(site_prefix) {
        Some(rest) if site_prefix != "/" => rest,
        _ => path,
    };
    format!("/{}", relative.trim_start_matches('/'))
}

#[derive(Clone)]
pub struct ArchiveStore {
    store: Arc<dyn Store>,
    host: Arc<dyn ContentHost>,
    locales: LocaleResolver,
}

impl ArchiveStore {
    pub fn new(store: Arc<dyn Store>, host: Arc<dyn ContentHost>, locales: LocaleResolver) -> Self {
        Self {
            store,
            host,
            locales,
        }
    }

    /// Replace a site's archive paths and refresh its network map entries.
    ///
    /// `paths` is `archive_id -> relative path`; blank paths unset the archive.
    pub async fn save_site_paths(
        &self,
        site_id: SiteId,
        paths: &BTreeMap<String, String>,
    ) -> ApiResult<BTreeMap<String, String>> {
        let site = self
            .host
            .site(site_id)
            .ok_or_else(|| ApiError::NotFound(format!("Unknown site {}", site_id)))?;

        let registry: Vec<ArchivePage> = store::load_option(self.store.as_ref(), store::ARCHIVE_PAGES)
            .await?
            .unwrap_or_default();

        let mut normalized = BTreeMap::new();
        for (archive_id, path) in paths {
            if !registry.iter().any(|page| &page.id == archive_id) {
                return Err(ApiError::Validation(format!(
                    "Unknown archive page '{}'",
                    archive_id
                )));
            }
            if let Some(path) = normalize_path(path) {
                normalized.insert(archive_id.clone(), path);
            }
        }

        let lookup: PathLookup = normalized
            .iter()
            .map(|(archive_id, path)| (path.clone(), archive_id.clone()))
            .collect();
        store::save_option(self.store.as_ref(), &store::site_archive_paths(site_id), &lookup).await?;

        let locale = self.locales.resolve(site_id, LocaleFormat::Key).await;
        let mut network_map = self.network_map().await?;

        // Stale entries are keyed by locale, the join key across sites
        for locales in network_map.values_mut() {
            locales.remove(&locale);
        }
        for (archive_id, path) in &normalized {
            network_map
                .entry(archive_id.clone())
                .or_default()
                .insert(locale.clone(), site.url_for(path));
        }
        network_map.retain(|_, locales| !locales.is_empty());

        store::save_option(self.store.as_ref(), store::NETWORK_ARCHIVE_MAP, &network_map).await?;

        info!(
            "Saved {} archive paths for site {} ({})",
            normalized.len(),
            site_id,
            locale
        );
        Ok(normalized)
    }

    /// `archive_id -> path` for one site.
    pub async fn site_paths(&self, site_id: SiteId) -> Result<BTreeMap<String, String>> {
        let lookup = self.path_lookup(site_id).await?;
        Ok(lookup
            .into_iter()
            .map(|(path, archive_id)| (archive_id, path))
            .collect())
    }

    async fn path_lookup(&self, site_id: SiteId) -> Result<PathLookup> {
        Ok(
            store::load_option(self.store.as_ref(), &store::site_archive_paths(site_id))
                .await?
                .unwrap_or_default(),
        )
    }

    pub async fn network_map(&self) -> Result<NetworkArchiveMap> {
        Ok(store::load_option(self.store.as_ref(), store::NETWORK_ARCHIVE_MAP)
            .await?
            .unwrap_or_default())
    }

    /// Archive id configured for a site-relative path (exact match).
    pub async fn lookup(&self, site_id: SiteId, path: &str) -> Result<Option<String>> {
        let lookup = self.path_lookup(site_id).await?;
        Ok(lookup.get(path).cloned())
    }

    /// Locale map of an archive with the main site's entry promoted to `x-default`.
    pub async fn get_locale_map(&self, archive_id: &str) -> Result<HreflangMap> {
        let network_map = self.network_map().await?;
        let Some(locales) = network_map.get(archive_id) else {
            return Ok(HreflangMap::new());
        };

        let main_locale = self
            .locales
            .resolve(self.host.main_site_id(), LocaleFormat::Key)
            .await;

        let mut map: HreflangMap = locales.clone().into_iter().collect();
        if let Some(url) = locales.get(&main_locale) {
            map.insert(X_DEFAULT, url.clone());
        }
        Ok(map)
    }
}
