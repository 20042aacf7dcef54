//! Network-wide locale settings and the archive page registry.

use crate::error::{ApiError, ApiResult};
use crate::locale::{self, LocaleFormat, LocaleResolver};
use crate::network::{ContentHost, SiteId};
use crate::security;
use crate::store::{self, Store};
use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

/// Locale key -> sites sharing it (first claimant first).
pub type DuplicateLocales = BTreeMap<String, Vec<SiteId>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Per-site locale overrides, stored in key form
    #[serde(default)]
    pub locales: BTreeMap<SiteId, String>,
    /// Content types offered for hreflang relations
    #[serde(default = "default_post_types")]
    pub post_types: Vec<String>,
    /// Emit no tags on URLs carrying a query string
    #[serde(default)]
    pub ignore_query_params: bool,
}

fn default_post_types() -> Vec<String> {
    vec!["post".to_string(), "page".to_string()]
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            locales: BTreeMap::new(),
            post_types: default_post_types(),
            ignore_query_params: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivePage {
    pub id: String,
    pub name: String,
}

/// Form fields arrive either as numbers or as (possibly empty) strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FormValue {
    Number(i64),
    Text(String),
}

#[derive(Debug, Default, Deserialize)]
pub struct LocaleRows {
    #[serde(default)]
    pub site_id: Vec<FormValue>,
    #[serde(default)]
    pub locale: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ArchiveRows {
    #[serde(default)]
    pub name: Vec<String>,
    #[serde(default)]
    pub id: Vec<String>,
}

/// Settings document posted by the admin screen.
#[derive(Debug, Default, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub locales: LocaleRows,
    #[serde(default)]
    pub post_types: Vec<String>,
    #[serde(default)]
    pub archive_pages: ArchiveRows,
    #[serde(default)]
    pub ignore_query_params: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettingsOverview {
    pub settings: NetworkSettings,
    pub archive_pages: Vec<ArchivePage>,
    pub duplicate_locales: DuplicateLocales,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedSettings {
    pub settings: NetworkSettings,
    pub archive_pages: Vec<ArchivePage>,
    pub duplicate_locales: DuplicateLocales,
    /// Locale overrides changed; stored maps use the old keys until rebuilt
    pub rebuild_recommended: bool,
}

fn locale_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z]{2,3}([_-][A-Za-z0-9]{2,8})*$").expect("valid locale regex")
    })
}

fn post_type_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid post type regex"))
}

/// Lowercase slug of a title ("News & Press" -> "news-press").
pub fn sanitize_title(title: &str) -> String {
    static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
    let pattern = NON_ALNUM.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("valid slug regex"));
    pattern
        .replace_all(&title.trim().to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

#[derive(Clone)]
pub struct SettingsService {
    store: Arc<dyn Store>,
    host: Arc<dyn ContentHost>,
    locales: LocaleResolver,
    nonce: String,
}

impl SettingsService {
    pub fn new(
        store: Arc<dyn Store>,
        host: Arc<dyn ContentHost>,
        locales: LocaleResolver,
        nonce: String,
    ) -> Self {
        Self {
            store,
            host,
            locales,
            nonce,
        }
    }

    pub async fn archive_pages(&self) -> Result<Vec<ArchivePage>> {
        Ok(store::load_option(self.store.as_ref(), store::ARCHIVE_PAGES)
            .await?
            .unwrap_or_default())
    }

    pub async fn duplicate_locales(&self) -> Result<DuplicateLocales> {
        Ok(store::load_option(self.store.as_ref(), store::DUPLICATE_LOCALES)
            .await?
            .unwrap_or_default())
    }

    pub async fn overview(&self) -> Result<SettingsOverview> {
        Ok(SettingsOverview {
            settings: self.locales.settings().await,
            archive_pages: self.archive_pages().await?,
            duplicate_locales: self.duplicate_locales().await?,
        })
    }

    /// Validate and persist a settings document.
    ///
    /// Nothing is written unless the nonce matches and every row is valid.
    pub async fn apply_update(&self, update: SettingsUpdate) -> ApiResult<AppliedSettings> {
        if !security::verify_token(&self.nonce, update.nonce.as_deref()) {
            return Err(ApiError::Forbidden("Invalid nonce".to_string()));
        }

        let locales = self.validate_locales(&update.locales)?;
        let post_types = validate_post_types(&update.post_types)?;
        let archive_pages = validate_archive_pages(&update.archive_pages)?;

        let previous = self.locales.settings().await;
        let settings = NetworkSettings {
            locales,
            post_types,
            ignore_query_params: update.ignore_query_params,
        };

        store::save_option(self.store.as_ref(), store::NETWORK_SETTINGS, &settings).await?;
        store::save_option(self.store.as_ref(), store::ARCHIVE_PAGES, &archive_pages).await?;

        let duplicate_locales = self.check_duplicate_locales().await?;
        let rebuild_recommended = previous.locales != settings.locales;

        info!(
            "Settings updated: {} locale overrides, {} post types, {} archive pages",
            settings.locales.len(),
            settings.post_types.len(),
            archive_pages.len()
        );

        Ok(AppliedSettings {
            settings,
            archive_pages,
            duplicate_locales,
            rebuild_recommended,
        })
    }

    fn validate_locales(&self, rows: &LocaleRows) -> ApiResult<BTreeMap<SiteId, String>> {
        let known: BTreeSet<SiteId> = self.host.sites().iter().map(|s| s.id).collect();
        let mut locales = BTreeMap::new();

        for (index, raw_site) in rows.site_id.iter().enumerate() {
            let site_id = match raw_site {
                FormValue::Number(id) => *id,
                FormValue::Text(text) if text.trim().is_empty() => continue,
                FormValue::Text(text) => text.trim().parse::<SiteId>().map_err(|_| {
                    ApiError::Validation(format!("Invalid site id '{}'", text))
                })?,
            };

            let Some(locale) = rows.locale.get(index).map(|l| l.trim()).filter(|l| !l.is_empty())
            else {
                continue;
            };

            if !known.contains(&site_id) {
                return Err(ApiError::Validation(format!("Unknown site {}", site_id)));
            }
            if !locale_pattern().is_match(locale) {
                return Err(ApiError::Validation(format!("Invalid locale '{}'", locale)));
            }

            locales.insert(site_id, locale::format_key(locale));
        }

        Ok(locales)
    }

    /// Record every locale key claimed by more than one site.
    ///
    /// The stored table is removed entirely once no duplicates remain.
    pub async fn check_duplicate_locales(&self) -> Result<DuplicateLocales> {
        let settings = self.locales.settings().await;
        let mut sites = self.host.sites();
        sites.sort_by_key(|s| s.id);

        let mut claimed: BTreeMap<String, Vec<SiteId>> = BTreeMap::new();
        for site in &sites {
            let key = self.locales.resolve_with(&settings, site.id, LocaleFormat::Key);
            claimed.entry(key).or_default().push(site.id);
        }

        let duplicates: DuplicateLocales = claimed
            .into_iter()
            .filter(|(_, site_ids)| site_ids.len() > 1)
            .collect();

        if duplicates.is_empty() {
            self.store.delete_option(store::DUPLICATE_LOCALES).await?;
        } else {
            for (locale, site_ids) in &duplicates {
                warn!("Locale {} is used by multiple sites: {:?}", locale, site_ids);
            }
            store::save_option(self.store.as_ref(), store::DUPLICATE_LOCALES, &duplicates).await?;
        }

        Ok(duplicates)
    }
}

fn validate_post_types(post_types: &[String]) -> ApiResult<Vec<String>> {
    let mut seen = BTreeSet::new();
    let mut result = Vec::new();

    for post_type in post_types.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        if !post_type_pattern().is_match(post_type) {
            return Err(ApiError::Validation(format!("Invalid post type '{}'", post_type)));
        }
        if seen.insert(post_type.to_string()) {
            result.push(post_type.to_string());
        }
    }

    Ok(result)
}

fn validate_archive_pages(rows: &ArchiveRows) -> ApiResult<Vec<ArchivePage>> {
    let mut pages: Vec<ArchivePage> = Vec::new();

    for (index, name) in rows.name.iter().enumerate() {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }

        let id = match rows.id.get(index).map(|id| id.trim()).filter(|id| !id.is_empty()) {
            Some(id) => sanitize_title(id),
            None => sanitize_title(name),
        };

        if id.is_empty() {
            return Err(ApiError::Validation(format!(
                "Archive page '{}' has no usable id",
                name
            )));
        }
        if pages.iter().any(|p| p.id == id) {
            return Err(ApiError::Validation(format!("Duplicate archive page id '{}'", id)));
        }

        pages.push(ArchivePage {
            id,
            name: name.to_string(),
        });
    }

    Ok(pages)
}
