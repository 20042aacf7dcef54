//! Alternate-link emission for a page request.

use crate::archive::{self, ArchiveStore};
use crate::locale::{self, LocaleFormat, LocaleResolver};
use crate::map_store::{HreflangMap, MapStore};
use crate::network::{ContentHost, ItemId, SiteId};
use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternateLink {
    /// Pretty locale form (`en-US`) or `x-default`
    pub hreflang: String,
    pub href: String,
}

/// What the host knows about the page being rendered.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageRequest {
    /// Request path, may still carry the site prefix
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub query: Option<String>,
    /// Content item displayed on the page, if any
    #[serde(default)]
    pub item_id: Option<ItemId>,
}

pub fn links_from_map(map: &HreflangMap) -> Vec<AlternateLink> {
    map.iter()
        .map(|(locale_key, url)| AlternateLink {
            hreflang: locale::format_pretty(locale_key),
            href: url.to_string(),
        })
        .collect()
}

fn escape_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// `<link rel="alternate">` elements, one per line.
pub fn render_links(links: &[AlternateLink]) -> String {
    links
        .iter()
        .map(|link| {
            format!(
                r#"<link rel="alternate" href="{}" hreflang="{}" />"#,
                escape_attr(&link.href),
                escape_attr(&link.hreflang)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Replace the `lang` attribute of an `<html>` attribute string.
pub fn override_html_lang(attributes: &str, pretty_locale: &str) -> String {
    static LANG_ATTR: OnceLock<Regex> = OnceLock::new();
    let pattern = LANG_ATTR.get_or_init(|| Regex::new(r#"lang="[^"]*""#).expect("valid lang regex"));
    let replacement = format!(r#"lang="{}""#, escape_attr(pretty_locale));
    pattern
        .replace_all(attributes, regex::NoExpand(&replacement))
        .into_owned()
}

#[derive(Clone)]
pub struct TagEmitter {
    host: Arc<dyn ContentHost>,
    maps: MapStore,
    archives: ArchiveStore,
    locales: LocaleResolver,
}

impl TagEmitter {
    pub fn new(
        host: Arc<dyn ContentHost>,
        maps: MapStore,
        archives: ArchiveStore,
        locales: LocaleResolver,
    ) -> Self {
        Self {
            host,
            maps,
            archives,
            locales,
        }
    }

    /// Alternate links for a page on `site_id`.
    ///
    /// A configured archive path wins over the displayed item. Satellite
    /// items resolve through their relation to the main-site map.
    pub async fn alternate_links(&self, site_id: SiteId, request: &PageRequest) -> Result<Vec<AlternateLink>> {
        let settings = self.locales.settings().await;
        let has_query = request.query.as_deref().is_some_and(|q| !q.is_empty());
        if settings.ignore_query_params && has_query {
            debug!("Suppressing alternate links for query URL on site {}", site_id);
            return Ok(Vec::new());
        }

        if let Some(links) = self.archive_links(site_id, &request.path).await? {
            return Ok(links);
        }

        let Some(item_id) = request.item_id else {
            return Ok(Vec::new());
        };
        let main_item_id = if self.host.is_main_site(site_id) {
            Some(item_id)
        } else {
            self.host.item(site_id, item_id).and_then(|item| item.relation)
        };

        match main_item_id {
            Some(id) => Ok(links_from_map(&self.maps.get(id).await?)),
            None => Ok(Vec::new()),
        }
    }

    async fn archive_links(&self, site_id: SiteId, path: &str) -> Result<Option<Vec<AlternateLink>>> {
        let Some(site) = self.host.site(site_id) else {
            return Ok(None);
        };
        let relative = archive::relative_request_path(path, &site.path);
        let Some(archive_id) = self.archives.lookup(site_id, &relative).await? else {
            return Ok(None);
        };

        let map = self.archives.get_locale_map(&archive_id).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(links_from_map(&map)))
    }

    /// `<html>` attributes with the site's own pretty locale.
    pub async fn html_lang(&self, site_id: SiteId, attributes: &str) -> String {
        let locale = self.locales.resolve(site_id, LocaleFormat::Pretty).await;
        override_html_lang(attributes, &locale)
    }
}
