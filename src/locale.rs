//! Effective locale of a site.
//!
//! A site's native locale can be overridden per site in the network
//! settings. Locales are compared in key form (`en-us`) and shown to
//! browsers in pretty form (`en-US`).

use crate::network::{ContentHost, SiteId};
use crate::settings::NetworkSettings;
use crate::store::{self, Store};
use std::sync::Arc;
use tracing::warn;

pub const DEFAULT_LOCALE: &str = "en_US";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocaleFormat {
    /// As configured (e.g. "en_US")
    Raw,
    /// Lowercase, hyphenated (e.g. "en-us")
    Key,
    /// Key form with an upper-cased two-letter region (e.g. "en-US")
    Pretty,
}

pub fn format_key(locale: &str) -> String {
    locale.replace('_', "-").to_lowercase()
}

pub fn format_pretty(locale: &str) -> String {
    let key = format_key(locale);

    let mut parts = key.split('-');
    if let (Some(lang), Some(region), None) = (parts.next(), parts.next(), parts.next()) {
        if lang.len() == 2 && region.len() == 2 {
            return format!("{}-{}", lang, region.to_uppercase());
        }
    }

    key
}

pub fn format_locale(locale: &str, format: LocaleFormat) -> String {
    match format {
        LocaleFormat::Raw => locale.to_string(),
        LocaleFormat::Key => format_key(locale),
        LocaleFormat::Pretty => format_pretty(locale),
    }
}

/// Language-only prefix of a regional key ("en-us" -> "en").
pub fn language_prefix(key: &str) -> Option<&str> {
    match key.split_once('-') {
        Some((lang, _)) if !lang.is_empty() => Some(lang),
        _ => None,
    }
}

/// Apply the override table over a site's native locale.
pub fn effective_locale(
    native: Option<&str>,
    settings: &NetworkSettings,
    site_id: SiteId,
    default_locale: &str,
) -> String {
    if let Some(locale) = settings.locales.get(&site_id).filter(|l| !l.is_empty()) {
        return locale.clone();
    }

    match native {
        Some(locale) if !locale.is_empty() => locale.to_string(),
        _ => default_locale.to_string(),
    }
}

#[derive(Clone)]
pub struct LocaleResolver {
    host: Arc<dyn ContentHost>,
    store: Arc<dyn Store>,
    default_locale: String,
}

impl LocaleResolver {
    pub fn new(host: Arc<dyn ContentHost>, store: Arc<dyn Store>, default_locale: String) -> Self {
        Self {
            host,
            store,
            default_locale,
        }
    }

    /// Current network settings, defaults when unset or unreadable.
    pub async fn settings(&self) -> NetworkSettings {
        match store::load_option::<NetworkSettings>(self.store.as_ref(), store::NETWORK_SETTINGS)
            .await
        {
            Ok(settings) => settings.unwrap_or_default(),
            Err(e) => {
                warn!("Failed to load network settings, using defaults: {:#}", e);
                NetworkSettings::default()
            }
        }
    }

    pub async fn resolve(&self, site_id: SiteId, format: LocaleFormat) -> String {
        let settings = self.settings().await;
        self.resolve_with(&settings, site_id, format)
    }

    /// Resolve against an already loaded settings document.
    pub fn resolve_with(
        &self,
        settings: &NetworkSettings,
        site_id: SiteId,
        format: LocaleFormat,
    ) -> String {
        let site = self.host.site(site_id);
        let native = site.as_ref().and_then(|s| s.locale.as_deref());
        let locale = effective_locale(native, settings, site_id, &self.default_locale);
        format_locale(&locale, format)
    }

    pub fn main_site_id(&self) -> SiteId {
        self.host.main_site_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::StaticNetwork;
    use crate::store::MemoryStore;
    use proptest::prelude::*;

    fn resolver() -> (LocaleResolver, Arc<MemoryStore>) {
        let host = StaticNetwork::from_json(
            r#"{
                "main_site_id": 1,
                "sites": [
                    {"id": 1, "base_url": "https://example.com", "locale": "en_US"},
                    {"id": 2, "base_url": "https://example.de", "locale": "de_DE"},
                    {"id": 3, "base_url": "https://example.org"}
                ]
            }"#,
        )
        .expect("network");
        let store = Arc::new(MemoryStore::new());
        let resolver = LocaleResolver::new(Arc::new(host), store.clone(), DEFAULT_LOCALE.to_string());
        (resolver, store)
    }

    // ==================== Formatting Tests ====================

    #[test]
    fn test_format_key() {
        assert_eq!(format_key("en_US"), "en-us");
        assert_eq!(format_key("pt_BR"), "pt-br");
        assert_eq!(format_key("fr"), "fr");
    }

    #[test]
    fn test_format_pretty() {
        assert_eq!(format_pretty("en_US"), "en-US");
        assert_eq!(format_pretty("en-us"), "en-US");
        assert_eq!(format_pretty("fr"), "fr");
    }

    #[test]
    fn test_format_pretty_leaves_non_two_letter_segments() {
        assert_eq!(format_pretty("zh_Hans"), "zh-hans");
        assert_eq!(format_pretty("es_419"), "es-419");
        assert_eq!(format_pretty("sr_RS_latin"), "sr-rs-latin");
    }

    #[test]
    fn test_language_prefix() {
        assert_eq!(language_prefix("en-us"), Some("en"));
        assert_eq!(language_prefix("fr"), None);
        assert_eq!(language_prefix("-x"), None);
    }

    proptest! {
        #[test]
        fn prop_key_normalization_is_idempotent(locale in "[A-Za-z_-]{0,12}") {
            let key = format_key(&locale);
            prop_assert_eq!(format_key(&format_pretty(&key)), key.clone());
            prop_assert_eq!(format_key(&key), key);
        }
    }

    // ==================== Resolution Tests ====================

    #[tokio::test]
    async fn test_resolve_native_locale() {
        let (resolver, _) = resolver();
        assert_eq!(resolver.resolve(2, LocaleFormat::Raw).await, "de_DE");
        assert_eq!(resolver.resolve(2, LocaleFormat::Key).await, "de-de");
        assert_eq!(resolver.resolve(2, LocaleFormat::Pretty).await, "de-DE");
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_default() {
        let (resolver, _) = resolver();
        assert_eq!(resolver.resolve(3, LocaleFormat::Key).await, "en-us");
        assert_eq!(resolver.resolve(99, LocaleFormat::Key).await, "en-us");
    }

    #[tokio::test]
    async fn test_resolve_applies_override() {
        let (resolver, store) = resolver();
        let mut settings = NetworkSettings::default();
        settings.locales.insert(2, "de-at".to_string());
        store::save_option(store.as_ref(), store::NETWORK_SETTINGS, &settings)
            .await
            .unwrap();

        assert_eq!(resolver.resolve(2, LocaleFormat::Key).await, "de-at");
        assert_eq!(resolver.resolve(2, LocaleFormat::Pretty).await, "de-AT");
        assert_eq!(resolver.resolve(1, LocaleFormat::Key).await, "en-us");
    }

    #[tokio::test]
    async fn test_resolve_ignores_empty_override() {
        let (resolver, _) = resolver();
        let mut settings = NetworkSettings::default();
        settings.locales.insert(2, String::new());
        assert_eq!(resolver.resolve_with(&settings, 2, LocaleFormat::Key), "de-de");
    }
}
