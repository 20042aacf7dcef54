//! Component wiring over shared handles.

use crate::archive::ArchiveStore;
use crate::config::Config;
use crate::locale::LocaleResolver;
use crate::map_store::MapStore;
use crate::network::{ContentHost, StaticNetwork};
use crate::permalink::{PermalinkClient, PermalinkFetcher};
use crate::rebuild::Rebuilder;
use crate::settings::SettingsService;
use crate::store::Store;
use crate::sync::Synchronizer;
use crate::tags::TagEmitter;
use anyhow::Result;
use std::sync::Arc;

#[derive(Clone)]
pub struct Engine {
    pub network: Arc<StaticNetwork>,
    pub host: Arc<dyn ContentHost>,
    pub fetcher: Arc<dyn PermalinkFetcher>,
    pub locales: LocaleResolver,
    pub maps: MapStore,
    pub archives: ArchiveStore,
    pub rebuilder: Rebuilder,
    pub settings: SettingsService,
    pub sync: Synchronizer,
    pub tags: TagEmitter,
}

impl Engine {
    pub fn new(network: Arc<StaticNetwork>, store: Arc<dyn Store>, config: &Config) -> Result<Self> {
        let host: Arc<dyn ContentHost> = network.clone();
        let fetcher: Arc<dyn PermalinkFetcher> =
            Arc::new(PermalinkClient::new(host.clone(), config.fetch_timeout())?);
        Ok(Self::with_fetcher(network, store, fetcher, config))
    }

    /// Wire the engine around a caller-supplied fetcher.
    pub fn with_fetcher(
        network: Arc<StaticNetwork>,
        store: Arc<dyn Store>,
        fetcher: Arc<dyn PermalinkFetcher>,
        config: &Config,
    ) -> Self {
        let host: Arc<dyn ContentHost> = network.clone();
        let locales = LocaleResolver::new(host.clone(), store.clone(), config.default_locale.clone());
        let maps = MapStore::new(store.clone(), fetcher.clone(), host.clone(), locales.clone());
        let archives = ArchiveStore::new(store.clone(), host.clone(), locales.clone());
        let rebuilder = Rebuilder::new(
            host.clone(),
            store.clone(),
            fetcher.clone(),
            maps.clone(),
            locales.clone(),
            config.rebuild_batch_size,
        );
        let settings = SettingsService::new(
            store,
            host.clone(),
            locales.clone(),
            config.settings_nonce.clone(),
        );
        let sync = Synchronizer::new(
            host.clone(),
            fetcher.clone(),
            maps.clone(),
            locales.clone(),
            rebuilder.clone(),
            settings.clone(),
        );
        let tags = TagEmitter::new(host.clone(), maps.clone(), archives.clone(), locales.clone());

        Self {
            network,
            host,
            fetcher,
            locales,
            maps,
            archives,
            rebuilder,
            settings,
            sync,
            tags,
        }
    }
}
