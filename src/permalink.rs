//! Public URL lookup for items on any site of the network.
//!
//! Sites served by this process are resolved in-process. Independently hosted
//! sites are asked over HTTP through [`SiteRpcClient`]. Every failure is
//! logged and reported to callers as "not found".

use crate::network::{ContentHost, ItemId, Site, SiteId};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unknown site {0}")]
    UnknownSite(SiteId),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Single-item RPC response.
#[derive(Debug, Serialize, Deserialize)]
pub struct PermalinkResponse {
    pub permalink: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PermalinksRequest {
    pub ids: Vec<ItemId>,
}

/// Batched RPC response; every requested id is present, unresolvable ones are null.
#[derive(Debug, Serialize, Deserialize)]
pub struct PermalinksResponse {
    pub permalinks: BTreeMap<ItemId, Option<String>>,
}

pub trait PermalinkFetcher: Send + Sync {
    fn get_permalink(&self, site_id: SiteId, item_id: ItemId) -> BoxFuture<'_, Option<String>>;

    fn get_permalinks(
        &self,
        site_id: SiteId,
        item_ids: Vec<ItemId>,
    ) -> BoxFuture<'_, BTreeMap<ItemId, Option<String>>>;
}

/// HTTP client for a sibling site's permalink API.
///
/// One attempt per call, bounded by the client timeout. Certificate checks
/// are disabled because sibling sites often run on internal or self-signed
/// infrastructure.
#[derive(Clone)]
pub struct SiteRpcClient {
    http: reqwest::Client,
}

impl SiteRpcClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http })
    }

    /// `Ok(None)` when the site reports the item as missing or unpublished.
    pub async fn permalink(&self, site: &Site, item_id: ItemId) -> Result<Option<String>, FetchError> {
        let url = format!("{}/get-permalink/{}", site.api_base(), item_id);
        let response = self.http.get(&url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if !status.is_success() => Err(FetchError::Status(status)),
            _ => {
                let body: PermalinkResponse = response
                    .json()
                    .await
                    .map_err(|e| FetchError::Malformed(e.to_string()))?;
                Ok(Some(body.permalink))
            }
        }
    }

    pub async fn permalinks(
        &self,
        site: &Site,
        item_ids: &[ItemId],
    ) -> Result<BTreeMap<ItemId, Option<String>>, FetchError> {
        let url = format!("{}/get-permalinks", site.api_base());
        let response = self
            .http
            .post(&url)
            .json(&PermalinksRequest {
                ids: item_ids.to_vec(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body: PermalinksResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))?;
        Ok(body.permalinks)
    }
}

/// Resolves permalinks locally or over RPC depending on where the site lives.
#[derive(Clone)]
pub struct PermalinkClient {
    host: Arc<dyn ContentHost>,
    rpc: SiteRpcClient,
}

impl PermalinkClient {
    pub fn new(host: Arc<dyn ContentHost>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            host,
            rpc: SiteRpcClient::new(timeout)?,
        })
    }

    fn local_permalink(&self, site_id: SiteId, item_id: ItemId) -> Option<String> {
        self.host
            .item(site_id, item_id)
            .and_then(|item| item.public_permalink().map(str::to_string))
    }

    async fn fetch_one(&self, site_id: SiteId, item_id: ItemId) -> Result<Option<String>, FetchError> {
        let site = self
            .host
            .site(site_id)
            .ok_or(FetchError::UnknownSite(site_id))?;

        if !site.remote {
            return Ok(self.local_permalink(site_id, item_id));
        }

        self.rpc.permalink(&site, item_id).await
    }

    async fn fetch_many(
        &self,
        site_id: SiteId,
        item_ids: &[ItemId],
    ) -> Result<BTreeMap<ItemId, Option<String>>, FetchError> {
        let site = self
            .host
            .site(site_id)
            .ok_or(FetchError::UnknownSite(site_id))?;

        if !site.remote {
            return Ok(item_ids
                .iter()
                .map(|&id| (id, self.local_permalink(site_id, id)))
                .collect());
        }

        self.rpc.permalinks(&site, item_ids).await
    }
}

impl PermalinkFetcher for PermalinkClient {
    fn get_permalink(&self, site_id: SiteId, item_id: ItemId) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move {
            match self.fetch_one(site_id, item_id).await {
                Ok(Some(url)) => Some(url),
                Ok(None) => {
                    debug!("Item {} on site {} has no public permalink", item_id, site_id);
                    None
                }
                Err(e) => {
                    warn!(
                        "Permalink fetch failed for item {} on site {}: {}",
                        item_id, site_id, e
                    );
                    None
                }
            }
        })
    }

    fn get_permalinks(
        &self,
        site_id: SiteId,
        item_ids: Vec<ItemId>,
    ) -> BoxFuture<'_, BTreeMap<ItemId, Option<String>>> {
        Box::pin(async move {
            match self.fetch_many(site_id, &item_ids).await {
                Ok(mut found) => {
                    // Keep every requested id as a key, even if the remote dropped some
                    item_ids
                        .iter()
                        .map(|id| (*id, found.remove(id).flatten()))
                        .collect()
                }
                Err(e) => {
                    warn!(
                        "Batched permalink fetch failed for {} items on site {}: {}",
                        item_ids.len(),
                        site_id,
                        e
                    );
                    item_ids.into_iter().map(|id| (id, None)).collect()
                }
            }
        })
    }
}
