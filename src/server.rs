//! HTTP surface of the service, mounted under `/hreflang/v1`.

use crate::engine::Engine;
use crate::error::{ApiError, ApiResult};
use crate::locale::LocaleFormat;
use crate::network::{ContentHost, ContentItem, ItemId, SiteId};
use crate::permalink::{PermalinkResponse, PermalinksResponse};
use crate::rebuild::BatchOutcome;
use crate::security;
use crate::settings::SettingsUpdate;
use crate::sync::ContentEvent;
use crate::tags::{self, PageRequest};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tower_http::trace::TraceLayer;
use tracing::info;

pub const API_KEY_HEADER: &str = "x-api-key";
const SEARCH_LIMIT: usize = 10;

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub api_key: Option<String>,
}

impl AppState {
    pub fn new(engine: Engine, api_key: Option<String>) -> Self {
        Self { engine, api_key }
    }

    /// Admin routes require the configured key; without one the fronting
    /// host is trusted to have checked permissions.
    fn require_admin(&self, headers: &HeaderMap) -> ApiResult<()> {
        let Some(expected) = &self.api_key else {
            return Ok(());
        };
        let presented = headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok());
        if security::verify_token(expected, presented) {
            Ok(())
        } else {
            Err(ApiError::Unauthorized)
        }
    }

    fn require_site(&self, site_id: SiteId) -> ApiResult<()> {
        match self.engine.host.site(site_id) {
            Some(_) => Ok(()),
            None => Err(ApiError::NotFound(format!("Unknown site {}", site_id))),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        // Rebuild control
        .route("/rebuild/start", post(rebuild_start))
        .route("/rebuild/process", post(rebuild_process))
        .route("/rebuild/status", get(rebuild_status))
        .route("/rebuild/item/:id", post(rebuild_item))
        // Cross-site permalinks
        .route("/sites/:site_id/get-permalink/:id", get(get_permalink))
        .route("/sites/:site_id/get-permalinks", post(get_permalinks))
        // Settings
        .route("/settings", get(get_settings))
        .route("/update-settings", post(update_settings))
        // Per-site surfaces
        .route(
            "/sites/:site_id/archive-paths",
            get(get_archive_paths).post(save_archive_paths),
        )
        .route("/sites/:site_id/events", post(handle_event))
        .route("/sites/:site_id/tags", get(get_tags))
        // Maps and editor support
        .route("/maps/:id", get(get_map))
        .route("/search", get(search))
        .route("/main-site-post/:id", get(main_site_post))
        .route("/debug/sites", get(debug_sites));

    Router::new()
        .route("/health", get(health))
        .nest("/hreflang/v1", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

// ==================== Rebuild ====================

async fn rebuild_start(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    state.require_admin(&headers)?;
    let progress = state.engine.rebuilder.start().await?;
    Ok(Json(json!({
        "success": true,
        "status": progress,
        "message": "Rebuild started",
    })))
}

async fn rebuild_process(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    state.require_admin(&headers)?;
    match state.engine.rebuilder.process_batch().await? {
        BatchOutcome::Processed { progress, updated } => {
            let message = if progress.completed {
                "Rebuild completed"
            } else {
                "Batch processed"
            };
            Ok(Json(json!({
                "success": true,
                "status": progress,
                "updated": updated,
                "message": message,
            })))
        }
        BatchOutcome::Idle => Ok(Json(json!({
            "success": false,
            "message": "No rebuild in progress or already completed",
        }))),
    }
}

async fn rebuild_status(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    state.require_admin(&headers)?;
    let progress = state
        .engine
        .rebuilder
        .status()
        .await?
        .ok_or_else(|| ApiError::NotFound("No rebuild in progress".to_string()))?;
    Ok(Json(json!({
        "success": true,
        "status": progress,
    })))
}

async fn rebuild_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ItemId>,
) -> ApiResult<Json<Value>> {
    state.require_admin(&headers)?;
    let map = state.engine.rebuilder.rebuild_item(id).await?;
    Ok(Json(json!({
        "success": true,
        "map": map,
    })))
}

// ==================== Permalinks ====================

async fn get_permalink(
    State(state): State<AppState>,
    Path((site_id, id)): Path<(SiteId, ItemId)>,
) -> ApiResult<Json<PermalinkResponse>> {
    state.require_site(site_id)?;
    let permalink = state
        .engine
        .fetcher
        .get_permalink(site_id, id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Post {} not found", id)))?;
    Ok(Json(PermalinkResponse { permalink }))
}

#[derive(Debug, Deserialize)]
struct PermalinksBody {
    ids: Option<Vec<ItemId>>,
}

async fn get_permalinks(
    State(state): State<AppState>,
    Path(site_id): Path<SiteId>,
    Json(body): Json<PermalinksBody>,
) -> ApiResult<Json<PermalinksResponse>> {
    state.require_site(site_id)?;
    let ids = body
        .ids
        .ok_or_else(|| ApiError::Validation("Missing ids".to_string()))?;
    let permalinks = state.engine.fetcher.get_permalinks(site_id, ids).await;
    Ok(Json(PermalinksResponse { permalinks }))
}

// ==================== Settings ====================

async fn get_settings(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    state.require_admin(&headers)?;
    let overview = state.engine.settings.overview().await?;
    Ok(Json(json!({
        "success": true,
        "settings": overview,
    })))
}

async fn update_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    state.require_admin(&headers)?;
    let update: SettingsUpdate = serde_json::from_value(body)
        .map_err(|e| ApiError::Validation(format!("Malformed settings: {}", e)))?;
    let applied = state.engine.settings.apply_update(update).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Settings updated successfully",
        "settings": applied,
    })))
}

// ==================== Archive paths ====================

#[derive(Debug, Deserialize)]
struct ArchivePathsBody {
    #[serde(default)]
    paths: BTreeMap<String, String>,
}

async fn get_archive_paths(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(site_id): Path<SiteId>,
) -> ApiResult<Json<Value>> {
    state.require_admin(&headers)?;
    state.require_site(site_id)?;
    let paths = state.engine.archives.site_paths(site_id).await?;
    Ok(Json(json!({
        "success": true,
        "paths": paths,
    })))
}

async fn save_archive_paths(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(site_id): Path<SiteId>,
    Json(body): Json<ArchivePathsBody>,
) -> ApiResult<Json<Value>> {
    state.require_admin(&headers)?;
    let paths = state.engine.archives.save_site_paths(site_id, &body.paths).await?;
    Ok(Json(json!({
        "success": true,
        "paths": paths,
    })))
}

// ==================== Content events ====================

#[derive(Debug, Deserialize)]
struct EventBody {
    /// Host-side snapshot of the item after the change
    #[serde(default)]
    item: Option<ContentItem>,
    event: ContentEvent,
}

async fn handle_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(site_id): Path<SiteId>,
    Json(body): Json<EventBody>,
) -> ApiResult<Json<Value>> {
    state.require_admin(&headers)?;
    state.require_site(site_id)?;

    let network = &state.engine.network;
    if let Some(item) = body.item {
        network.upsert_item(site_id, item)?;
    }

    let deleted_item = match &body.event {
        ContentEvent::Deleting { item_id, .. } | ContentEvent::MainItemDeleting { item_id } => {
            Some(*item_id)
        }
        _ => None,
    };

    let outcome = state.engine.sync.handle(site_id, body.event).await?;

    if let Some(item_id) = deleted_item {
        network.remove_item(site_id, item_id)?;
    }

    Ok(Json(json!({
        "success": true,
        "outcome": outcome,
    })))
}

// ==================== Tags ====================

#[derive(Debug, Serialize)]
struct TagsResponse {
    links: Vec<tags::AlternateLink>,
    html: String,
}

async fn get_tags(
    State(state): State<AppState>,
    Path(site_id): Path<SiteId>,
    Query(request): Query<PageRequest>,
) -> ApiResult<Json<TagsResponse>> {
    state.require_site(site_id)?;
    let links = state.engine.tags.alternate_links(site_id, &request).await?;
    let html = tags::render_links(&links);
    Ok(Json(TagsResponse { links, html }))
}

// ==================== Maps and editor support ====================

async fn get_map(State(state): State<AppState>, Path(id): Path<ItemId>) -> ApiResult<Json<Value>> {
    let map = state.engine.maps.get(id).await?;
    Ok(Json(json!({
        "item_id": id,
        "map": map,
    })))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    query: String,
}

#[derive(Debug, Serialize)]
struct PostSummary {
    id: ItemId,
    title: String,
}

async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchQuery>,
) -> ApiResult<Json<Vec<PostSummary>>> {
    state.require_admin(&headers)?;
    let host = &state.engine.host;
    let results = host
        .search(host.main_site_id(), params.query.trim(), SEARCH_LIMIT)
        .into_iter()
        .map(|item| PostSummary {
            id: item.id,
            title: item.title,
        })
        .collect();
    Ok(Json(results))
}

async fn main_site_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ItemId>,
) -> ApiResult<Json<PostSummary>> {
    state.require_admin(&headers)?;
    let host = &state.engine.host;
    let item = host
        .item(host.main_site_id(), id)
        .ok_or_else(|| ApiError::NotFound(format!("Post {} not found", id)))?;
    Ok(Json(PostSummary {
        id: item.id,
        title: item.title,
    }))
}

async fn debug_sites(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    state.require_admin(&headers)?;
    let engine = &state.engine;
    let settings = engine.locales.settings().await;

    let sites: Vec<Value> = engine
        .host
        .sites()
        .into_iter()
        .map(|site| {
            json!({
                "id": site.id,
                "name": site.name,
                "base_url": site.base_url,
                "locale": engine.locales.resolve_with(&settings, site.id, LocaleFormat::Key),
                "is_main": engine.host.is_main_site(site.id),
                "remote": site.remote,
            })
        })
        .collect();

    info!("Debug listing of {} sites", sites.len());
    Ok(Json(json!({
        "main_site_id": engine.host.main_site_id(),
        "sites": sites,
    })))
}
