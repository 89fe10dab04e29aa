use anyhow::{bail, Result};
use axum::{extract::{Path, Query, State}, http::{HeaderMap, StatusCode}, routing::{get, post}, Json, Router};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use sticker_keywords::{ItemId, KeywordStore, QueryHit};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Deserialize)]
pub struct QueryParams {
    pub q: String,
    #[serde(default)]
    pub exact: bool,
}

#[derive(Serialize)]
pub struct QueryResponse {
    pub query: String,
    pub exact: bool,
    pub total_hits: usize,
    pub results: Vec<QueryHit>,
}

#[derive(Deserialize)]
pub struct KeywordsBody {
    pub keywords: Vec<String>,
}

#[derive(Serialize)]
pub struct ItemKeywords {
    pub id: ItemId,
    pub keywords: Vec<String>,
}

#[derive(Deserialize)]
pub struct HitBody {
    pub keyword: String,
}

#[derive(Serialize)]
pub struct HitResponse {
    pub id: ItemId,
    pub keyword: String,
    pub count: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<KeywordStore>,
    pub admin_token: Option<String>,
}

pub fn build_app<P: Into<PathBuf>>(workdir: P) -> Result<Router> {
    let workdir = workdir.into();
    if !workdir.is_dir() {
        bail!("working directory {} does not exist", workdir.display());
    }
    // Load keywords once at startup
    let store = Arc::new(KeywordStore::open(&workdir));
    let admin_token = std::env::var("ADMIN_TOKEN").ok();
    Ok(router(AppState { store, admin_token }))
}

pub fn router(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/query", get(query_handler))
        .route("/items/:id/keywords", get(get_keywords_handler).put(set_keywords_handler))
        .route("/items/:id/hits", post(hit_handler))
        .route("/admin/save", post(admin_save))
        .route("/admin/reload", post(admin_reload))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn query_handler(State(state): State<AppState>, Query(params): Query<QueryParams>) -> Json<QueryResponse> {
    let results = state.store.query(&params.q, params.exact);
    Json(QueryResponse { total_hits: results.len(), query: params.q, exact: params.exact, results })
}

pub async fn get_keywords_handler(State(state): State<AppState>, Path(id): Path<ItemId>) -> Json<ItemKeywords> {
    Json(ItemKeywords { id, keywords: state.store.get_keywords(id) })
}

pub async fn set_keywords_handler(
    State(state): State<AppState>,
    Path(id): Path<ItemId>,
    Json(body): Json<KeywordsBody>,
) -> Json<ItemKeywords> {
    state.store.set_keywords(id, &body.keywords);
    Json(ItemKeywords { id, keywords: state.store.get_keywords(id) })
}

pub async fn hit_handler(
    State(state): State<AppState>,
    Path(id): Path<ItemId>,
    Json(body): Json<HitBody>,
) -> Result<Json<HitResponse>, (StatusCode, String)> {
    if body.keyword.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "keyword must not be empty".into()));
    }
    let count = state.store.record_hit(&body.keyword, id);
    Ok(Json(HitResponse { id, keyword: body.keyword, count }))
}

// --- Admin endpoints ---
async fn admin_save(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    authorize(&state, &headers)?;
    state
        .store
        .save()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")))?;
    Ok(Json(serde_json::json!({ "saved": true, "keywords": state.store.keyword_len() })))
}

async fn admin_reload(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    authorize(&state, &headers)?;
    let loaded = state
        .store
        .reload()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")))?;
    Ok(Json(serde_json::json!({ "loaded": loaded, "keywords": state.store.keyword_len() })))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, String)> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err((StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}
