use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::AggregatorError;
use crate::services::{EntryCache, PoolController, PoolScheduler, SnapshotService, StateCache};
use crate::sources::TokenCatalog;

pub struct AppState {
    pub snapshots: Arc<SnapshotService>,
    pub controller: Arc<PoolController>,
    pub state_cache: Arc<StateCache>,
    pub entry_cache: Arc<EntryCache>,
    pub catalog: Arc<TokenCatalog>,
    pub scheduler: Arc<PoolScheduler>,
    pub chain_ids: Vec<u64>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    offset: Option<usize>,
    limit: Option<usize>,
}

/// GET /api/snapshots/:chain?offset=0&limit=25
async fn get_snapshot(
    Path(chain): Path<String>,
    Query(query): Query<SnapshotQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let offset = query.offset.unwrap_or(0);
    let limit = query
        .limit
        .unwrap_or(crate::services::snapshot::DEFAULT_LIMIT);

    match state.snapshots.snapshot(&chain, offset, limit).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(AggregatorError::ChainNotSupported(chain)) => {
            tracing::debug!("snapshot request for unsupported chain {}", chain);
            (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "message": "Chain not supported" })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("snapshot request failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "message": "Internal server error" })),
            )
                .into_response()
        }
    }
}

/// GET /health
async fn health() -> &'static str {
    "OK"
}

/// GET /stats
async fn stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let token_counts: Vec<serde_json::Value> = state
        .chain_ids
        .iter()
        .map(|&id| {
            serde_json::json!({
                "chainId": id,
                "tokens": state.catalog.tokens(id).len(),
            })
        })
        .collect();

    Json(serde_json::json!({
        "alive_pools": state.controller.len(),
        "cached_samples": state.state_cache.len(),
        "cached_entries": state.entry_cache.len(),
        "scheduler_ticks": state.scheduler.tick_count(),
        "chains": token_counts,
    }))
}

pub fn create_rest_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/snapshots/:chain", get(get_snapshot))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .with_state(state)
}
