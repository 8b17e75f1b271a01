pub mod sse;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::live_scores::{SessionManager, UpstreamError};
use crate::models::{MatchId, MatchIdError};

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Match ID is required")]
    MissingMatchId,
    #[error("Invalid match ID: {0}")]
    InvalidMatchId(MatchIdError),
    #[error("{0}")]
    Upstream(#[from] UpstreamError),
}

impl From<MatchIdError> for ApiError {
    fn from(err: MatchIdError) -> Self {
        match err {
            MatchIdError::Empty => ApiError::MissingMatchId,
            other => ApiError::InvalidMatchId(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::MissingMatchId | ApiError::InvalidMatchId(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the Axum router for the live-score feed.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/live", get(missing_match_id_handler))
        .route("/api/live/", get(missing_match_id_handler))
        .route("/api/live/:match_id", get(live_handler))
        .route("/api/score/:match_id", get(score_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// GET /api/live/:match_id — event stream of score updates for one match
async fn live_handler(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Response, ApiError> {
    let match_id = MatchId::parse(&raw_id)?;
    let (handle, rx) = state.sessions.open(match_id);
    info!(
        "Subscriber connected for match {} ({} active)",
        handle.match_id(),
        state.sessions.active_sessions()
    );
    Ok(sse::event_stream(handle, rx))
}

async fn missing_match_id_handler() -> ApiError {
    ApiError::MissingMatchId
}

/// GET /api/score/:match_id — current snapshot as plain JSON
async fn score_handler(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let match_id = MatchId::parse(&raw_id)?;
    let cached = state.sessions.cache().get(&match_id).await.map_err(|e| {
        warn!("Snapshot request for match {} failed: {}", match_id, e);
        e
    })?;
    Ok(Json(json!({
        "data": cached.snapshot,
        "stale": cached.stale,
        "age_ms": cached.fetched_at.elapsed().as_millis() as u64,
    })))
}

/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "cached_matches": state.sessions.cache().len().await,
        "active_sessions": state.sessions.active_sessions(),
    }))
}
