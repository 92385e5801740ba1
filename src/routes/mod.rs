//! HTTP routes
//!
//! Endpoints:
//! - /api/v1/uploads - Chunked upload sessions
//! - /api/v1/blobs - Committed blob references and content
//! - POST /api/v1/maintenance/sweep - Expire idle sessions, reclaim their chunks

pub mod blobs;
pub mod uploads;

use axum::{
    extract::{FromRequestParts, State},
    http::request::Parts,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::error::BlobError;
use crate::state::AppState;
use crate::upload::SweepReport;

/// Header carrying the authenticated caller id, set by the fronting proxy
pub const CALLER_HEADER: &str = "x-caller-id";

/// Build the full application router
pub fn app(state: AppState) -> Router {
    let max_chunk_size = state.sessions().limits().max_chunk_size;

    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/health", get(health_check))
        .nest("/api/v1/uploads", uploads::router(max_chunk_size))
        .nest("/api/v1/blobs", blobs::router())
        .route("/api/v1/maintenance/sweep", post(sweep))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// POST /api/v1/maintenance/sweep
async fn sweep(State(state): State<AppState>) -> Result<Json<SweepReport>, BlobError> {
    let report = state.sessions().sweep().await?;
    Ok(Json(report))
}

/// Caller identity taken from the `X-Caller-Id` header
#[derive(Debug, Clone)]
pub struct Caller(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = BlobError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let caller = parts
            .headers
            .get(CALLER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| BlobError::Unauthorized("missing or invalid X-Caller-Id header".into()))?;

        Ok(Caller(caller.to_string()))
    }
}
