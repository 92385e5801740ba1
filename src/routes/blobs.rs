//! Blob Routes
//!
//! Endpoints:
//! - GET /api/v1/blobs/:blob_id - Blob reference
//! - GET /api/v1/blobs/:blob_id/content - Assembled bytes
//! - DELETE /api/v1/blobs/:blob_id?mode=full|metadata_only - Delete

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use super::Caller;
use crate::access::{authorize, Operation};
use crate::error::BlobError;
use crate::state::AppState;
use crate::upload::{BlobId, BlobReference, DeleteMode, DeleteReport};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:blob_id", get(get_blob).delete(delete_blob))
        .route("/:blob_id/content", get(get_content))
}

#[derive(Debug, Deserialize)]
struct DeleteQuery {
    #[serde(default)]
    mode: DeleteMode,
}

/// Load a reference the caller may read
async fn readable(state: &AppState, caller: &str, blob_id: &str) -> Result<BlobReference, BlobError> {
    let blob_id = BlobId::parse(blob_id)?;
    let sessions = state.sessions();
    let reference = sessions.finalizer().get(&blob_id).await?;

    authorize(
        sessions.access(),
        caller,
        &reference.owner_resource_id,
        Operation::Read,
    )
    .await?;

    Ok(reference)
}

/// GET /api/v1/blobs/:blob_id
async fn get_blob(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(blob_id): Path<String>,
) -> Result<Json<BlobReference>, BlobError> {
    let reference = readable(&state, &caller, &blob_id).await?;
    Ok(Json(reference))
}

/// GET /api/v1/blobs/:blob_id/content
async fn get_content(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(blob_id): Path<String>,
) -> Result<impl IntoResponse, BlobError> {
    let reference = readable(&state, &caller, &blob_id).await?;
    let content = state
        .sessions()
        .chunks()
        .assemble(&reference.chunk_key_prefix, reference.chunk_count)
        .await?;

    tracing::debug!(
        blob_id = %reference.blob_id,
        size = content.len(),
        "Serving blob content"
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::ETAG, format!("\"{}\"", reference.content_hash)),
        ],
        content,
    ))
}

/// DELETE /api/v1/blobs/:blob_id
async fn delete_blob(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(blob_id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<DeleteReport>, BlobError> {
    let report = state
        .sessions()
        .cleanup()
        .delete_by_id(&caller, &blob_id, query.mode)
        .await?;
    Ok(Json(report))
}
