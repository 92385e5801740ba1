//! Upload Routes
//!
//! Endpoints:
//! - POST /api/v1/uploads - Begin a session
//! - PUT /api/v1/uploads/:session_id/chunks/:index - Upload the next chunk (raw body)
//! - POST /api/v1/uploads/:session_id/finish - Verify and commit
//! - DELETE /api/v1/uploads/:session_id - Abort
//! - GET /api/v1/uploads/:session_id - Session status

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    routing::{post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::Caller;
use crate::error::BlobError;
use crate::state::AppState;
use crate::upload::{
    parse_session_id, BeginRequest, BeginResponse, BlobId, BlobReference, ChunkAck,
    FinishRequest, SessionState, UploadSession,
};

/// Create the upload router
pub fn router(max_chunk_size: usize) -> Router<AppState> {
    // One byte of slack lets an oversize chunk reach the session's own check
    let body_limit = DefaultBodyLimit::max(max_chunk_size.saturating_add(1));

    Router::new()
        .route("/", post(begin))
        .route("/:session_id/chunks/:index", put(put_chunk).layer(body_limit))
        .route("/:session_id/finish", post(finish))
        .route("/:session_id", axum::routing::get(get_session).delete(abort))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/uploads
async fn begin(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(request): Json<BeginRequest>,
) -> Result<(StatusCode, Json<BeginResponse>), BlobError> {
    let sessions = state.sessions();
    let session = sessions.begin(&caller, &request).await?;

    Ok((
        StatusCode::CREATED,
        Json(BeginResponse {
            session_id: session.id,
            state: session.state,
            expected_total_bytes: session.expected_total_bytes,
            max_chunk_size: sessions.limits().max_chunk_size,
        }),
    ))
}

/// PUT /api/v1/uploads/:session_id/chunks/:index
///
/// The chunk data is the raw request body.
async fn put_chunk(
    State(state): State<AppState>,
    Path((session_id, chunk_index)): Path<(String, u64)>,
    body: Bytes,
) -> Result<Json<ChunkAck>, BlobError> {
    let session_id = parse_session_id(&session_id)?;
    let ack = state.sessions().put_chunk(session_id, chunk_index, &body).await?;
    Ok(Json(ack))
}

/// POST /api/v1/uploads/:session_id/finish
///
/// The body is optional; when present it may carry the declared hash.
async fn finish(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Result<Json<BlobReference>, BlobError> {
    let session_id = parse_session_id(&session_id)?;

    let request = if body.iter().all(u8::is_ascii_whitespace) {
        FinishRequest::default()
    } else {
        serde_json::from_slice::<FinishRequest>(&body)
            .map_err(|e| BlobError::InvalidArgument(format!("invalid finish request: {}", e)))?
    };

    let reference = state
        .sessions()
        .finish(session_id, request.declared_hash.as_deref())
        .await?;

    Ok(Json(reference))
}

/// DELETE /api/v1/uploads/:session_id
async fn abort(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatusResponse>, BlobError> {
    let session_id = parse_session_id(&session_id)?;
    let session = state.sessions().abort(session_id).await?;
    Ok(Json(SessionStatusResponse::from(&session)))
}

/// GET /api/v1/uploads/:session_id
async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatusResponse>, BlobError> {
    let session_id = parse_session_id(&session_id)?;
    let session = state.sessions().status(session_id).await?;
    Ok(Json(SessionStatusResponse::from(&session)))
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionStatusResponse {
    session_id: Uuid,
    owner_resource_id: String,
    state: SessionState,
    expected_total_bytes: u64,
    bytes_received: u64,
    chunks_received: u64,
    progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    blob_id: Option<BlobId>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
}

impl From<&UploadSession> for SessionStatusResponse {
    fn from(session: &UploadSession) -> Self {
        Self {
            session_id: session.id,
            owner_resource_id: session.owner_resource_id.clone(),
            state: session.state,
            expected_total_bytes: session.expected_total_bytes,
            bytes_received: session.bytes_received,
            chunks_received: session.chunks_received,
            progress: session.progress(),
            blob_id: session.blob_id.clone(),
            created_at: session.created_at,
            last_activity_at: session.last_activity_at,
        }
    }
}
