//! Upload types: sessions, blob references, identifiers

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::chunk_key::ChunkKeyPrefix;
use crate::error::{BlobError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default maximum chunk size: 4MB
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Default maximum blob size: 4GB
pub const DEFAULT_MAX_BLOB_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Default inactivity window before a session expires: 24 hours
pub const DEFAULT_INACTIVITY_SECS: i64 = 24 * 60 * 60;

/// Maximum length of an owner resource id, in bytes
pub const MAX_OWNER_ID_LEN: usize = 256;

const BLOB_ID_PREFIX: &str = "blob-";

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of a committed blob.
///
/// The only accepted textual form is `blob-` followed by a lowercase,
/// hyphenated UUID v4. Every caller that turns text into a `BlobId` goes
/// through [`BlobId::parse`].
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobId(Uuid);

impl BlobId {
    /// Allocate a fresh blob id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse the canonical textual form, rejecting everything else
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || BlobError::InvalidArgument(format!("malformed blob id: {:?}", s));

        let rest = s.strip_prefix(BLOB_ID_PREFIX).ok_or_else(invalid)?;
        let uuid = Uuid::parse_str(rest).map_err(|_| invalid())?;

        // Uuid::parse_str is lenient about case, braces and the simple form
        if uuid.get_version_num() != 4 || uuid.hyphenated().to_string() != rest {
            return Err(invalid());
        }

        Ok(Self(uuid))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BlobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", BLOB_ID_PREFIX, self.0.hyphenated())
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({})", self)
    }
}

impl FromStr for BlobId {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BlobId {
    type Error = BlobError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<BlobId> for String {
    fn from(id: BlobId) -> Self {
        id.to_string()
    }
}

/// Parse a session id from its textual form
pub fn parse_session_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s)
        .ok()
        .filter(|id| id.hyphenated().to_string() == s)
        .ok_or_else(|| BlobError::InvalidArgument(format!("malformed session id: {:?}", s)))
}

/// Normalize a client-declared SHA-256 digest to lowercase hex
pub fn parse_digest(s: &str) -> Result<String> {
    if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(BlobError::InvalidArgument(format!(
            "declared hash must be 64 hex characters, got {:?}",
            s
        )));
    }
    Ok(s.to_ascii_lowercase())
}

/// Validate an owner resource id
pub fn validate_owner(owner: &str) -> Result<()> {
    if owner.is_empty() {
        return Err(BlobError::InvalidArgument("owner resource id is empty".into()));
    }
    if owner.len() > MAX_OWNER_ID_LEN {
        return Err(BlobError::InvalidArgument(format!(
            "owner resource id exceeds {} bytes",
            MAX_OWNER_ID_LEN
        )));
    }
    if owner.chars().any(char::is_control) {
        return Err(BlobError::InvalidArgument(
            "owner resource id contains control characters".into(),
        ));
    }
    Ok(())
}

// ============================================================================
// Request / Response Types
// ============================================================================

/// Request to begin a chunked upload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginRequest {
    /// Logical resource the upload belongs to
    pub owner_resource_id: String,

    /// Total asset size in bytes
    pub expected_total_bytes: u64,

    /// SHA-256 of the complete asset, if known up front
    #[serde(default)]
    pub declared_hash: Option<String>,

    /// Chunk size the client intends to use
    #[serde(default)]
    pub chunk_size_hint: Option<u64>,
}

/// Response to a begin request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginResponse {
    pub session_id: Uuid,
    pub state: SessionState,
    pub expected_total_bytes: u64,
    pub max_chunk_size: usize,
}

/// Acknowledgement for an accepted chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    pub chunk_index: u64,

    /// Bytes written by this call (zero for an acknowledged duplicate)
    pub bytes_written: u64,

    pub bytes_received: u64,

    pub chunks_received: u64,

    /// Whether `bytes_received` has reached the declared total
    pub complete: bool,

    /// Whether this call repeated the previous chunk and was ignored
    pub duplicate: bool,
}

/// Request body for finishing an upload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishRequest {
    #[serde(default)]
    pub declared_hash: Option<String>,
}

// ============================================================================
// Session Types
// ============================================================================

/// Upload session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created, no chunk received yet
    Pending,
    /// Receiving chunks
    InProgress,
    /// Hash verified, blob reference being registered
    Finalizing,
    /// Blob reference registered
    Committed,
    /// Cancelled, failed verification, or lost its hash state
    Aborted,
    /// Inactive for longer than the inactivity window
    Expired,
}

impl SessionState {
    /// Whether the session can still accept chunks
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted | Self::Expired)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Finalizing => "finalizing",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
            Self::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// Persisted upload session metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    /// Unique session ID
    pub id: Uuid,

    pub owner_resource_id: String,

    /// Caller that began the session
    pub created_by: String,

    pub expected_total_bytes: u64,

    pub bytes_received: u64,

    /// Normalized SHA-256 hex declared by the client
    pub declared_hash: Option<String>,

    pub chunk_size_hint: Option<u64>,

    /// Number of contiguous chunks accepted so far
    pub chunks_received: u64,

    /// SHA-256 of the last accepted chunk, used to acknowledge retries
    pub last_chunk_digest: Option<String>,

    pub state: SessionState,

    /// Digest produced by the accumulator, set on entering `Finalizing`
    pub computed_hash: Option<String>,

    /// Blob id reserved on entering `Finalizing`
    pub blob_id: Option<BlobId>,

    pub created_at: DateTime<Utc>,

    pub last_activity_at: DateTime<Utc>,
}

impl UploadSession {
    /// Create a new upload session
    pub fn new(request: &BeginRequest, declared_hash: Option<String>, caller: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_resource_id: request.owner_resource_id.clone(),
            created_by: caller.to_string(),
            expected_total_bytes: request.expected_total_bytes,
            bytes_received: 0,
            declared_hash,
            chunk_size_hint: request.chunk_size_hint,
            chunks_received: 0,
            last_chunk_digest: None,
            state: SessionState::Pending,
            computed_hash: None,
            blob_id: None,
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Prefix from which every chunk key of this session derives
    pub fn key_prefix(&self) -> ChunkKeyPrefix {
        ChunkKeyPrefix::derive(&self.owner_resource_id, self.id)
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.expected_total_bytes - self.bytes_received
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_received == self.expected_total_bytes
    }

    /// Whether an open session has been idle past the window
    pub fn is_stale(&self, now: DateTime<Utc>, inactivity: Duration) -> bool {
        self.state.is_open() && now - self.last_activity_at > inactivity
    }

    /// Whether a terminal session has sat untouched for longer than `retention`
    pub fn is_past_retention(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        self.state.is_terminal() && now - self.last_activity_at > retention
    }

    /// Calculate progress percentage
    pub fn progress(&self) -> f64 {
        if self.expected_total_bytes == 0 {
            return 100.0;
        }
        (self.bytes_received as f64 / self.expected_total_bytes as f64) * 100.0
    }
}

// ============================================================================
// Blob Types
// ============================================================================

/// Immutable description of a committed asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobReference {
    pub blob_id: BlobId,

    pub owner_resource_id: String,

    pub size_bytes: u64,

    /// SHA-256 hex of the uploaded bytes
    pub content_hash: String,

    pub chunk_count: u64,

    pub chunk_key_prefix: ChunkKeyPrefix,

    pub created_at: DateTime<Utc>,
}

/// How much of an asset [`AssetCleanup`](super::AssetCleanup) removes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Remove every chunk, then the reference
    #[default]
    #[serde(alias = "full")]
    FullDelete,

    /// Remove only the reference and leave chunk bytes in place.
    ///
    /// The reference is the only record able to regenerate the chunk keys,
    /// so the caller is responsible for knowing the bytes are reachable some
    /// other way. Otherwise they are orphaned for good.
    MetadataOnly,
}

/// Outcome of a delete
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    pub chunks_removed: u64,
    pub references_removed: u64,
}

impl DeleteReport {
    pub fn merge(&mut self, other: &DeleteReport) {
        self.chunks_removed += other.chunks_removed;
        self.references_removed += other.references_removed;
    }
}

/// Outcome of an expiry sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub sessions_scanned: u64,
    pub sessions_expired: u64,
    pub sessions_lost: u64,
    /// Terminal session records deleted
    pub sessions_pruned: u64,
    pub chunks_reclaimed: u64,
}

// ============================================================================
// Tests
// ============================================================================
