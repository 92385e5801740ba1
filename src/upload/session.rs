//! Upload Session Manager
//!
//! Drives the session lifecycle over persisted state:
//!
//! ```text
//! Pending --first chunk--> InProgress --hash ok--> Finalizing --registered--> Committed
//!    \__________________________\_____________________\___> Aborted | Expired
//! ```
//!
//! Every call loads the session, applies lazy expiry and restart-loss rules,
//! performs one step, and persists the result. Nothing runs between calls.
//!
//! Chunks must arrive in ascending, contiguous index order so the rolling
//! digest equals the digest of the assembled asset. Repeating the most recent
//! chunk with identical bytes is acknowledged without effect; anything else
//! out of order is rejected.

use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use super::chunk_store::ChunkStore;
use super::cleanup::AssetCleanup;
use super::finalizer::BlobFinalizer;
use super::hasher::{compute_hash, HashRegistry};
use super::types::{
    parse_digest, validate_owner, BeginRequest, BlobId, BlobReference, ChunkAck, SessionState,
    SweepReport, UploadSession, DEFAULT_INACTIVITY_SECS, DEFAULT_MAX_BLOB_SIZE,
    DEFAULT_MAX_CHUNK_SIZE,
};
use crate::access::{authorize, AccessControl, Operation};
use crate::clock::{Clock, SystemClock};
use crate::error::{BlobError, Result};
use crate::record::RecordSink;
use crate::storage::{Collection, KvStore};

// ============================================================================
// Limits
// ============================================================================

/// Bounds enforced before any durable write
#[derive(Debug, Clone)]
pub struct UploadLimits {
    pub max_chunk_size: usize,
    pub max_blob_size: u64,
    pub inactivity: Duration,
    /// Maximum open sessions (0 = unlimited)
    pub max_active_sessions: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            max_blob_size: DEFAULT_MAX_BLOB_SIZE,
            inactivity: Duration::seconds(DEFAULT_INACTIVITY_SECS),
            max_active_sessions: 0,
        }
    }
}

/// What lazy observation did to a session
enum Lapse {
    None,
    Expired { reclaimed: u64 },
    Lost { reclaimed: u64 },
}

// ============================================================================
// Session Manager
// ============================================================================

/// Manages upload sessions
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionManagerInner>,
}

struct SessionManagerInner {
    store: Arc<dyn KvStore>,
    chunks: ChunkStore,
    hashes: HashRegistry,
    finalizer: BlobFinalizer,
    cleanup: AssetCleanup,
    access: Arc<dyn AccessControl>,
    clock: Arc<dyn Clock>,
    limits: UploadLimits,
    /// Serializes the active-session count with the insert that follows it
    admission: tokio::sync::Mutex<()>,
}

impl SessionManager {
    /// Create a new session manager on the system clock
    pub fn new(
        store: Arc<dyn KvStore>,
        records: Arc<dyn RecordSink>,
        access: Arc<dyn AccessControl>,
        limits: UploadLimits,
    ) -> Self {
        Self::with_clock(store, records, access, limits, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn KvStore>,
        records: Arc<dyn RecordSink>,
        access: Arc<dyn AccessControl>,
        mut limits: UploadLimits,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let chunks = ChunkStore::new(store.clone());
        if limits.max_chunk_size > chunks.max_value_size() {
            tracing::warn!(
                requested = limits.max_chunk_size,
                store_limit = chunks.max_value_size(),
                "Clamping max chunk size to the store's value limit"
            );
            limits.max_chunk_size = chunks.max_value_size();
        }

        Self {
            inner: Arc::new(SessionManagerInner {
                chunks,
                hashes: HashRegistry::new(),
                finalizer: BlobFinalizer::new(store.clone(), records.clone()),
                cleanup: AssetCleanup::new(store.clone(), records, access.clone()),
                store,
                access,
                clock,
                limits,
                admission: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn chunks(&self) -> &ChunkStore {
        &self.inner.chunks
    }

    pub fn finalizer(&self) -> &BlobFinalizer {
        &self.inner.finalizer
    }

    pub fn cleanup(&self) -> &AssetCleanup {
        &self.inner.cleanup
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.inner.limits
    }

    /// Access gate shared with cleanup, for read checks outside the manager
    pub fn access(&self) -> &dyn AccessControl {
        self.inner.access.as_ref()
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Begin a new upload session
    pub async fn begin(&self, caller: &str, request: &BeginRequest) -> Result<UploadSession> {
        let limits = &self.inner.limits;

        validate_owner(&request.owner_resource_id)?;
        if request.expected_total_bytes == 0 {
            return Err(BlobError::InvalidArgument(
                "expected_total_bytes must be greater than zero".into(),
            ));
        }
        let declared_hash = request.declared_hash.as_deref().map(parse_digest).transpose()?;
        if let Some(hint) = request.chunk_size_hint {
            if hint == 0 || hint > limits.max_chunk_size as u64 {
                return Err(BlobError::InvalidArgument(format!(
                    "chunk_size_hint must be between 1 and {}",
                    limits.max_chunk_size
                )));
            }
        }

        authorize(
            self.inner.access.as_ref(),
            caller,
            &request.owner_resource_id,
            Operation::Write,
        )
        .await?;

        if request.expected_total_bytes > limits.max_blob_size {
            return Err(BlobError::ResourceExhausted(format!(
                "asset of {} bytes exceeds maximum of {}",
                request.expected_total_bytes, limits.max_blob_size
            )));
        }

        // Held until the new session is saved, so concurrent begins cannot
        // both pass the limit check
        let _admission = if limits.max_active_sessions > 0 {
            Some(self.inner.admission.lock().await)
        } else {
            None
        };

        if limits.max_active_sessions > 0 {
            let active = self.active_session_count().await?;
            if active >= limits.max_active_sessions {
                return Err(BlobError::ResourceExhausted(format!(
                    "too many concurrent uploads (max: {})",
                    limits.max_active_sessions
                )));
            }
        }

        let session = UploadSession::new(request, declared_hash, caller, self.now());
        self.save(&session).await?;
        self.inner.hashes.init(session.id);

        tracing::info!(
            session_id = %session.id,
            owner = %session.owner_resource_id,
            caller = %caller,
            expected_bytes = session.expected_total_bytes,
            "Created upload session"
        );

        Ok(session)
    }

    /// Accept the next chunk of an upload
    pub async fn put_chunk(&self, session_id: Uuid, chunk_index: u64, bytes: &[u8]) -> Result<ChunkAck> {
        let (mut session, _) = self.observe(self.load(session_id).await?).await?;

        match session.state {
            SessionState::Pending | SessionState::InProgress => {}
            SessionState::Expired => {
                return Err(BlobError::NotFound(format!("session {} expired", session_id)))
            }
            other => {
                return Err(BlobError::InvalidState(format!(
                    "session {} is {} and accepts no chunks",
                    session_id, other
                )))
            }
        }

        if bytes.is_empty() {
            return Err(BlobError::InvalidArgument("chunk is empty".into()));
        }
        let max_chunk_size = self.inner.limits.max_chunk_size;
        if bytes.len() > max_chunk_size {
            return Err(BlobError::InvalidArgument(format!(
                "chunk of {} bytes exceeds maximum of {}",
                bytes.len(),
                max_chunk_size
            )));
        }

        let digest = compute_hash(bytes);

        // Retry of the chunk that was just accepted
        if chunk_index.checked_add(1) == Some(session.chunks_received) {
            if session.last_chunk_digest.as_deref() == Some(digest.as_str()) {
                tracing::debug!(
                    session_id = %session_id,
                    chunk_index = chunk_index,
                    "Duplicate chunk acknowledged"
                );
                return Ok(ChunkAck {
                    chunk_index,
                    bytes_written: 0,
                    bytes_received: session.bytes_received,
                    chunks_received: session.chunks_received,
                    complete: session.is_complete(),
                    duplicate: true,
                });
            }
            return Err(BlobError::InvalidArgument(format!(
                "chunk {} already received with different content",
                chunk_index
            )));
        }

        if chunk_index != session.chunks_received {
            return Err(BlobError::InvalidArgument(format!(
                "chunks must arrive in order: expected index {}, got {}",
                session.chunks_received, chunk_index
            )));
        }

        let len = bytes.len() as u64;
        if len > session.remaining_bytes() {
            return Err(BlobError::InvalidArgument(format!(
                "chunk of {} bytes exceeds the {} bytes remaining",
                len,
                session.remaining_bytes()
            )));
        }

        let key = session.key_prefix().key(chunk_index);
        self.inner.chunks.put(&key, bytes).await?;

        session.bytes_received += len;
        session.chunks_received += 1;
        session.last_chunk_digest = Some(digest);
        session.last_activity_at = self.now();
        session.state = SessionState::InProgress;
        self.save(&session).await?;

        // Hash only after the counters are durable, so a failed save leaves
        // the accumulator in step with the persisted byte count
        self.inner.hashes.update(session_id, bytes)?;

        tracing::debug!(
            session_id = %session_id,
            chunk_index = chunk_index,
            bytes_received = session.bytes_received,
            expected_bytes = session.expected_total_bytes,
            progress = format!("{:.1}%", session.progress()),
            "Chunk stored"
        );

        Ok(ChunkAck {
            chunk_index,
            bytes_written: len,
            bytes_received: session.bytes_received,
            chunks_received: session.chunks_received,
            complete: session.is_complete(),
            duplicate: false,
        })
    }

    /// Verify the upload and commit its blob reference
    pub async fn finish(&self, session_id: Uuid, declared_hash: Option<&str>) -> Result<BlobReference> {
        let (mut session, _) = self.observe(self.load(session_id).await?).await?;

        match session.state {
            SessionState::Pending | SessionState::InProgress => {}
            // An earlier finish verified the digest but did not get to commit
            SessionState::Finalizing => return self.commit(session).await,
            SessionState::Committed => {
                let blob_id = session.blob_id.clone().ok_or_else(|| {
                    BlobError::InvalidState(format!("committed session {} has no blob id", session_id))
                })?;
                return Err(BlobError::AlreadyFinalized(blob_id));
            }
            SessionState::Expired => {
                return Err(BlobError::NotFound(format!("session {} expired", session_id)))
            }
            SessionState::Aborted => {
                return Err(BlobError::InvalidState(format!("session {} is aborted", session_id)))
            }
        }

        if !session.is_complete() {
            return Err(BlobError::InvalidState(format!(
                "received {} of {} bytes",
                session.bytes_received, session.expected_total_bytes
            )));
        }

        let finish_hash = declared_hash.map(parse_digest).transpose()?;
        let declared = match (session.declared_hash.clone(), finish_hash) {
            (Some(at_begin), Some(at_finish)) if at_begin != at_finish => {
                self.fail_integrity(&mut session).await?;
                return Err(BlobError::IntegrityMismatch {
                    expected: at_begin,
                    actual: at_finish,
                });
            }
            (Some(hash), _) | (None, Some(hash)) => hash,
            (None, None) => {
                return Err(BlobError::InvalidArgument(
                    "no declared hash supplied at begin or finish".into(),
                ))
            }
        };

        let computed = self.inner.hashes.finalize(session_id)?;
        if computed != declared {
            self.fail_integrity(&mut session).await?;
            return Err(BlobError::IntegrityMismatch {
                expected: declared,
                actual: computed,
            });
        }

        session.declared_hash = Some(declared);
        session.computed_hash = Some(computed);
        session.blob_id = Some(BlobId::new());
        session.state = SessionState::Finalizing;
        session.last_activity_at = self.now();
        self.save(&session).await?;

        self.commit(session).await
    }

    /// Abort a session and reclaim its chunks.
    ///
    /// Repeating an abort succeeds and retries reclamation.
    pub async fn abort(&self, session_id: Uuid) -> Result<UploadSession> {
        let (mut session, _) = self.observe(self.load(session_id).await?).await?;

        match session.state {
            SessionState::Committed => {
                return Err(BlobError::InvalidState(format!(
                    "session {} is committed; delete its blob instead",
                    session_id
                )))
            }
            SessionState::Aborted | SessionState::Expired => {
                self.inner.cleanup.reclaim_session(&session).await?;
                return Ok(session);
            }
            SessionState::Pending | SessionState::InProgress | SessionState::Finalizing => {}
        }

        let was_finalizing = session.state == SessionState::Finalizing;
        session.state = SessionState::Aborted;
        session.last_activity_at = self.now();
        self.save(&session).await?;
        self.inner.hashes.release(session_id);

        if was_finalizing {
            self.inner.cleanup.discard_reference(&session).await?;
        }
        let reclaimed = self.inner.cleanup.reclaim_session(&session).await?;

        tracing::info!(
            session_id = %session_id,
            owner = %session.owner_resource_id,
            chunks_reclaimed = reclaimed,
            "Upload session aborted"
        );

        Ok(session)
    }

    /// Current state of a session, after lazy expiry
    pub async fn status(&self, session_id: Uuid) -> Result<UploadSession> {
        let (session, _) = self.observe(self.load(session_id).await?).await?;
        Ok(session)
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Apply expiry and restart-loss rules to every persisted session, then
    /// prune terminal sessions idle for longer than the inactivity window.
    ///
    /// A retained terminal session still answers `finish` with
    /// `AlreadyFinalized` and repeated `abort`s; after pruning, both report
    /// `NotFound`. Aborted and expired sessions are reclaimed once more
    /// before their record is removed, since the record holds the only
    /// handle on their chunk keys.
    ///
    /// Invoked by the host; the engine never schedules it itself.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for key in self.inner.store.keys(Collection::Sessions).await? {
            let Ok(session_id) = Uuid::parse_str(&key) else {
                tracing::warn!(key = %key, "Skipping malformed session key");
                continue;
            };
            let Some(session) = self.try_load(session_id).await? else {
                continue;
            };
            report.sessions_scanned += 1;

            let (session, lapse) = self.observe(session).await?;
            match lapse {
                Lapse::None => {}
                Lapse::Expired { reclaimed } => {
                    report.sessions_expired += 1;
                    report.chunks_reclaimed += reclaimed;
                }
                Lapse::Lost { reclaimed } => {
                    report.sessions_lost += 1;
                    report.chunks_reclaimed += reclaimed;
                }
            }

            if session.is_past_retention(self.now(), self.inner.limits.inactivity) {
                report.chunks_reclaimed += self.prune(&session).await?;
                report.sessions_pruned += 1;
            }
        }

        if report.sessions_expired > 0 || report.sessions_lost > 0 || report.sessions_pruned > 0 {
            tracing::info!(
                scanned = report.sessions_scanned,
                expired = report.sessions_expired,
                lost = report.sessions_lost,
                pruned = report.sessions_pruned,
                chunks_reclaimed = report.chunks_reclaimed,
                "Swept upload sessions"
            );
        }

        Ok(report)
    }

    /// Number of sessions still accepting chunks
    pub async fn active_session_count(&self) -> Result<usize> {
        let now = self.now();
        let mut count = 0;
        for key in self.inner.store.keys(Collection::Sessions).await? {
            let Ok(session_id) = Uuid::parse_str(&key) else {
                continue;
            };
            if let Some(session) = self.try_load(session_id).await? {
                if session.state.is_open() && !session.is_stale(now, self.inner.limits.inactivity) {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.inner.clock.now()
    }

    async fn try_load(&self, session_id: Uuid) -> Result<Option<UploadSession>> {
        match self
            .inner
            .store
            .get(Collection::Sessions, &session_id.to_string())
            .await?
        {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn load(&self, session_id: Uuid) -> Result<UploadSession> {
        self.try_load(session_id)
            .await?
            .ok_or_else(|| BlobError::NotFound(format!("session {}", session_id)))
    }

    async fn save(&self, session: &UploadSession) -> Result<()> {
        let json = serde_json::to_vec(session)?;
        self.inner
            .store
            .put(Collection::Sessions, &session.id.to_string(), &json)
            .await
    }

    /// Expire idle sessions and abort open sessions whose accumulator is gone
    async fn observe(&self, mut session: UploadSession) -> Result<(UploadSession, Lapse)> {
        if !session.state.is_open() {
            return Ok((session, Lapse::None));
        }

        let now = self.now();
        if session.is_stale(now, self.inner.limits.inactivity) {
            session.state = SessionState::Expired;
            self.save(&session).await?;
            self.inner.hashes.release(session.id);
            let reclaimed = self.inner.cleanup.reclaim_session(&session).await?;

            tracing::warn!(
                session_id = %session.id,
                idle_since = %session.last_activity_at,
                chunks_reclaimed = reclaimed,
                "Upload session expired"
            );
            return Ok((session, Lapse::Expired { reclaimed }));
        }

        if !self.inner.hashes.contains(session.id) {
            session.state = SessionState::Aborted;
            session.last_activity_at = now;
            self.save(&session).await?;
            let reclaimed = self.inner.cleanup.reclaim_session(&session).await?;

            tracing::warn!(
                session_id = %session.id,
                chunks_reclaimed = reclaimed,
                "Hash state lost for open session, aborted"
            );
            return Ok((session, Lapse::Lost { reclaimed }));
        }

        Ok((session, Lapse::None))
    }

    /// Delete a terminal session record, reclaiming first if it never committed
    async fn prune(&self, session: &UploadSession) -> Result<u64> {
        let reclaimed = match session.state {
            SessionState::Aborted | SessionState::Expired => {
                self.inner.cleanup.reclaim_session(session).await?
            }
            _ => 0,
        };
        self.inner
            .store
            .delete(Collection::Sessions, &session.id.to_string())
            .await?;

        tracing::debug!(
            session_id = %session.id,
            state = %session.state,
            "Pruned session record"
        );
        Ok(reclaimed)
    }

    /// Digest mismatch: terminal for the session
    async fn fail_integrity(&self, session: &mut UploadSession) -> Result<()> {
        session.state = SessionState::Aborted;
        session.last_activity_at = self.now();
        self.save(session).await?;
        self.inner.hashes.release(session.id);
        let reclaimed = self.inner.cleanup.reclaim_session(session).await?;

        tracing::warn!(
            session_id = %session.id,
            owner = %session.owner_resource_id,
            chunks_reclaimed = reclaimed,
            "Integrity check failed, session aborted"
        );
        Ok(())
    }

    async fn commit(&self, mut session: UploadSession) -> Result<BlobReference> {
        let reference = self.inner.finalizer.finalize(&session).await?;

        session.state = SessionState::Committed;
        session.last_activity_at = self.now();
        self.save(&session).await?;

        tracing::info!(
            session_id = %session.id,
            blob_id = %reference.blob_id,
            "Upload session committed"
        );

        Ok(reference)
    }
}

// ============================================================================
// Tests
// ============================================================================
