//! Blob Finalizer
//!
//! Turns a verified session into an immutable [`BlobReference`], persists it
//! under its reserved blob id, and attaches it to the owning record. No chunk
//! is read back: the reference is built from session metadata alone.

use std::sync::Arc;

use super::types::{BlobId, BlobReference, SessionState, UploadSession};
use crate::error::{BlobError, Result};
use crate::record::RecordSink;
use crate::storage::{Collection, KvStore};

#[derive(Clone)]
pub struct BlobFinalizer {
    store: Arc<dyn KvStore>,
    records: Arc<dyn RecordSink>,
}

impl BlobFinalizer {
    pub fn new(store: Arc<dyn KvStore>, records: Arc<dyn RecordSink>) -> Self {
        Self { store, records }
    }

    /// Register the blob for a session in `Finalizing`.
    ///
    /// The blob id is reserved before this is called, so a retry after a
    /// partial failure rewrites the same reference and re-attaches the same id.
    pub async fn finalize(&self, session: &UploadSession) -> Result<BlobReference> {
        match session.state {
            SessionState::Finalizing => {}
            SessionState::Committed => {
                let blob_id = session.blob_id.clone().ok_or_else(|| {
                    BlobError::InvalidState(format!("committed session {} has no blob id", session.id))
                })?;
                return Err(BlobError::AlreadyFinalized(blob_id));
            }
            other => {
                return Err(BlobError::InvalidState(format!(
                    "session {} is {}, not finalizing",
                    session.id, other
                )))
            }
        }

        let (Some(blob_id), Some(content_hash)) = (&session.blob_id, &session.computed_hash) else {
            return Err(BlobError::InvalidState(format!(
                "session {} entered finalizing without a verified digest",
                session.id
            )));
        };

        let reference = match load_reference(self.store.as_ref(), blob_id).await? {
            Some(existing) => existing,
            None => {
                let reference = BlobReference {
                    blob_id: blob_id.clone(),
                    owner_resource_id: session.owner_resource_id.clone(),
                    size_bytes: session.bytes_received,
                    content_hash: content_hash.clone(),
                    chunk_count: session.chunks_received,
                    chunk_key_prefix: session.key_prefix(),
                    created_at: session.last_activity_at,
                };
                let json = serde_json::to_vec(&reference)?;
                self.store
                    .put(Collection::Blobs, &blob_id.to_string(), &json)
                    .await?;
                reference
            }
        };

        self.records.attach(&reference).await?;

        tracing::info!(
            session_id = %session.id,
            blob_id = %reference.blob_id,
            owner = %reference.owner_resource_id,
            size = reference.size_bytes,
            chunks = reference.chunk_count,
            "Blob registered"
        );

        Ok(reference)
    }

    /// Look up a committed blob reference
    pub async fn get(&self, blob_id: &BlobId) -> Result<BlobReference> {
        load_reference(self.store.as_ref(), blob_id)
            .await?
            .ok_or_else(|| BlobError::NotFound(format!("blob {}", blob_id)))
    }
}

pub(crate) async fn load_reference(store: &dyn KvStore, blob_id: &BlobId) -> Result<Option<BlobReference>> {
    match store.get(Collection::Blobs, &blob_id.to_string()).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}
