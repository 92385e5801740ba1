//! Asset Cleanup
//!
//! Reverses finalization for one blob or a set of derived blobs, and reclaims
//! the chunks of sessions that never committed. Every path is idempotent:
//! deleting something already gone succeeds and reports zero removals.

use std::sync::Arc;

use super::chunk_store::ChunkStore;
use super::finalizer::load_reference;
use super::types::{BlobId, BlobReference, DeleteMode, DeleteReport, UploadSession};
use crate::access::{authorize, AccessControl, Operation};
use crate::error::{BlobError, Result};
use crate::record::RecordSink;
use crate::storage::{Collection, KvStore};

#[derive(Clone)]
pub struct AssetCleanup {
    store: Arc<dyn KvStore>,
    chunks: ChunkStore,
    records: Arc<dyn RecordSink>,
    access: Arc<dyn AccessControl>,
}

impl AssetCleanup {
    pub fn new(
        store: Arc<dyn KvStore>,
        records: Arc<dyn RecordSink>,
        access: Arc<dyn AccessControl>,
    ) -> Self {
        Self {
            chunks: ChunkStore::new(store.clone()),
            store,
            records,
            access,
        }
    }

    /// Delete a committed blob.
    ///
    /// `FullDelete` removes chunks before the reference, so an interrupted
    /// delete can always be finished by calling it again with the same
    /// reference.
    pub async fn delete(
        &self,
        caller: &str,
        reference: &BlobReference,
        mode: DeleteMode,
    ) -> Result<DeleteReport> {
        authorize(
            self.access.as_ref(),
            caller,
            &reference.owner_resource_id,
            Operation::Delete,
        )
        .await?;

        let mut report = DeleteReport::default();

        if mode == DeleteMode::FullDelete {
            for key in reference.chunk_key_prefix.keys(reference.chunk_count) {
                if self.chunks.delete(&key).await? {
                    report.chunks_removed += 1;
                }
            }
        }

        if self
            .store
            .delete(Collection::Blobs, &reference.blob_id.to_string())
            .await?
        {
            report.references_removed += 1;
        }

        self.records
            .detach(&reference.owner_resource_id, &reference.blob_id)
            .await?;

        tracing::info!(
            blob_id = %reference.blob_id,
            owner = %reference.owner_resource_id,
            mode = ?mode,
            chunks_removed = report.chunks_removed,
            references_removed = report.references_removed,
            "Blob deleted"
        );

        Ok(report)
    }

    /// Delete a blob named by its textual id
    pub async fn delete_by_id(&self, caller: &str, blob_id: &str, mode: DeleteMode) -> Result<DeleteReport> {
        let blob_id = BlobId::parse(blob_id)?;
        let reference = load_reference(self.store.as_ref(), &blob_id)
            .await?
            .ok_or_else(|| BlobError::NotFound(format!("blob {}", blob_id)))?;

        self.delete(caller, &reference, mode).await
    }

    /// Delete a set of derived blobs.
    ///
    /// Every id is validated before anything is removed. Ids with no stored
    /// reference are skipped, so the call can be repeated after a partial
    /// failure.
    pub async fn delete_set(&self, caller: &str, blob_ids: &[String], mode: DeleteMode) -> Result<DeleteReport> {
        let ids = blob_ids
            .iter()
            .map(|id| BlobId::parse(id))
            .collect::<Result<Vec<_>>>()?;

        let mut total = DeleteReport::default();
        for blob_id in &ids {
            match load_reference(self.store.as_ref(), blob_id).await? {
                Some(reference) => {
                    let report = self.delete(caller, &reference, mode).await?;
                    total.merge(&report);
                }
                None => {
                    tracing::debug!(blob_id = %blob_id, "Blob already gone, skipping");
                }
            }
        }

        Ok(total)
    }

    /// Remove the chunks written by a session that will never commit.
    ///
    /// Covers the slot at `chunks_received` as well: `put_chunk` writes the
    /// chunk before it persists the advanced counter, so a crash or failed
    /// save in between leaves bytes there that no record accounts for.
    pub async fn reclaim_session(&self, session: &UploadSession) -> Result<u64> {
        let mut removed = 0;
        let slots = session.chunks_received.saturating_add(1);
        for key in session.key_prefix().keys(slots) {
            if self.chunks.delete(&key).await? {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(
                session_id = %session.id,
                chunks = removed,
                "Reclaimed session chunks"
            );
        }

        Ok(removed)
    }

    /// Drop a reference that a failed finalize may have persisted
    pub async fn discard_reference(&self, session: &UploadSession) -> Result<()> {
        if let Some(blob_id) = &session.blob_id {
            self.store.delete(Collection::Blobs, &blob_id.to_string()).await?;
            self.records.detach(&session.owner_resource_id, blob_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::GrantTable;
    use crate::upload::testing::{request, Harness};
    use crate::upload::UploadLimits;

    #[tokio::test]
    async fn test_full_delete_removes_every_chunk_then_nothing() {
        let h = Harness::new();
        let blob = h.upload("r1", &[b"ab", b"cde", b"f", b"ghij"]).await;
        assert_eq!(h.chunk_entries().await, 4);

        let cleanup = h.manager.cleanup();
        let report = cleanup.delete("alice", &blob, DeleteMode::FullDelete).await.unwrap();
        assert_eq!(report.chunks_removed, 4);
        assert_eq!(report.references_removed, 1);
        assert_eq!(h.chunk_entries().await, 0);
        assert_eq!(h.store.count(Collection::Blobs).await.unwrap(), 0);
        assert!(h.records.attached("r1").is_empty());

        let again = cleanup.delete("alice", &blob, DeleteMode::FullDelete).await.unwrap();
        assert_eq!(again, DeleteReport::default());
    }

    #[tokio::test]
    async fn test_full_delete_after_partial_delete() {
        let h = Harness::new();
        let blob = h.upload("r1", &[b"abc", b"def", b"ghi"]).await;

        // One chunk already gone, e.g. from an interrupted earlier delete
        h.manager
            .chunks()
            .delete(&blob.chunk_key_prefix.key(1))
            .await
            .unwrap();

        let report = h
            .manager
            .cleanup()
            .delete("alice", &blob, DeleteMode::FullDelete)
            .await
            .unwrap();
        assert_eq!(report.chunks_removed, 2);
        assert_eq!(report.references_removed, 1);
    }

    #[tokio::test]
    async fn test_metadata_only_keeps_chunks() {
        let h = Harness::new();
        let blob = h.upload("r1", &[b"abc", b"def"]).await;

        let report = h
            .manager
            .cleanup()
            .delete("alice", &blob, DeleteMode::MetadataOnly)
            .await
            .unwrap();
        assert_eq!(report.chunks_removed, 0);
        assert_eq!(report.references_removed, 1);
        assert_eq!(h.chunk_entries().await, 2);
        assert!(h.records.attached("r1").is_empty());

        // Chunks stay readable through the caller's copy of the reference
        let content = h
            .manager
            .chunks()
            .assemble(&blob.chunk_key_prefix, blob.chunk_count)
            .await
            .unwrap();
        assert_eq!(content, b"abcdef");
    }

    #[tokio::test]
    async fn test_delete_by_id_uses_strict_parser() {
        let h = Harness::new();
        let blob = h.upload("r1", &[b"abc"]).await;
        let cleanup = h.manager.cleanup();

        let loose = blob.blob_id.as_uuid().hyphenated().to_string();
        assert!(matches!(
            cleanup.delete_by_id("alice", &loose, DeleteMode::FullDelete).await,
            Err(BlobError::InvalidArgument(_))
        ));
        let shouted = blob.blob_id.to_string().to_uppercase();
        assert!(matches!(
            cleanup.delete_by_id("alice", &shouted, DeleteMode::FullDelete).await,
            Err(BlobError::InvalidArgument(_))
        ));

        let report = cleanup
            .delete_by_id("alice", &blob.blob_id.to_string(), DeleteMode::FullDelete)
            .await
            .unwrap();
        assert_eq!(report.chunks_removed, 1);

        assert!(matches!(
            cleanup
                .delete_by_id("alice", &blob.blob_id.to_string(), DeleteMode::FullDelete)
                .await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_set_of_derived_assets() {
        let h = Harness::new();
        let original = h.upload("memory-7", &[b"full-size", b" photo"]).await;
        let thumb = h.upload("memory-7", &[b"thumb"]).await;
        let preview = h.upload("memory-7", &[b"pre", b"view"]).await;
        let unrelated = h.upload("memory-8", &[b"keep me"]).await;

        let ids = vec![
            original.blob_id.to_string(),
            thumb.blob_id.to_string(),
            preview.blob_id.to_string(),
        ];
        let cleanup = h.manager.cleanup();

        let report = cleanup.delete_set("alice", &ids, DeleteMode::FullDelete).await.unwrap();
        assert_eq!(report.chunks_removed, 5);
        assert_eq!(report.references_removed, 3);
        assert!(h.records.attached("memory-7").is_empty());
        assert_eq!(h.records.attached("memory-8"), vec![unrelated]);
        assert_eq!(h.chunk_entries().await, 1);

        let again = cleanup.delete_set("alice", &ids, DeleteMode::FullDelete).await.unwrap();
        assert_eq!(again, DeleteReport::default());
    }

    #[tokio::test]
    async fn test_delete_set_validates_before_deleting() {
        let h = Harness::new();
        let blob = h.upload("r1", &[b"abc"]).await;

        let ids = vec![blob.blob_id.to_string(), "blob-garbage".to_string()];
        let result = h
            .manager
            .cleanup()
            .delete_set("alice", &ids, DeleteMode::FullDelete)
            .await;
        assert!(matches!(result, Err(BlobError::InvalidArgument(_))));
        assert_eq!(h.chunk_entries().await, 1);
        assert_eq!(h.records.total_attached(), 1);
    }

    #[tokio::test]
    async fn test_delete_requires_capability() {
        let grants = Arc::new(GrantTable::new());
        grants.grant("alice", "r1", Operation::Write);
        let h = Harness::with(grants.clone(), UploadLimits::default());
        let blob = h.upload("r1", &[b"abc"]).await;

        let result = h
            .manager
            .cleanup()
            .delete("alice", &blob, DeleteMode::FullDelete)
            .await;
        assert!(matches!(result, Err(BlobError::Unauthorized(_))));
        assert_eq!(h.chunk_entries().await, 1);

        grants.grant("alice", "r1", Operation::Delete);
        h.manager
            .cleanup()
            .delete("alice", &blob, DeleteMode::FullDelete)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reclaim_covers_unacknowledged_slot() {
        let h = Harness::new();
        let session = h.manager.begin("alice", &request("r1", 9, None)).await.unwrap();
        h.manager.put_chunk(session.id, 0, b"abc").await.unwrap();

        // Chunk 1 written but its counter never persisted
        let snapshot = h.manager.status(session.id).await.unwrap();
        h.manager
            .chunks()
            .put(&snapshot.key_prefix().key(1), b"def")
            .await
            .unwrap();
        assert_eq!(h.chunk_entries().await, 2);

        let removed = h.manager.cleanup().reclaim_session(&snapshot).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(h.chunk_entries().await, 0);
    }

    #[tokio::test]
    async fn test_abort_then_reclaim_leaves_no_chunks() {
        let h = Harness::new();
        let session = h.manager.begin("alice", &request("r1", 9, None)).await.unwrap();
        h.manager.put_chunk(session.id, 0, b"abc").await.unwrap();
        h.manager.put_chunk(session.id, 1, b"def").await.unwrap();

        let aborted = h.manager.abort(session.id).await.unwrap();
        let removed = h.manager.cleanup().reclaim_session(&aborted).await.unwrap();

        assert_eq!(removed, 0);
        assert_eq!(h.chunk_entries().await, 0);
        for index in 0..2 {
            let key = aborted.key_prefix().key(index);
            assert!(!h.manager.chunks().contains(&key).await.unwrap());
        }
    }
}
