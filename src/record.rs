//! Record layer boundary
//!
//! The memory/record model that owns committed assets. The engine attaches a
//! reference on commit and detaches it on delete; both calls must be
//! idempotent because finish and delete may be retried.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use crate::error::Result;
use crate::upload::{BlobId, BlobReference};

#[async_trait::async_trait]
pub trait RecordSink: Send + Sync {
    /// Attach a committed blob to its owning record
    async fn attach(&self, reference: &BlobReference) -> Result<()>;

    /// Detach a blob, returning whether it was attached
    async fn detach(&self, owner_resource_id: &str, blob_id: &BlobId) -> Result<bool>;
}

/// In-process record layer keyed by owner resource id
#[derive(Debug, Default)]
pub struct InMemoryRecords {
    records: RwLock<HashMap<String, BTreeMap<String, BlobReference>>>,
}

impl InMemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// References currently attached to an owner, ordered by blob id
    pub fn attached(&self, owner_resource_id: &str) -> Vec<BlobReference> {
        self.records
            .read()
            .get(owner_resource_id)
            .map(|blobs| blobs.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn total_attached(&self) -> usize {
        self.records.read().values().map(BTreeMap::len).sum()
    }
}

#[async_trait::async_trait]
impl RecordSink for InMemoryRecords {
    async fn attach(&self, reference: &BlobReference) -> Result<()> {
        self.records
            .write()
            .entry(reference.owner_resource_id.clone())
            .or_default()
            .insert(reference.blob_id.to_string(), reference.clone());
        Ok(())
    }

    async fn detach(&self, owner_resource_id: &str, blob_id: &BlobId) -> Result<bool> {
        let mut records = self.records.write();
        let Some(blobs) = records.get_mut(owner_resource_id) else {
            return Ok(false);
        };
        let removed = blobs.remove(&blob_id.to_string()).is_some();
        if blobs.is_empty() {
            records.remove(owner_resource_id);
        }
        Ok(removed)
    }
}
