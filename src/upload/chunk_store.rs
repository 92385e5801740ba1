//! Chunk Store
//!
//! Pure key → bytes map over the `chunks` collection. Sequencing rules live in
//! the session manager; this layer only reads, writes and deletes.

use std::sync::Arc;

use super::chunk_key::{ChunkKey, ChunkKeyPrefix};
use crate::error::{BlobError, Result};
use crate::storage::{Collection, KvStore};

#[derive(Clone)]
pub struct ChunkStore {
    store: Arc<dyn KvStore>,
}

impl ChunkStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Write a chunk, overwriting any previous value under the same key
    pub async fn put(&self, key: &ChunkKey, bytes: &[u8]) -> Result<()> {
        self.store.put(Collection::Chunks, &key.to_hex(), bytes).await
    }

    pub async fn get(&self, key: &ChunkKey) -> Result<Vec<u8>> {
        self.store
            .get(Collection::Chunks, &key.to_hex())
            .await?
            .ok_or_else(|| BlobError::NotFound(format!("chunk {}", key)))
    }

    /// Delete a chunk, returning whether it existed
    pub async fn delete(&self, key: &ChunkKey) -> Result<bool> {
        self.store.delete(Collection::Chunks, &key.to_hex()).await
    }

    pub async fn contains(&self, key: &ChunkKey) -> Result<bool> {
        Ok(self.store.get(Collection::Chunks, &key.to_hex()).await?.is_some())
    }

    /// Read chunks `0..chunk_count` under `prefix` back into one buffer
    pub async fn assemble(&self, prefix: &ChunkKeyPrefix, chunk_count: u64) -> Result<Vec<u8>> {
        let mut result = Vec::new();

        for key in prefix.keys(chunk_count) {
            let chunk = self.get(&key).await?;
            result.extend_from_slice(&chunk);
        }

        Ok(result)
    }

    /// Largest chunk the backing store accepts
    pub fn max_value_size(&self) -> usize {
        self.store.max_value_size()
    }
}
