//! In-memory key-value store

use std::collections::HashMap;

use parking_lot::RwLock;

use super::types::{check_value_size, Collection, KvStore, DEFAULT_MAX_VALUE_SIZE};
use crate::error::Result;

/// Store backed by a `RwLock<HashMap>` per collection.
///
/// Useful for tests and for hosts that provide durability some other way.
pub struct MemoryKvStore {
    collections: RwLock<HashMap<Collection, HashMap<String, Vec<u8>>>>,
    max_value_size: usize,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::with_max_value_size(DEFAULT_MAX_VALUE_SIZE)
    }

    pub fn with_max_value_size(max_value_size: usize) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            max_value_size,
        }
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>> {
        let collections = self.collections.read();
        Ok(collections
            .get(&collection)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put(&self, collection: Collection, key: &str, value: &[u8]) -> Result<()> {
        check_value_size(collection, value, self.max_value_size)?;
        let mut collections = self.collections.write();
        collections
            .entry(collection)
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<bool> {
        let mut collections = self.collections.write();
        Ok(collections
            .get_mut(&collection)
            .map(|entries| entries.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn keys(&self, collection: Collection) -> Result<Vec<String>> {
        let collections = self.collections.read();
        let mut keys: Vec<String> = collections
            .get(&collection)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }

    async fn count(&self, collection: Collection) -> Result<usize> {
        let collections = self.collections.read();
        Ok(collections.get(&collection).map_or(0, HashMap::len))
    }

    fn max_value_size(&self) -> usize {
        self.max_value_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlobError;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryKvStore::new();

        store.put(Collection::Chunks, "k1", b"one").await.unwrap();
        assert_eq!(
            store.get(Collection::Chunks, "k1").await.unwrap(),
            Some(b"one".to_vec())
        );

        // Overwrite is idempotent
        store.put(Collection::Chunks, "k1", b"uno").await.unwrap();
        assert_eq!(
            store.get(Collection::Chunks, "k1").await.unwrap(),
            Some(b"uno".to_vec())
        );

        assert!(store.delete(Collection::Chunks, "k1").await.unwrap());
        assert!(!store.delete(Collection::Chunks, "k1").await.unwrap());
        assert_eq!(store.get(Collection::Chunks, "k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_collections_are_separate() {
        let store = MemoryKvStore::new();
        store.put(Collection::Sessions, "same", b"s").await.unwrap();
        store.put(Collection::Blobs, "same", b"b").await.unwrap();

        assert_eq!(store.count(Collection::Sessions).await.unwrap(), 1);
        assert_eq!(store.count(Collection::Blobs).await.unwrap(), 1);
        assert_eq!(store.count(Collection::Chunks).await.unwrap(), 0);
        assert_eq!(
            store.keys(Collection::Sessions).await.unwrap(),
            vec!["same".to_string()]
        );
    }

    #[tokio::test]
    async fn test_value_size_limit() {
        let store = MemoryKvStore::with_max_value_size(4);
        store.put(Collection::Chunks, "ok", b"1234").await.unwrap();

        let result = store.put(Collection::Chunks, "big", b"12345").await;
        assert!(matches!(result, Err(BlobError::ResourceExhausted(_))));
        assert_eq!(store.get(Collection::Chunks, "big").await.unwrap(), None);
    }
}
