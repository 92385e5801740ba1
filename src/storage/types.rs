//! Storage types

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default maximum single value size accepted by a store: 8MB
pub const DEFAULT_MAX_VALUE_SIZE: usize = 8 * 1024 * 1024;

/// Keyed collection within the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    /// Upload session metadata keyed by session id
    Sessions,
    /// Raw chunk bytes keyed by chunk key
    Chunks,
    /// Blob references keyed by blob id
    Blobs,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sessions => "sessions",
            Self::Chunks => "chunks",
            Self::Blobs => "blobs",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable key-value store shared by every engine operation.
///
/// Values are opaque bytes. Implementations reject values larger than
/// [`KvStore::max_value_size`] with `ResourceExhausted`.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Get a value, or `None` if the key is absent
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite a value
    async fn put(&self, collection: Collection, key: &str, value: &[u8]) -> Result<()>;

    /// Delete a value, returning whether it existed
    async fn delete(&self, collection: Collection, key: &str) -> Result<bool>;

    /// List every key in a collection
    async fn keys(&self, collection: Collection) -> Result<Vec<String>>;

    /// Number of entries in a collection
    async fn count(&self, collection: Collection) -> Result<usize>;

    /// Largest value the store accepts
    fn max_value_size(&self) -> usize;
}

/// Reject a value that exceeds the store bound
pub(crate) fn check_value_size(collection: Collection, value: &[u8], max: usize) -> Result<()> {
    if value.len() > max {
        return Err(crate::error::BlobError::ResourceExhausted(format!(
            "{} value of {} bytes exceeds store limit of {} bytes",
            collection,
            value.len(),
            max
        )));
    }
    Ok(())
}
