//! Rolling hash accumulators
//!
//! One SHA-256 state per in-flight session, kept only in process memory. The
//! registry is deliberately not persisted: after a restart it starts empty and
//! the session manager aborts any open session it no longer has state for.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{BlobError, Result};

/// Registry of live hash accumulators, keyed by session id
#[derive(Clone, Default)]
pub struct HashRegistry {
    inner: Arc<Mutex<HashMap<Uuid, Sha256>>>,
}

impl HashRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh accumulator, replacing any previous one for the session
    pub fn init(&self, session_id: Uuid) {
        self.inner.lock().insert(session_id, Sha256::new());
    }

    /// Feed bytes in arrival order
    pub fn update(&self, session_id: Uuid, bytes: &[u8]) -> Result<()> {
        let mut accumulators = self.inner.lock();
        let hasher = accumulators.get_mut(&session_id).ok_or_else(|| {
            BlobError::InvalidState(format!("no hash accumulator for session {}", session_id))
        })?;
        hasher.update(bytes);
        Ok(())
    }

    /// Consume the accumulator and return its hex digest.
    ///
    /// The accumulator is removed, so a second call fails.
    pub fn finalize(&self, session_id: Uuid) -> Result<String> {
        let hasher = self.inner.lock().remove(&session_id).ok_or_else(|| {
            BlobError::InvalidState(format!(
                "hash accumulator for session {} already finalized or missing",
                session_id
            ))
        })?;
        Ok(hex::encode(hasher.finalize()))
    }

    /// Drop the accumulator without producing a digest
    pub fn release(&self, session_id: Uuid) -> bool {
        self.inner.lock().remove(&session_id).is_some()
    }

    pub fn contains(&self, session_id: Uuid) -> bool {
        self.inner.lock().contains_key(&session_id)
    }
}

/// Compute SHA-256 hash of data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_digest_matches_one_shot() {
        let registry = HashRegistry::new();
        let id = Uuid::new_v4();

        registry.init(id);
        registry.update(id, b"abc").unwrap();
        registry.update(id, b"def").unwrap();
        registry.update(id, b"ghi").unwrap();

        assert_eq!(registry.finalize(id).unwrap(), compute_hash(b"abcdefghi"));
    }

    #[test]
    fn test_finalize_is_single_use() {
        let registry = HashRegistry::new();
        let id = Uuid::new_v4();
        registry.init(id);
        registry.finalize(id).unwrap();

        assert!(matches!(registry.finalize(id), Err(BlobError::InvalidState(_))));
        assert!(matches!(
            registry.update(id, b"late"),
            Err(BlobError::InvalidState(_))
        ));
    }

    #[test]
    fn test_sessions_are_isolated() {
        let registry = HashRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        registry.init(a);
        registry.init(b);

        registry.update(a, b"left").unwrap();
        registry.update(b, b"right").unwrap();

        assert_eq!(registry.finalize(b).unwrap(), compute_hash(b"right"));
        assert_eq!(registry.finalize(a).unwrap(), compute_hash(b"left"));
    }

    #[test]
    fn test_release() {
        let registry = HashRegistry::new();
        let id = Uuid::new_v4();
        registry.init(id);
        assert!(registry.contains(id));
        assert!(registry.release(id));
        assert!(!registry.release(id));
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_compute_hash() {
        let hash = compute_hash(b"Hello, World!");
        assert_eq!(hash.len(), 64); // SHA-256 = 32 bytes = 64 hex chars
    }
}
