//! Deterministic chunk key derivation
//!
//! A chunk key is a pure function of `(owner_resource_id, session_id,
//! chunk_index)`. Derivation runs in two SHA-256 stages so a committed blob
//! only needs to remember the 32-byte session prefix to regenerate every key:
//!
//! ```text
//! prefix = SHA256("vault-uploads/chunk-prefix/v1" || len(owner) || owner || session_id)
//! key    = SHA256("vault-uploads/chunk-key/v1"    || prefix || chunk_index_be64)
//! ```
//!
//! The session id is always part of the input, so two sessions never share a
//! key even when they upload for the same owner.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{BlobError, Result};

const PREFIX_TAG: &[u8] = b"vault-uploads/chunk-prefix/v1";
const KEY_TAG: &[u8] = b"vault-uploads/chunk-key/v1";

/// Per-session root of the chunk key space
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChunkKeyPrefix([u8; 32]);

impl ChunkKeyPrefix {
    pub fn derive(owner_resource_id: &str, session_id: Uuid) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(PREFIX_TAG);
        hasher.update((owner_resource_id.len() as u64).to_be_bytes());
        hasher.update(owner_resource_id.as_bytes());
        hasher.update(session_id.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Key of the chunk at `chunk_index`
    pub fn key(&self, chunk_index: u64) -> ChunkKey {
        let mut hasher = Sha256::new();
        hasher.update(KEY_TAG);
        hasher.update(self.0);
        hasher.update(chunk_index.to_be_bytes());
        ChunkKey(hasher.finalize().into())
    }

    /// Keys of chunks `0..chunk_count`, in index order
    pub fn keys(&self, chunk_count: u64) -> impl Iterator<Item = ChunkKey> {
        let prefix = *self;
        (0..chunk_count).map(move |index| prefix.key(index))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse 64 lowercase hex characters
    pub fn from_hex(s: &str) -> Result<Self> {
        let invalid = || BlobError::InvalidArgument(format!("malformed chunk key prefix: {:?}", s));

        if s.len() != 64 || s.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(invalid());
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| invalid())?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ChunkKeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ChunkKeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkKeyPrefix({})", self.to_hex())
    }
}

impl TryFrom<String> for ChunkKeyPrefix {
    type Error = BlobError;

    fn try_from(s: String) -> Result<Self> {
        Self::from_hex(&s)
    }
}

impl From<ChunkKeyPrefix> for String {
    fn from(prefix: ChunkKeyPrefix) -> Self {
        prefix.to_hex()
    }
}

/// Storage key of a single chunk
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey([u8; 32]);

impl ChunkKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkKey({})", self.to_hex())
    }
}

/// Derive the key for one chunk directly from its coordinates
pub fn chunk_key(owner_resource_id: &str, session_id: Uuid, chunk_index: u64) -> ChunkKey {
    ChunkKeyPrefix::derive(owner_resource_id, session_id).key(chunk_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_derivation_is_deterministic() {
        let session = Uuid::new_v4();
        assert_eq!(chunk_key("r1", session, 7), chunk_key("r1", session, 7));
        assert_eq!(
            ChunkKeyPrefix::derive("r1", session).key(7),
            chunk_key("r1", session, 7)
        );
    }

    #[test]
    fn test_every_coordinate_changes_the_key() {
        let session = Uuid::new_v4();
        let base = chunk_key("r1", session, 0);
        assert_ne!(base, chunk_key("r2", session, 0));
        assert_ne!(base, chunk_key("r1", Uuid::new_v4(), 0));
        assert_ne!(base, chunk_key("r1", session, 1));
    }

    #[test]
    fn test_owner_length_is_framed() {
        // Without the length prefix these two inputs would hash the same bytes
        let session = Uuid::new_v4();
        let a = ChunkKeyPrefix::derive("ab", session);
        let b = ChunkKeyPrefix::derive("a", session);
        assert_ne!(a, b);
    }

    #[test]
    fn test_parallel_sessions_have_disjoint_key_spaces() {
        // 10,000 simulated pairs of concurrently active sessions on one owner,
        // each writing a pseudo-random number of chunks
        for round in 0..10_000u32 {
            let s1 = Uuid::new_v4();
            let s2 = Uuid::new_v4();
            let n1 = 1 + (s1.as_bytes()[0] % 8) as u64;
            let n2 = 1 + (s2.as_bytes()[0] % 8) as u64;

            let p1 = ChunkKeyPrefix::derive("r1", s1);
            let p2 = ChunkKeyPrefix::derive("r1", s2);
            let keys1: HashSet<ChunkKey> = p1.keys(n1).collect();

            assert_eq!(keys1.len() as u64, n1);
            assert!(
                p2.keys(n2).all(|k| !keys1.contains(&k)),
                "collision in round {}",
                round
            );
        }
    }

    #[test]
    fn test_prefix_hex_round_trip() {
        let prefix = ChunkKeyPrefix::derive("r1", Uuid::new_v4());
        let hex = prefix.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(ChunkKeyPrefix::from_hex(&hex).unwrap(), prefix);

        assert!(ChunkKeyPrefix::from_hex(&hex.to_uppercase()).is_err());
        assert!(ChunkKeyPrefix::from_hex(&hex[..62]).is_err());
        assert!(ChunkKeyPrefix::from_hex(&"z".repeat(64)).is_err());
    }

    #[test]
    fn test_keys_iterates_in_index_order() {
        let prefix = ChunkKeyPrefix::derive("r1", Uuid::new_v4());
        let keys: Vec<ChunkKey> = prefix.keys(3).collect();
        assert_eq!(keys, vec![prefix.key(0), prefix.key(1), prefix.key(2)]);
        assert_eq!(prefix.keys(0).count(), 0);
    }
}
