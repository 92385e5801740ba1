//! Chunked Upload Module
//!
//! Accepts large assets in bounded chunks and commits them as immutable,
//! content-verified blob references:
//! - Deterministic, session-scoped chunk keys (no collisions between
//!   concurrent uploads of the same owner)
//! - Rolling SHA-256 per session, verified at finish with no read-back
//! - Lazy expiry and reclamation of abandoned uploads
//! - Full or metadata-only deletion of committed assets
//!
//! Protocol Flow:
//! 1. Client begins a session for an owner resource, optionally declaring the hash
//! 2. Client sends chunks in index order
//! 3. Client finishes; the digest is checked and the blob is registered
//! 4. The record layer later deletes the blob through [`AssetCleanup`]

pub mod chunk_key;
pub mod chunk_store;
pub mod cleanup;
pub mod finalizer;
pub mod hasher;
pub mod session;
pub mod types;

pub use chunk_key::{chunk_key, ChunkKey, ChunkKeyPrefix};
pub use chunk_store::ChunkStore;
pub use cleanup::AssetCleanup;
pub use finalizer::BlobFinalizer;
pub use hasher::{compute_hash, HashRegistry};
pub use session::{SessionManager, UploadLimits};
pub use types::*;
