//! Durable key-value storage backends
//!
//! The engine persists three collections (sessions, chunks, blob references)
//! in a single store with a bounded value size.

mod memory;
mod sqlite;
mod types;

pub use memory::MemoryKvStore;
pub use sqlite::{create_pool, SqliteKvStore};
pub use types::*;
