//! Vault Uploads
//!
//! Chunked upload and content-addressed blob storage for a personal-memory
//! vault. The engine lives in [`upload`]; [`routes`] exposes it over HTTP and
//! the binary in main.rs wires configuration, storage and logging.

pub mod access;
pub mod clock;
pub mod config;
pub mod error;
pub mod record;
pub mod routes;
pub mod state;
pub mod storage;
pub mod upload;
