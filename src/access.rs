//! Access-control gate
//!
//! Policy lives in an external index; the engine only asks whether a caller
//! may perform an operation on an owner resource.

use std::collections::HashSet;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{BlobError, Result};

/// Operation being authorized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Write,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Capability check against the external access-control index
#[async_trait::async_trait]
pub trait AccessControl: Send + Sync {
    async fn is_allowed(&self, caller: &str, owner_resource_id: &str, operation: Operation) -> bool;
}

/// Allows everything; for hosts that enforce access upstream
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait::async_trait]
impl AccessControl for AllowAll {
    async fn is_allowed(&self, _caller: &str, _owner: &str, _operation: Operation) -> bool {
        true
    }
}

/// Explicit grant table: anything not granted is denied
#[derive(Debug, Default)]
pub struct GrantTable {
    grants: RwLock<HashSet<(String, String, Operation)>>,
}

impl GrantTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, caller: &str, owner_resource_id: &str, operation: Operation) {
        self.grants
            .write()
            .insert((caller.to_string(), owner_resource_id.to_string(), operation));
    }

    pub fn revoke(&self, caller: &str, owner_resource_id: &str, operation: Operation) {
        self.grants
            .write()
            .remove(&(caller.to_string(), owner_resource_id.to_string(), operation));
    }
}

#[async_trait::async_trait]
impl AccessControl for GrantTable {
    async fn is_allowed(&self, caller: &str, owner_resource_id: &str, operation: Operation) -> bool {
        self.grants
            .read()
            .contains(&(caller.to_string(), owner_resource_id.to_string(), operation))
    }
}

/// Fail with `Unauthorized` unless the gate allows the operation
pub async fn authorize(
    access: &dyn AccessControl,
    caller: &str,
    owner_resource_id: &str,
    operation: Operation,
) -> Result<()> {
    if access.is_allowed(caller, owner_resource_id, operation).await {
        return Ok(());
    }

    tracing::warn!(
        caller = %caller,
        owner = %owner_resource_id,
        operation = %operation,
        "Access denied"
    );

    Err(BlobError::Unauthorized(format!(
        "{} may not {} {}",
        caller, operation, owner_resource_id
    )))
}
