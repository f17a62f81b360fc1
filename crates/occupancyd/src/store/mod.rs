//! Accessory persistence.
//!
//! The store remembers which devices have already been provisioned, so that a
//! restarted daemon restores them instead of registering them with the host a
//! second time.

mod file;
mod memory;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::engine::AccessoryIdentity;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// A provisioned accessory as persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAccessory {
    pub identity: AccessoryIdentity,

    /// External id the identity was derived from
    pub device_id: String,

    /// Name shown by the host platform
    pub display_name: String,
}

impl StoredAccessory {
    /// Create the record for a device seen for the first time.
    pub fn new(device_id: &str) -> Self {
        Self {
            identity: AccessoryIdentity::derive(device_id),
            device_id: device_id.to_string(),
            display_name: device_id.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to access accessory store {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to decode accessory store {0}: {1}")]
    Decode(PathBuf, #[source] serde_json::Error),

    #[error("Failed to encode accessory store: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Accessory {0} is already stored")]
    Duplicate(AccessoryIdentity),
}

/// Persistent mapping of accessory identities.
///
/// Implementations must be safe to share between tasks; the registry only
/// writes on first-seen provisioning and on device removal.
#[async_trait]
pub trait AccessoryStore: Send + Sync {
    /// Look up a previously provisioned accessory
    async fn lookup(
        &self,
        identity: &AccessoryIdentity,
    ) -> Result<Option<StoredAccessory>, StoreError>;

    /// Persist a newly provisioned accessory.
    ///
    /// Fails with [`StoreError::Duplicate`] if the identity is already stored.
    async fn insert(&self, accessory: StoredAccessory) -> Result<(), StoreError>;

    /// Forget an accessory. Returns whether it was stored.
    async fn remove(&self, identity: &AccessoryIdentity) -> Result<bool, StoreError>;

    /// All stored accessories, ordered by identity
    async fn list(&self) -> Result<Vec<StoredAccessory>, StoreError>;
}
