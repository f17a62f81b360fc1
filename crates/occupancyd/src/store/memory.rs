use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::AccessoryStore;
use super::StoreError;
use super::StoredAccessory;
use crate::engine::AccessoryIdentity;

/// In-process accessory store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    accessories: Mutex<BTreeMap<AccessoryIdentity, StoredAccessory>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already knows about `accessories`, as if they had
    /// been provisioned by an earlier run.
    pub fn with_accessories(accessories: impl IntoIterator<Item = StoredAccessory>) -> Self {
        Self {
            accessories: Mutex::new(
                accessories
                    .into_iter()
                    .map(|a| (a.identity, a))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl AccessoryStore for MemoryStore {
    async fn lookup(
        &self,
        identity: &AccessoryIdentity,
    ) -> Result<Option<StoredAccessory>, StoreError> {
        Ok(self.accessories.lock().await.get(identity).cloned())
    }

    async fn insert(&self, accessory: StoredAccessory) -> Result<(), StoreError> {
        let mut accessories = self.accessories.lock().await;
        if accessories.contains_key(&accessory.identity) {
            return Err(StoreError::Duplicate(accessory.identity));
        }
        accessories.insert(accessory.identity, accessory);
        Ok(())
    }

    async fn remove(&self, identity: &AccessoryIdentity) -> Result<bool, StoreError> {
        Ok(self.accessories.lock().await.remove(identity).is_some())
    }

    async fn list(&self) -> Result<Vec<StoredAccessory>, StoreError> {
        Ok(self.accessories.lock().await.values().cloned().collect())
    }
}
