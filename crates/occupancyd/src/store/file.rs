use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;

use super::AccessoryStore;
use super::StoreError;
use super::StoredAccessory;
use crate::engine::AccessoryIdentity;

/// On-disk layout of the accessory cache
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    accessories: Vec<StoredAccessory>,
}

/// Accessory store backed by a JSON file.
///
/// The whole file is loaded on open and rewritten on every change. Writes go
/// to a sibling temp file which is then renamed over the original, so a crash
/// never leaves a truncated cache behind.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    accessories: Mutex<BTreeMap<AccessoryIdentity, StoredAccessory>>,
}

impl JsonFileStore {
    /// Open the store at `path`, loading any accessories cached by a previous
    /// run. A missing file is an empty store.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let file = match tokio::fs::read(&path).await {
            Ok(contents) => serde_json::from_slice::<StoreFile>(&contents)
                .map_err(|e| StoreError::Decode(path.clone(), e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No accessory cache at {}, starting empty", path.display());
                StoreFile::default()
            }
            Err(e) => return Err(StoreError::Io(path, e)),
        };

        let mut accessories = BTreeMap::new();
        for accessory in file.accessories {
            info!(
                "Loading accessory from cache: {} ({})",
                accessory.display_name, accessory.identity
            );
            accessories.insert(accessory.identity, accessory);
        }

        Ok(Self {
            path,
            accessories: Mutex::new(accessories),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the full cache to disk. Called with the accessories lock held so
    /// writes are serialized.
    async fn persist(
        &self,
        accessories: &BTreeMap<AccessoryIdentity, StoredAccessory>,
    ) -> Result<(), StoreError> {
        let file = StoreFile {
            accessories: accessories.values().cloned().collect(),
        };
        let contents = serde_json::to_vec_pretty(&file).map_err(StoreError::Encode)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &contents)
            .await
            .map_err(|e| StoreError::Io(tmp.clone(), e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::Io(self.path.clone(), e))?;

        debug!(
            "Persisted {} accessories to {}",
            accessories.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[async_trait]
impl AccessoryStore for JsonFileStore {
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

        let identity = accessory.identity;
        accessories.insert(identity, accessory);
        if let Err(e) = self.persist(&accessories).await {
            // Keep memory and disk in agreement
            accessories.remove(&identity);
            return Err(e);
        }
        Ok(())
    }

    async fn remove(&self, identity: &AccessoryIdentity) -> Result<bool, StoreError> {
        let mut accessories = self.accessories.lock().await;
        let Some(removed) = accessories.remove(identity) else {
            return Ok(false);
        };

        if let Err(e) = self.persist(&accessories).await {
            accessories.insert(*identity, removed);
            return Err(e);
        }
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<StoredAccessory>, StoreError> {
        Ok(self.accessories.lock().await.values().cloned().collect())
    }
}
