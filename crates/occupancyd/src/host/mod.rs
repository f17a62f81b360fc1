//! Host platform boundary.
//!
//! The host is the home automation platform that renders occupancy sensors to
//! users. occupancyd registers each accessory with it once and pushes value
//! changes to it; reads ("get characteristic") are served by the registry.

#[cfg(feature = "host_mqtt")]
pub mod mqtt;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::AccessoryConfig;
use crate::config::Config;
use crate::engine::AccessoryIdentity;
use crate::store::StoredAccessory;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Host transport error: {0}")]
    Transport(String),

    #[error("Failed to encode host payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Operations occupancyd needs from the host platform.
#[async_trait]
pub trait HostPlatform: Send + Sync {
    /// Get the name of this host platform
    fn name(&self) -> &str;

    /// Register a newly provisioned accessory. Called at most once per
    /// identity over the lifetime of the accessory store.
    async fn register_device(&self, accessory: &StoredAccessory) -> Result<(), HostError>;

    /// Withdraw an accessory that was explicitly removed
    async fn unregister_device(&self, accessory: &StoredAccessory) -> Result<(), HostError>;

    /// Notify the host that an accessory's occupancy value changed
    async fn push_characteristic(
        &self,
        identity: &AccessoryIdentity,
        occupied: bool,
    ) -> Result<(), HostError>;
}

/// Host that only records what it is told in the log.
///
/// Used when no real host platform is configured.
pub struct LogHost {
    accessory: AccessoryConfig,
}

impl LogHost {
    pub fn new(accessory: AccessoryConfig) -> Self {
        Self { accessory }
    }
}

#[async_trait]
impl HostPlatform for LogHost {
    fn name(&self) -> &str {
        "log"
    }

    async fn register_device(&self, accessory: &StoredAccessory) -> Result<(), HostError> {
        info!(
            "Registered accessory {} ({}) manufacturer={} model={} serial={}",
            accessory.display_name,
            accessory.identity,
            self.accessory.manufacturer,
            self.accessory.model,
            self.accessory.serial_number
        );
        Ok(())
    }

    async fn unregister_device(&self, accessory: &StoredAccessory) -> Result<(), HostError> {
        info!(
            "Unregistered accessory {} ({})",
            accessory.display_name, accessory.identity
        );
        Ok(())
    }

    async fn push_characteristic(
        &self,
        identity: &AccessoryIdentity,
        occupied: bool,
    ) -> Result<(), HostError> {
        info!("OccupancyDetected of {} -> {}", identity, occupied);
        Ok(())
    }
}

/// Build the host platform selected by the configuration.
///
/// MQTT when `[host.mqtt]` is present, otherwise log-only.
pub async fn from_config(config: &Config) -> Result<Arc<dyn HostPlatform>, HostError> {
    if let Some(host) = mqtt_from_config(config).await? {
        return Ok(host);
    }
    info!("No host platform configured, characteristic pushes will only be logged");
    Ok(Arc::new(LogHost::new(config.accessory.clone())))
}

#[cfg(feature = "host_mqtt")]
async fn mqtt_from_config(config: &Config) -> Result<Option<Arc<dyn HostPlatform>>, HostError> {
    match &config.host.mqtt {
        Some(mqtt) => {
            let host = mqtt::connect(mqtt, config.accessory.clone()).await?;
            Ok(Some(Arc::new(host)))
        }
        None => Ok(None),
    }
}

#[cfg(not(feature = "host_mqtt"))]
async fn mqtt_from_config(config: &Config) -> Result<Option<Arc<dyn HostPlatform>>, HostError> {
    if config.host.mqtt.is_some() {
        tracing::warn!("[host.mqtt] is configured but occupancyd was built without host_mqtt");
    }
    Ok(None)
}
