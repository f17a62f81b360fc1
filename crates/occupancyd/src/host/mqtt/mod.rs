//! Home Assistant over MQTT discovery.

mod client;
mod discovery;
// Private module
#[allow(clippy::module_inception)]
mod mqtt;

pub use client::ClientError;
pub use client::MqttClient;
pub use client::Publication;
pub use client::RumqttcClient;
pub use discovery::DiscoveryMessage;
pub use mqtt::MqttHost;

use crate::config::AccessoryConfig;
use crate::config::MqttConfig;
use crate::host::HostError;

/// Connect to the configured broker with the real rumqttc client
pub async fn connect(
    config: &MqttConfig,
    accessory: AccessoryConfig,
) -> Result<MqttHost<RumqttcClient>, HostError> {
    MqttHost::connect(RumqttcClient::new(config), config, accessory).await
}
