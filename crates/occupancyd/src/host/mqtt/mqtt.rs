use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;

use super::client::ClientError;
use super::client::MqttClient;
use super::client::Publication;
use super::discovery::DiscoveryMessage;
use super::discovery::PAYLOAD_AVAILABLE;
use super::discovery::PAYLOAD_OFF;
use super::discovery::PAYLOAD_ON;
use super::discovery::availability_topic;
use super::discovery::config_topic;
use super::discovery::state_topic;
use crate::config::AccessoryConfig;
use crate::config::MqttConfig;
use crate::engine::AccessoryIdentity;
use crate::host::HostError;
use crate::host::HostPlatform;
use crate::store::StoredAccessory;

impl From<ClientError> for HostError {
    fn from(e: ClientError) -> Self {
        HostError::Transport(e.to_string())
    }
}

/// Home Assistant, reached through MQTT discovery.
///
/// Registration publishes a retained discovery config and pushes publish
/// retained `ON`/`OFF` state. Unregistration clears both retained messages.
pub struct MqttHost<C: MqttClient> {
    client: Mutex<C>,
    config: MqttConfig,
    accessory: AccessoryConfig,
}

impl<C: MqttClient> MqttHost<C> {
    /// Connect `client`, announce the daemon as available and wrap the
    /// client as a host platform
    pub async fn connect(
        mut client: C,
        config: &MqttConfig,
        accessory: AccessoryConfig,
    ) -> Result<Self, HostError> {
        info!(
            "Connecting to MQTT broker at {}:{}",
            config.broker, config.port
        );
        client.connect().await?;
        client
            .publish(Publication::retained(
                availability_topic(&config.state_prefix),
                PAYLOAD_AVAILABLE,
            ))
            .await?;

        Ok(Self {
            client: Mutex::new(client),
            config: config.clone(),
            accessory,
        })
    }

    async fn publish(&self, publication: Publication) -> Result<(), HostError> {
        self.client.lock().await.publish(publication).await?;
        Ok(())
    }
}

#[async_trait]
impl<C: MqttClient + 'static> HostPlatform for MqttHost<C> {
    fn name(&self) -> &str {
        "mqtt"
    }

    async fn register_device(&self, accessory: &StoredAccessory) -> Result<(), HostError> {
        let message =
            DiscoveryMessage::for_accessory(accessory, &self.accessory, &self.config.state_prefix);
        let payload = serde_json::to_vec(&message)?;
        let topic = config_topic(&self.config.discovery_prefix, &accessory.identity);

        self.publish(Publication::retained(topic.clone(), payload))
            .await?;
        info!(
            "Published discovery for {} ({}) on {}",
            accessory.display_name, accessory.identity, topic
        );
        Ok(())
    }

    async fn unregister_device(&self, accessory: &StoredAccessory) -> Result<(), HostError> {
        self.publish(Publication::clear(config_topic(
            &self.config.discovery_prefix,
            &accessory.identity,
        )))
        .await?;
        self.publish(Publication::clear(state_topic(
            &self.config.state_prefix,
            &accessory.identity,
        )))
        .await?;

        info!(
            "Withdrew discovery for {} ({})",
            accessory.display_name, accessory.identity
        );
        Ok(())
    }

    async fn push_characteristic(
        &self,
        identity: &AccessoryIdentity,
        occupied: bool,
    ) -> Result<(), HostError> {
        let topic = state_topic(&self.config.state_prefix, identity);
        let payload = if occupied { PAYLOAD_ON } else { PAYLOAD_OFF };

        self.publish(Publication::retained(topic.clone(), payload))
            .await?;
        debug!("Published {} to {}", payload, topic);
        Ok(())
    }
}
