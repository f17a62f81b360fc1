//! Broker connection used by [`super::MqttHost`].

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::AsyncClient;
use rumqttc::Event;
use rumqttc::LastWill;
use rumqttc::MqttOptions;
use rumqttc::Packet;
use rumqttc::QoS;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use tracing::warn;

use super::discovery::PAYLOAD_NOT_AVAILABLE;
use super::discovery::availability_topic;
use crate::config::MqttConfig;

/// How long [`RumqttcClient::connect`] waits for the broker's CONNACK
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the rumqttc request queue
const REQUEST_CAPACITY: usize = 64;

/// One outgoing MQTT message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl Publication {
    pub fn retained(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: true,
        }
    }

    /// Empty retained message; the broker drops whatever it kept for `topic`.
    pub fn clear(topic: impl Into<String>) -> Self {
        Self::retained(topic, Vec::new())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("MQTT client is not connected")]
    NotConnected,

    #[error("No CONNACK from MQTT broker {0} within {1:?}")]
    ConnectTimeout(String, Duration),

    #[error("MQTT request failed: {0}")]
    Request(#[from] rumqttc::ClientError),
}

/// The broker operations the host needs. Mocked in tests.
#[async_trait]
pub trait MqttClient: Send + Sync {
    async fn connect(&mut self) -> Result<(), ClientError>;

    async fn publish(&mut self, publication: Publication) -> Result<(), ClientError>;
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockMqttClient {
    pub published: Vec<Publication>,
    pub is_connected: bool,
}

#[cfg(test)]
#[async_trait]
impl MqttClient for MockMqttClient {
    async fn connect(&mut self) -> Result<(), ClientError> {
        self.is_connected = true;
        Ok(())
    }

    async fn publish(&mut self, publication: Publication) -> Result<(), ClientError> {
        if !self.is_connected {
            return Err(ClientError::NotConnected);
        }
        self.published.push(publication);
        Ok(())
    }
}

/// [`MqttClient`] on top of rumqttc.
///
/// The broker is told to publish `offline` on the availability topic if the
/// connection drops without a clean disconnect.
pub struct RumqttcClient {
    broker: String,
    options: MqttOptions,
    client: Option<AsyncClient>,
    event_loop: Option<JoinHandle<()>>,
}

impl RumqttcClient {
    pub fn new(config: &MqttConfig) -> Self {
        let mut options =
            MqttOptions::new(config.client_id.clone(), config.broker.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_last_will(LastWill::new(
            availability_topic(&config.state_prefix),
            PAYLOAD_NOT_AVAILABLE,
            QoS::AtLeastOnce,
            true,
        ));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        Self {
            broker: format!("{}:{}", config.broker, config.port),
            options,
            client: None,
            event_loop: None,
        }
    }
}

#[async_trait]
impl MqttClient for RumqttcClient {
    /// Start the event loop and wait for the first CONNACK.
    ///
    /// After that, reconnects are left to rumqttc; publishes made while the
    /// broker is away are queued.
    async fn connect(&mut self) -> Result<(), ClientError> {
        let (client, mut event_loop) = AsyncClient::new(self.options.clone(), REQUEST_CAPACITY);
        let (connected_tx, mut connected_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                        connected_tx.send_replace(true);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if connected_tx.send_replace(false) {
                            warn!("Lost MQTT connection: {}", e);
                        } else {
                            warn!("MQTT connection failed: {}", e);
                        }
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        let acked = tokio::time::timeout(CONNECT_TIMEOUT, async {
            connected_rx.wait_for(|up| *up).await.is_ok()
        })
        .await;
        if !matches!(acked, Ok(true)) {
            task.abort();
            return Err(ClientError::ConnectTimeout(
                self.broker.clone(),
                CONNECT_TIMEOUT,
            ));
        }

        self.client = Some(client);
        self.event_loop = Some(task);
        Ok(())
    }

    async fn publish(&mut self, publication: Publication) -> Result<(), ClientError> {
        let client = self.client.as_ref().ok_or(ClientError::NotConnected)?;
        client
            .publish(
                publication.topic,
                QoS::AtLeastOnce,
                publication.retain,
                publication.payload,
            )
            .await?;
        Ok(())
    }
}

impl Drop for RumqttcClient {
    fn drop(&mut self) {
        if let Some(task) = self.event_loop.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_is_empty_and_retained() {
        let publication = Publication::clear("occupancyd/status");
        assert!(publication.payload.is_empty());
        assert!(publication.retain);
    }

    #[tokio::test]
    async fn test_mock_rejects_publish_before_connect() {
        let mut client = MockMqttClient::default();
        let result = client
            .publish(Publication::retained("occupancyd/status", "online"))
            .await;
        assert!(matches!(result, Err(ClientError::NotConnected)));

        client.connect().await.unwrap();
        client
            .publish(Publication::retained("occupancyd/status", "online"))
            .await
            .unwrap();
        assert_eq!(client.published.len(), 1);
    }
}
