use serde::Serialize;

use crate::config::AccessoryConfig;
use crate::engine::AccessoryIdentity;
use crate::store::StoredAccessory;

/// Payload published for an occupied sensor
pub const PAYLOAD_ON: &str = "ON";

/// Payload published for an unoccupied sensor
pub const PAYLOAD_OFF: &str = "OFF";

/// Availability payload published once connected
pub const PAYLOAD_AVAILABLE: &str = "online";

/// Availability payload the broker publishes for us when we vanish
pub const PAYLOAD_NOT_AVAILABLE: &str = "offline";

/// Home Assistant MQTT discovery config for an occupancy binary sensor
///
/// Published retained on the config topic so Home Assistant picks the sensor
/// up whenever it (re)connects.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryMessage {
    /// Human-readable name of the entity
    pub name: String,

    /// Unique identifier for this entity
    pub unique_id: String,

    /// Topic the occupancy value is published on
    pub state_topic: String,

    /// Daemon-wide topic; every sensor goes unavailable with the daemon
    pub availability_topic: String,

    pub payload_available: &'static str,

    pub payload_not_available: &'static str,

    /// Always "occupancy"
    pub device_class: &'static str,

    pub payload_on: &'static str,

    pub payload_off: &'static str,

    /// Device information
    pub device: DeviceInfo,
}

/// Device information block of a discovery config
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    /// List of identifiers for this device
    pub identifiers: Vec<String>,

    /// Device name
    pub name: String,

    pub manufacturer: String,

    pub model: String,

    pub serial_number: String,
}

/// Node id used in topics for an identity (hyphen-free, topic safe)
pub fn node_id(identity: &AccessoryIdentity) -> String {
    identity.as_uuid().simple().to_string()
}

/// Topic format: {prefix}/binary_sensor/{node_id}/occupancy/config
pub fn config_topic(discovery_prefix: &str, identity: &AccessoryIdentity) -> String {
    format!(
        "{}/binary_sensor/{}/occupancy/config",
        discovery_prefix,
        node_id(identity)
    )
}

/// Topic format: {prefix}/status
pub fn availability_topic(state_prefix: &str) -> String {
    format!("{}/status", state_prefix)
}

/// Topic format: {prefix}/{node_id}/occupancy
pub fn state_topic(state_prefix: &str, identity: &AccessoryIdentity) -> String {
    format!("{}/{}/occupancy", state_prefix, node_id(identity))
}

impl DiscoveryMessage {
    pub fn for_accessory(
        accessory: &StoredAccessory,
        info: &AccessoryConfig,
        state_prefix: &str,
    ) -> Self {
        let node_id = node_id(&accessory.identity);
        Self {
            name: accessory.display_name.clone(),
            unique_id: format!("occupancyd_{}_occupancy", node_id),
            state_topic: state_topic(state_prefix, &accessory.identity),
            availability_topic: availability_topic(state_prefix),
            payload_available: PAYLOAD_AVAILABLE,
            payload_not_available: PAYLOAD_NOT_AVAILABLE,
            device_class: "occupancy",
            payload_on: PAYLOAD_ON,
            payload_off: PAYLOAD_OFF,
            device: DeviceInfo {
                identifiers: vec![format!("occupancyd_{}", node_id)],
                name: accessory.device_id.clone(),
                manufacturer: info.manufacturer.clone(),
                model: info.model.clone(),
                serial_number: info.serial_number.clone(),
            },
        }
    }
}
