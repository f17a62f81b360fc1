//! Configuration file parsing and structures.
//!
//! occupancyd is configured with a single TOML file. Every section is
//! optional; a missing file or section means defaults.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;

/// Largest accepted value for the occupancy durations
const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Top-level configuration structure
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub logging: LoggingConfig,
    pub api: ApiConfig,
    pub occupancy: OccupancyConfig,
    pub store: StoreConfig,
    pub accessory: AccessoryConfig,
    pub host: HostConfig,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `tower_http = "debug"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Build the subscriber filter for this configuration
    pub fn targets(&self) -> Targets {
        Targets::new()
            .with_default(LevelFilter::from(self.level))
            .with_targets(
                self.overrides
                    .iter()
                    .map(|(target, level)| (target.clone(), LevelFilter::from(*level))),
            )
    }
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
        }
    }
}

fn default_decay_window_secs() -> u64 {
    300
}

fn default_tick_interval_secs() -> u64 {
    60
}

/// Occupancy timing
#[derive(Debug, Clone, Deserialize)]
pub struct OccupancyConfig {
    /// Seconds a detection keeps a device occupied
    #[serde(default = "default_decay_window_secs")]
    pub decay_window_secs: u64,

    /// Seconds between decay checks
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            decay_window_secs: default_decay_window_secs(),
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

impl OccupancyConfig {
    pub fn decay_window(&self) -> Duration {
        Duration::from_secs(self.decay_window_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("accessories.json")
}

/// Accessory store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// JSON file holding provisioned accessories
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Accessory information reported to the host for every device
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AccessoryConfig {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
}

impl Default for AccessoryConfig {
    fn default() -> Self {
        Self {
            manufacturer: "Default-Manufacturer".to_string(),
            model: "Default-Model".to_string(),
            serial_number: "Default-Serial".to_string(),
        }
    }
}

/// Host platform configuration. Without any host section, pushes are only
/// logged.
#[derive(Debug, Default, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "occupancyd".to_string()
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn default_state_prefix() -> String {
    "occupancyd".to_string()
}

/// MQTT host configuration (Home Assistant MQTT discovery)
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// MQTT broker hostname or IP address
    pub broker: String,

    /// MQTT broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// MQTT client ID
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Discovery prefix Home Assistant listens on (default: "homeassistant")
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,

    /// Prefix of the state topics occupancyd publishes to
    #[serde(default = "default_state_prefix")]
    pub state_prefix: String,

    /// Optional username for authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Optional password for authentication
    #[serde(default)]
    pub password: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("decay_window_secs", self.occupancy.decay_window_secs),
            ("tick_interval_secs", self.occupancy.tick_interval_secs),
        ];
        for (key, secs) in durations {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "occupancy.{key} must be greater than zero"
                )));
            }
            if secs > MAX_DURATION_SECS {
                return Err(ConfigError::Invalid(format!(
                    "occupancy.{key} must be at most {MAX_DURATION_SECS} (one year)"
                )));
            }
        }
        if let Some(mqtt) = &self.host.mqtt {
            if mqtt.username.is_some() != mqtt.password.is_some() {
                return Err(ConfigError::Invalid(
                    "host.mqtt.username and host.mqtt.password must be set together".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config() {
        let config = Config::parse("").unwrap();

        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.api.listen, "0.0.0.0");
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.occupancy.decay_window(), Duration::from_secs(300));
        assert_eq!(config.occupancy.tick_interval(), Duration::from_secs(60));
        assert_eq!(config.store.path, PathBuf::from("accessories.json"));
        assert_eq!(config.accessory, AccessoryConfig::default());
        assert!(config.host.mqtt.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [logging]
            level = "debug"

            [logging.overrides]
            tower_http = "warn"

            [api]
            listen = "127.0.0.1"
            port = 8565

            [occupancy]
            decay_window_secs = 120
            tick_interval_secs = 10

            [store]
            path = "/var/lib/occupancyd/accessories.json"

            [accessory]
            manufacturer = "Acme"

            [host.mqtt]
            broker = "localhost"
            username = "occupancyd"
            password = "secret"
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(
            config.logging.overrides.get("tower_http"),
            Some(&LogLevel::Warn)
        );
        assert_eq!(config.api.listen, "127.0.0.1");
        assert_eq!(config.api.port, 8565);
        assert_eq!(config.occupancy.decay_window(), Duration::from_secs(120));
        assert_eq!(config.occupancy.tick_interval(), Duration::from_secs(10));
        assert_eq!(
            config.store.path,
            PathBuf::from("/var/lib/occupancyd/accessories.json")
        );
        assert_eq!(config.accessory.manufacturer, "Acme");
        assert_eq!(config.accessory.model, "Default-Model");

        let mqtt = config.host.mqtt.as_ref().unwrap();
        assert_eq!(mqtt.broker, "localhost");
        assert_eq!(mqtt.port, 1883);
        assert_eq!(mqtt.client_id, "occupancyd");
        assert_eq!(mqtt.discovery_prefix, "homeassistant");
        assert_eq!(mqtt.state_prefix, "occupancyd");
        assert_eq!(mqtt.username.as_deref(), Some("occupancyd"));
    }

    #[test]
    fn test_sample_config_parses() {
        let config = Config::parse(include_str!("../../../occupancyd.toml")).unwrap();
        assert_eq!(config.api.port, 8080);
        assert!(config.host.mqtt.is_none());
    }

    #[test]
    fn test_zero_decay_window_rejected() {
        let result = Config::parse(
            r#"
            [occupancy]
            decay_window_secs = 0
        "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_tick_interval_rejected() {
        let result = Config::parse(
            r#"
            [occupancy]
            tick_interval_secs = 0
        "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let result = Config::parse(
            r#"
            [occupancy]
            tick_interval_secs = 9223372036854775807
        "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = Config::parse(
            r#"
            [occupancy]
            decay_window_secs = 31536001
        "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let config = Config::parse(
            r#"
            [occupancy]
            decay_window_secs = 31536000
            tick_interval_secs = 31536000
        "#,
        )
        .unwrap();
        assert_eq!(
            config.occupancy.tick_interval(),
            Duration::from_secs(31_536_000)
        );
    }

    #[test]
    fn test_mqtt_credentials_must_be_paired() {
        let result = Config::parse(
            r#"
            [host.mqtt]
            broker = "localhost"
            username = "occupancyd"
        "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_section_rejected() {
        let result = Config::parse(
            r#"
            [homekit]
        "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let result = Config::parse(
            r#"
            [logging]
            level = "verbose"
        "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_logging_targets() {
        let config = Config::parse(
            r#"
            [logging]
            level = "warn"

            [logging.overrides]
            occupancyd = "trace"
        "#,
        )
        .unwrap();

        let targets = config.logging.targets();
        assert!(targets.would_enable("occupancyd::engine", &tracing::Level::TRACE));
        assert!(!targets.would_enable("tower_http", &tracing::Level::INFO));
        assert!(targets.would_enable("tower_http", &tracing::Level::WARN));
    }

    #[test]
    fn test_from_file_missing() {
        let result = Config::from_file("/nonexistent/occupancyd.toml");
        assert!(matches!(result, Err(ConfigError::Io(_, _))));
    }
}
