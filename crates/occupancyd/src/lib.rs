pub mod api;
pub mod config;
pub mod engine;
pub mod host;
pub mod store;

pub use config::Config;
pub use config::ConfigError;
pub use config::LogLevel;
pub use engine::AccessoryIdentity;
pub use engine::OccupancyState;
pub use engine::Registry;
pub use engine::RegistrySettings;
