mod clock;
mod identity;
pub mod ingest;
mod push;
mod registry;
mod sensor;

pub use clock::ClockError;
pub use clock::DecayClock;
pub use identity::AccessoryIdentity;
pub use ingest::ReadingAck;
pub use ingest::ReadingError;
pub use ingest::SubmitError;
pub use ingest::submit_reading;
pub use push::CharacteristicUpdate;
pub use push::Notifier;
pub use registry::DeviceEntry;
pub use registry::DeviceSnapshot;
pub use registry::ProvisionError;
pub use registry::Registry;
pub use registry::RegistrySettings;
pub use registry::SensorHandle;
pub use sensor::OccupancyRecord;
pub use sensor::OccupancySensor;
pub use sensor::OccupancyState;
pub use sensor::derived_occupancy;
