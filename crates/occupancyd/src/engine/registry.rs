use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::sync::OnceCell;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::error;
use tracing::info;
use tracing::info_span;
use tracing::warn;

use super::AccessoryIdentity;
use super::clock::ClockError;
use super::clock::DecayClock;
use super::push;
use super::push::Notifier;
use super::push::PushSender;
use super::push::spawn_push_pump;
use super::sensor::OccupancySensor;
use super::sensor::OccupancyState;
use crate::config::OccupancyConfig;
use crate::host::HostError;
use crate::host::HostPlatform;
use crate::store::AccessoryStore;
use crate::store::StoreError;
use crate::store::StoredAccessory;

/// Upper bound on waiting for queued pushes to reach the host
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared handle to one device's state machine
pub type SensorHandle = Arc<Mutex<OccupancySensor>>;

/// Slot for a device's entry; empty until provisioning succeeds
type EntryCell = Arc<OnceCell<Arc<DeviceEntry>>>;

type EntryMap = Arc<Mutex<HashMap<String, EntryCell>>>;

/// Timing parameters applied to every sensor the registry creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySettings {
    /// How long a detection keeps a device occupied
    pub decay_window: Duration,

    /// Period of each device's decay clock
    pub tick_interval: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            decay_window: Duration::from_secs(300),
            tick_interval: Duration::from_secs(60),
        }
    }
}

impl From<&OccupancyConfig> for RegistrySettings {
    fn from(cfg: &OccupancyConfig) -> Self {
        Self {
            decay_window: cfg.decay_window(),
            tick_interval: cfg.tick_interval(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Accessory store failed while provisioning {device_id}: {source}")]
    Store {
        device_id: String,
        #[source]
        source: StoreError,
    },

    #[error("Host platform '{host}' failed to register {device_id}: {source}")]
    Host {
        device_id: String,
        host: String,
        #[source]
        source: HostError,
    },

    #[error("Cannot start decay clock for {device_id}: {source}")]
    Clock {
        device_id: String,
        #[source]
        source: ClockError,
    },

    #[error("Provisioning task for {device_id} did not finish: {source}")]
    Interrupted {
        device_id: String,
        #[source]
        source: JoinError,
    },
}

/// A live device: its persisted identity, its state machine and the clock
/// that decays it.
#[derive(Debug)]
pub struct DeviceEntry {
    accessory: StoredAccessory,
    sensor: SensorHandle,
    clock: DecayClock,
    restored: bool,
}

/// Point-in-time view of a device, as served by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSnapshot {
    pub device_id: String,
    pub identity: AccessoryIdentity,
    pub display_name: String,
    pub state: OccupancyState,
    pub occupied: bool,
    pub last_detected_secs_ago: Option<u64>,
}

impl DeviceEntry {
    pub fn identity(&self) -> AccessoryIdentity {
        self.accessory.identity
    }

    pub fn sensor(&self) -> &SensorHandle {
        &self.sensor
    }

    /// Whether the identity came from the store rather than being created by
    /// this process
    pub fn was_restored(&self) -> bool {
        self.restored
    }

    pub fn clock(&self) -> &DecayClock {
        &self.clock
    }

    /// Feed a reading to the state machine
    pub async fn on_event(&self, detected: bool) {
        self.sensor.lock().await.on_event(detected, Instant::now());
    }

    /// Current derived occupancy
    pub async fn query(&self) -> bool {
        self.sensor.lock().await.query(Instant::now())
    }

    pub async fn snapshot(&self) -> DeviceSnapshot {
        let now = Instant::now();
        let sensor = self.sensor.lock().await;
        DeviceSnapshot {
            device_id: self.accessory.device_id.clone(),
            identity: self.accessory.identity,
            display_name: self.accessory.display_name.clone(),
            state: sensor.state(),
            occupied: sensor.query(now),
            last_detected_secs_ago: sensor
                .record()
                .last_detected_at
                .map(|at| now.saturating_duration_since(at).as_secs()),
        }
    }
}

/// What a provisioning task needs, owned so it can outlive the caller.
#[derive(Clone)]
struct Provisioner {
    store: Arc<dyn AccessoryStore>,
    host: Arc<dyn HostPlatform>,
    settings: RegistrySettings,

    /// Sender cloned into every sensor's notifier
    push_tx: PushSender,
}

impl Provisioner {
    /// Create the live entry for a device, restoring its identity from the
    /// store or registering a new one with the host.
    async fn provision(&self, device_id: &str) -> Result<Arc<DeviceEntry>, ProvisionError> {
        let identity = AccessoryIdentity::derive(device_id);

        // Built first: nothing below may run for a device whose clock cannot
        let span = info_span!("device", device_id = %device_id, identity = %identity);
        let sensor = Arc::new(Mutex::new(OccupancySensor::new(
            self.settings.decay_window,
            Notifier::new(identity, self.push_tx.clone()),
            span.clone(),
        )));
        let clock = DecayClock::start(self.settings.tick_interval, sensor.clone(), span)
            .map_err(|source| ProvisionError::Clock {
                device_id: device_id.to_string(),
                source,
            })?;

        let store_err = |source: StoreError| ProvisionError::Store {
            device_id: device_id.to_string(),
            source,
        };

        let existing = self.store.lookup(&identity).await.map_err(store_err)?;
        let (accessory, restored) = match existing {
            Some(existing) => {
                info!(
                    "Restoring existing accessory from cache: {}",
                    existing.display_name
                );
                if existing.device_id != device_id {
                    warn!(
                        "Stored accessory {} belongs to device '{}', not '{}'",
                        identity, existing.device_id, device_id
                    );
                }
                (existing, true)
            }
            None => {
                info!("Adding new accessory: {}", device_id);
                let accessory = StoredAccessory::new(device_id);
                self.store
                    .insert(accessory.clone())
                    .await
                    .map_err(store_err)?;

                if let Err(source) = self.host.register_device(&accessory).await {
                    // Never leave an identity stored that the host does not know about
                    if let Err(e) = self.store.remove(&identity).await {
                        error!(
                            "Failed to roll back stored accessory {} after registration failure: {}",
                            identity, e
                        );
                    }
                    return Err(ProvisionError::Host {
                        device_id: device_id.to_string(),
                        host: self.host.name().to_string(),
                        source,
                    });
                }
                (accessory, false)
            }
        };

        Ok(Arc::new(DeviceEntry {
            accessory,
            sensor,
            clock,
            restored,
        }))
    }
}

/// Drop the slot of a failed attempt once no other caller is waiting on it.
///
/// Every failed attempt comes through here and releases its handle under the
/// map lock, so the last one out sees the map as the only holder.
async fn forget_failed(entries: &EntryMap, device_id: &str, cell: EntryCell) {
    let mut entries = entries.lock().await;
    let Some(current) = entries.get(device_id) else {
        return;
    };
    if !Arc::ptr_eq(current, &cell) {
        return;
    }
    drop(cell);

    let abandoned = Arc::strong_count(current) == 1 && !current.initialized();
    if abandoned {
        entries.remove(device_id);
    }
}

/// Device registry
///
/// Maps device ids to exactly one live [`DeviceEntry`] each, provisioning
/// devices on first sight. Must be created inside a tokio runtime: it spawns
/// the task that delivers pushes to the host.
pub struct Registry {
    provisioner: Provisioner,

    /// Handle for the task draining pushes into the host
    push_pump: JoinHandle<()>,

    entries: EntryMap,
}

impl Registry {
    pub fn new(
        store: Arc<dyn AccessoryStore>,
        host: Arc<dyn HostPlatform>,
        settings: RegistrySettings,
    ) -> Self {
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let push_pump = spawn_push_pump(host.clone(), push_rx);

        Self {
            provisioner: Provisioner {
                store,
                host,
                settings,
                push_tx,
            },
            push_pump,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get the entry for `device_id`, provisioning the device if this process
    /// has not seen it yet.
    ///
    /// Concurrent calls for the same device share a single provisioning
    /// attempt and all receive the same entry. The attempt runs in its own
    /// task and completes even if every caller goes away. A failed attempt
    /// leaves no entry behind; the next call starts over.
    pub async fn ensure(&self, device_id: &str) -> Result<Arc<DeviceEntry>, ProvisionError> {
        let cell = {
            let mut entries = self.entries.lock().await;
            entries.entry(device_id.to_string()).or_default().clone()
        };
        if let Some(entry) = cell.get() {
            return Ok(entry.clone());
        }

        let provisioner = self.provisioner.clone();
        let entries = self.entries.clone();
        let owned_id = device_id.to_string();
        let attempt = tokio::spawn(async move {
            let result = cell
                .get_or_try_init(|| provisioner.provision(&owned_id))
                .await
                .cloned();
            if result.is_err() {
                forget_failed(&entries, &owned_id, cell).await;
            }
            result
        });

        attempt.await.map_err(|source| ProvisionError::Interrupted {
            device_id: device_id.to_string(),
            source,
        })?
    }

    /// Route a reading to its device, provisioning the device if needed
    pub async fn dispatch(
        &self,
        device_id: &str,
        detected: bool,
    ) -> Result<Arc<DeviceEntry>, ProvisionError> {
        let entry = self.ensure(device_id).await?;
        entry.on_event(detected).await;
        Ok(entry)
    }

    /// Get the live entry for `device_id` without provisioning it
    pub async fn get(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        let entries = self.entries.lock().await;
        entries.get(device_id).and_then(|cell| cell.get().cloned())
    }

    /// Derived occupancy of `device_id`; false for devices with no live entry
    pub async fn query(&self, device_id: &str) -> bool {
        match self.get(device_id).await {
            Some(entry) => entry.query().await,
            None => false,
        }
    }

    /// Host-facing read of an accessory's occupancy value
    pub async fn characteristic(&self, identity: &AccessoryIdentity) -> Option<bool> {
        let entry = self
            .live_entries()
            .await
            .into_iter()
            .find(|e| e.identity() == *identity)?;
        Some(entry.query().await)
    }

    /// Snapshots of all live devices, ordered by device id
    pub async fn devices(&self) -> Vec<DeviceSnapshot> {
        let mut snapshots = Vec::new();
        for entry in self.live_entries().await {
            snapshots.push(entry.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        snapshots
    }

    async fn live_entries(&self) -> Vec<Arc<DeviceEntry>> {
        let entries = self.entries.lock().await;
        entries
            .values()
            .filter_map(|cell| cell.get().cloned())
            .collect()
    }

    /// Remove a device: stop its clock, drop its entry, forget its identity
    /// and withdraw it from the host.
    ///
    /// Devices that are stored but have not reported since start-up are
    /// removed too. Returns whether anything was removed.
    pub async fn remove(&self, device_id: &str) -> Result<bool, StoreError> {
        let store = &self.provisioner.store;
        let host = &self.provisioner.host;

        let cell = self.entries.lock().await.remove(device_id);
        let entry = cell.and_then(|cell| cell.get().cloned());
        if let Some(entry) = &entry {
            entry.clock.cancel();
        }

        let identity = AccessoryIdentity::derive(device_id);
        let stored = store.lookup(&identity).await?;
        let removed_from_store = store.remove(&identity).await?;

        let accessory = stored.or_else(|| entry.as_ref().map(|e| e.accessory.clone()));
        if let Some(accessory) = &accessory {
            if let Err(e) = host.unregister_device(accessory).await {
                warn!("Failed to unregister {} from host: {}", accessory.identity, e);
            }
        }

        let removed = entry.is_some() || removed_from_store;
        if removed {
            info!("Removed device {} ({})", device_id, identity);
        }
        Ok(removed)
    }

    /// Tell the host that every stored accessory without a live entry is
    /// unoccupied.
    ///
    /// Meant for start-up: restored sensors begin `UNOCCUPIED`, but the host
    /// may still hold the last value a previous run pushed. Returns the
    /// number of accessories reset.
    pub async fn reset_stored(&self) -> Result<usize, StoreError> {
        let stored = self.provisioner.store.list().await?;
        let live: Vec<_> = self
            .live_entries()
            .await
            .iter()
            .map(|e| e.identity())
            .collect();

        let mut reset = 0;
        for accessory in stored.iter().filter(|a| !live.contains(&a.identity)) {
            Notifier::new(accessory.identity, self.provisioner.push_tx.clone()).notify(false);
            reset += 1;
        }
        self.flush_pushes().await;
        Ok(reset)
    }

    /// Stop every decay clock, withdraw occupancy from the host and drop all
    /// live entries.
    ///
    /// Occupied devices push `false` first, so no host keeps showing a room
    /// as occupied after the process is gone. The store is untouched, so the
    /// next start restores every device.
    pub async fn shutdown(&self) {
        let entries: Vec<_> = self.entries.lock().await.drain().collect();
        let mut released = 0;
        for (_, cell) in entries {
            if let Some(entry) = cell.get() {
                entry.clock.cancel();
                entry.sensor.lock().await.release();
                released += 1;
            }
        }
        self.flush_pushes().await;
        info!("Registry shut down, released {} devices", released);
    }

    /// Wait for everything queued so far to reach the host
    async fn flush_pushes(&self) {
        match tokio::time::timeout(FLUSH_TIMEOUT, push::flush(&self.provisioner.push_tx)).await {
            Ok(true) => {}
            Ok(false) => warn!("Push pump is gone, pending pushes were dropped"),
            Err(_) => warn!(
                "Host did not take pending pushes within {:?}",
                FLUSH_TIMEOUT
            ),
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.push_pump.abort();
    }
}
