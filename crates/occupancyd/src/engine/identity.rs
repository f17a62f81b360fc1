use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Namespace for deriving accessory identities from device ids.
///
/// Changing this value changes every identity and orphans every stored
/// accessory, so it is fixed forever.
const IDENTITY_NAMESPACE: Uuid = Uuid::from_u128(0x6f63_6375_7061_6e63_7964_2d61_6363_6573);

/// Stable internal identity of a device, derived from its external id.
///
/// The same device id always maps to the same identity, across restarts and
/// across machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessoryIdentity(Uuid);

impl AccessoryIdentity {
    /// Derive the identity for `device_id` (UUID v5 in a fixed namespace).
    pub fn derive(device_id: &str) -> Self {
        Self(Uuid::new_v5(&IDENTITY_NAMESPACE, device_id.as_bytes()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for AccessoryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}
