//! Ingestion of raw readings from the transport.

use serde::Serialize;
use tracing::debug;

use super::registry::ProvisionError;
use super::registry::Registry;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadingError {
    #[error("Reading must be a valid number")]
    NotANumber(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Reading(#[from] ReadingError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

/// Acknowledgment of an accepted reading, echoing what was received
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadingAck {
    pub deviceid: String,
    pub reading: String,
}

/// Parse a raw reading. Anything that is not a finite number is rejected.
pub fn parse_reading(raw: &str) -> Result<f64, ReadingError> {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ReadingError::NotANumber(raw.to_string())),
    }
}

/// Validate a reading and, if it is valid, record a detection for the device.
///
/// Any valid number counts as a detection. An invalid reading never touches
/// the registry.
pub async fn submit_reading(
    registry: &Registry,
    device_id: &str,
    raw: &str,
) -> Result<ReadingAck, SubmitError> {
    let value = parse_reading(raw)?;
    debug!("Reading {} from {}", value, device_id);

    registry.dispatch(device_id, true).await?;

    Ok(ReadingAck {
        deviceid: device_id.to_string(),
        reading: raw.to_string(),
    })
}
