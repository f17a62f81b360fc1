//! Per-device occupancy state machine.
//!
//! A sensor is `UNOCCUPIED` until its first detection, then `OCCUPIED` with
//! the instant of the most recent detection. A periodic tick returns it to
//! `UNOCCUPIED` once that instant is older than the decay window.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::Span;
use tracing::debug;
use tracing::info;

use super::push::Notifier;

/// Mutable per-device state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OccupancyRecord {
    /// `None` means no detection since the machine was created (or since the
    /// last decay), which always derives to unoccupied.
    pub last_detected_at: Option<Instant>,
}

/// Coarse state of the machine, independent of wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OccupancyState {
    Unoccupied,
    Occupied,
}

/// Occupancy derived from the last detection at a given instant.
///
/// True iff there was a detection and no more than `decay_window` has passed
/// since.
pub fn derived_occupancy(
    last_detected_at: Option<Instant>,
    now: Instant,
    decay_window: Duration,
) -> bool {
    match last_detected_at {
        Some(at) => now.saturating_duration_since(at) <= decay_window,
        None => false,
    }
}

/// Occupancy state machine for one device.
#[derive(Debug)]
pub struct OccupancySensor {
    record: OccupancyRecord,
    decay_window: Duration,
    notifier: Notifier,
    span: Span,
}

impl OccupancySensor {
    /// Create a sensor in the `UNOCCUPIED` state.
    ///
    /// `notifier` is the only way the sensor reaches the host; `span` scopes
    /// its log output to the device.
    pub fn new(decay_window: Duration, notifier: Notifier, span: Span) -> Self {
        Self {
            record: OccupancyRecord::default(),
            decay_window,
            notifier,
            span,
        }
    }

    pub fn record(&self) -> OccupancyRecord {
        self.record
    }

    pub fn state(&self) -> OccupancyState {
        match self.record.last_detected_at {
            Some(_) => OccupancyState::Occupied,
            None => OccupancyState::Unoccupied,
        }
    }

    /// Handle a reading from the device.
    ///
    /// A positive detection always refreshes the timestamp; the host is only
    /// told when the derived value flips from unoccupied to occupied. A
    /// negative reading carries no information for this sensor type and is
    /// ignored.
    pub fn on_event(&mut self, detected: bool, now: Instant) {
        let _enter = self.span.enter();

        if !detected {
            debug!("Ignoring negative reading");
            return;
        }

        let was_occupied = self.query(now);
        self.record.last_detected_at = Some(now);

        if was_occupied {
            debug!("Occupancy refreshed");
        } else {
            info!("Occupancy detected");
            self.notifier.notify(true);
        }
    }

    /// Handle a decay clock tick.
    pub fn on_tick(&mut self, now: Instant) {
        let _enter = self.span.enter();

        if self.has_decayed(now) {
            info!(
                "No detection for more than {}s, clearing occupancy",
                self.decay_window.as_secs()
            );
            self.record.last_detected_at = None;
            self.notifier.notify(false);
        }
    }

    /// Drop to `UNOCCUPIED` ahead of decay, e.g. when the daemon stops.
    ///
    /// Pushes `false` if the sensor was `OCCUPIED`, even when the window had
    /// already lapsed, since no tick has pushed `false` for it yet.
    pub fn release(&mut self) {
        let _enter = self.span.enter();

        if self.record.last_detected_at.take().is_some() {
            info!("Releasing occupancy");
            self.notifier.notify(false);
        }
    }

    /// Whether the sensor is `OCCUPIED` but its last detection has fallen out
    /// of the decay window.
    pub fn has_decayed(&self, now: Instant) -> bool {
        match self.record.last_detected_at {
            Some(at) => now.saturating_duration_since(at) > self.decay_window,
            None => false,
        }
    }

    /// Current occupancy as seen at `now`. Never changes state.
    pub fn query(&self, now: Instant) -> bool {
        derived_occupancy(self.record.last_detected_at, now, self.decay_window)
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::engine::AccessoryIdentity;
    use crate::engine::push::CharacteristicUpdate;
    use crate::engine::push::PushMessage;
    use crate::engine::push::PushReceiver;

    const WINDOW: Duration = Duration::from_secs(300);

    fn sensor() -> (OccupancySensor, PushReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let identity = AccessoryIdentity::derive("kitchen");
        let sensor = OccupancySensor::new(
            WINDOW,
            Notifier::new(identity, tx),
            Span::none(),
        );
        (sensor, rx)
    }

    fn drain(rx: &mut PushReceiver) -> Vec<bool> {
        let mut values = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let PushMessage::Update(CharacteristicUpdate { occupied, .. }) = message {
                values.push(occupied);
            }
        }
        values
    }

    #[test]
    fn test_derived_occupancy() {
        let t0 = Instant::now();
        assert!(!derived_occupancy(None, t0, WINDOW));
        assert!(derived_occupancy(Some(t0), t0, WINDOW));
        assert!(derived_occupancy(Some(t0), t0 + WINDOW, WINDOW));
        assert!(!derived_occupancy(
            Some(t0),
            t0 + WINDOW + Duration::from_millis(1),
            WINDOW
        ));
    }

    #[test]
    fn test_initially_unoccupied() {
        let (sensor, mut rx) = sensor();
        let now = Instant::now();

        assert_eq!(sensor.state(), OccupancyState::Unoccupied);
        assert!(!sensor.query(now));
        assert!(!sensor.has_decayed(now));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_detection_occupies_and_pushes_once() {
        let (mut sensor, mut rx) = sensor();
        let t0 = Instant::now();

        sensor.on_event(true, t0);
        assert!(sensor.query(t0));
        assert_eq!(sensor.state(), OccupancyState::Occupied);

        // Refresh while occupied: timestamp moves, no second push
        sensor.on_event(true, t0 + Duration::from_secs(10));
        assert_eq!(
            sensor.record().last_detected_at,
            Some(t0 + Duration::from_secs(10))
        );

        assert_eq!(drain(&mut rx), vec![true]);
    }

    #[test]
    fn test_stays_occupied_within_window() {
        let (mut sensor, _rx) = sensor();
        let t0 = Instant::now();
        sensor.on_event(true, t0);

        for secs in [0, 1, 60, 299, 300] {
            assert!(sensor.query(t0 + Duration::from_secs(secs)), "at {secs}s");
        }
    }

    #[test]
    fn test_negative_reading_is_ignored() {
        let (mut sensor, mut rx) = sensor();
        let t0 = Instant::now();

        sensor.on_event(false, t0);
        assert_eq!(sensor.state(), OccupancyState::Unoccupied);

        sensor.on_event(true, t0);
        sensor.on_event(false, t0 + Duration::from_secs(1));
        assert!(sensor.query(t0 + Duration::from_secs(1)));
        assert_eq!(drain(&mut rx), vec![true]);
    }

    #[test]
    fn test_tick_within_window_keeps_state() {
        let (mut sensor, mut rx) = sensor();
        let t0 = Instant::now();
        sensor.on_event(true, t0);
        drain(&mut rx);

        sensor.on_tick(t0 + Duration::from_secs(60));
        sensor.on_tick(t0 + WINDOW);

        assert_eq!(sensor.state(), OccupancyState::Occupied);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_tick_after_window_decays() {
        let (mut sensor, mut rx) = sensor();
        let t0 = Instant::now();
        sensor.on_event(true, t0);
        drain(&mut rx);

        let later = t0 + Duration::from_secs(301);
        assert!(sensor.has_decayed(later));
        sensor.on_tick(later);

        assert_eq!(sensor.state(), OccupancyState::Unoccupied);
        assert_eq!(sensor.record().last_detected_at, None);
        assert!(!sensor.query(later));
        assert_eq!(drain(&mut rx), vec![false]);

        // Already unoccupied: further ticks are silent
        sensor.on_tick(later + Duration::from_secs(60));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_detection_after_decay_pushes_again() {
        let (mut sensor, mut rx) = sensor();
        let t0 = Instant::now();
        let t301 = t0 + Duration::from_secs(301);

        sensor.on_event(true, t0);
        sensor.on_tick(t301);
        sensor.on_event(true, t301);

        assert!(sensor.query(t301));
        assert_eq!(drain(&mut rx), vec![true, false, true]);
    }

    #[test]
    fn test_detection_after_lapse_before_tick_pushes() {
        let (mut sensor, mut rx) = sensor();
        let t0 = Instant::now();
        sensor.on_event(true, t0);

        // Window has lapsed but no tick has run yet
        let lapsed = t0 + Duration::from_secs(310);
        assert!(!sensor.query(lapsed));
        sensor.on_event(true, lapsed);

        assert!(sensor.query(lapsed));
        assert_eq!(drain(&mut rx), vec![true, true]);
    }

    #[test]
    fn test_query_has_no_side_effects() {
        let (mut sensor, mut rx) = sensor();
        let t0 = Instant::now();
        sensor.on_event(true, t0);
        drain(&mut rx);

        let before = sensor.record();
        let late = t0 + Duration::from_secs(1000);
        for _ in 0..5 {
            assert!(!sensor.query(late));
        }

        assert_eq!(sensor.record(), before);
        assert_eq!(sensor.state(), OccupancyState::Occupied);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_release_pushes_false_once() {
        let (mut sensor, mut rx) = sensor();
        let t0 = Instant::now();
        sensor.on_event(true, t0);
        drain(&mut rx);

        sensor.release();
        assert_eq!(sensor.state(), OccupancyState::Unoccupied);
        assert!(!sensor.query(t0));
        assert_eq!(drain(&mut rx), vec![false]);

        sensor.release();
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_release_after_lapse_still_pushes() {
        let (mut sensor, mut rx) = sensor();
        let t0 = Instant::now();
        sensor.on_event(true, t0);
        drain(&mut rx);

        // Lapsed, but no tick has told the host yet
        assert!(!sensor.query(t0 + Duration::from_secs(400)));
        sensor.release();
        assert_eq!(drain(&mut rx), vec![false]);
    }

    #[test]
    fn test_release_unoccupied_is_silent() {
        let (mut sensor, mut rx) = sensor();
        sensor.release();
        assert!(drain(&mut rx).is_empty());
    }
}
