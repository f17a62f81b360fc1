use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;
use tracing::Span;
use tracing::trace;

use super::sensor::OccupancySensor;

/// Periodic decay check for one sensor.
///
/// Owns the background task; the task stops when the clock is cancelled or
/// dropped.
#[derive(Debug)]
pub struct DecayClock {
    task: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    #[error("Tick period must be greater than zero")]
    ZeroPeriod,

    #[error("Tick period of {0:?} is too long to schedule")]
    PeriodTooLong(Duration),
}

impl DecayClock {
    /// Start ticking `sensor` every `period`, first tick one period from now.
    ///
    /// Ticks stay on a fixed grid; if the runtime falls behind, missed ticks
    /// are skipped rather than fired in a burst. Fails if `period` is zero or
    /// so long that tick deadlines would not fit in an [`Instant`].
    pub fn start(
        period: Duration,
        sensor: Arc<Mutex<OccupancySensor>>,
        span: Span,
    ) -> Result<Self, ClockError> {
        if period.is_zero() {
            return Err(ClockError::ZeroPeriod);
        }
        let now = Instant::now();
        let first = now
            .checked_add(period)
            .filter(|first| first.checked_add(period).is_some())
            .ok_or(ClockError::PeriodTooLong(period))?;

        let task = tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval_at(first, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    ticker.tick().await;
                    trace!("Decay tick");
                    sensor.lock().await.on_tick(Instant::now());
                }
            }
            .instrument(span),
        );

        Ok(Self { task })
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop ticking. Idempotent.
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for DecayClock {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::engine::AccessoryIdentity;
    use crate::engine::push::Notifier;
    use crate::engine::push::PushMessage;
    use crate::engine::push::PushReceiver;

    fn sensor(decay_window: Duration) -> (Arc<Mutex<OccupancySensor>>, PushReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sensor = OccupancySensor::new(
            decay_window,
            Notifier::new(AccessoryIdentity::derive("kitchen"), tx),
            Span::none(),
        );
        (Arc::new(Mutex::new(sensor)), rx)
    }

    async fn next_push(rx: &mut PushReceiver) -> Option<bool> {
        match rx.recv().await? {
            PushMessage::Update(update) => Some(update.occupied),
            PushMessage::Flush(_) => None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_decays_sensor() {
        let (sensor, mut rx) = sensor(Duration::from_secs(300));
        let _clock = DecayClock::start(Duration::from_secs(60), sensor.clone(), Span::none())
            .unwrap();

        sensor.lock().await.on_event(true, Instant::now());
        assert_eq!(next_push(&mut rx).await, Some(true));

        // Ticks at 60..300s leave it occupied
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(rx.try_recv().is_err());
        assert!(sensor.lock().await.record().last_detected_at.is_some());

        // The 360s tick is the first past the window
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(next_push(&mut rx).await, Some(false));
        assert!(!sensor.lock().await.query(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticks() {
        let (sensor, mut rx) = sensor(Duration::from_secs(5));
        let clock = DecayClock::start(Duration::from_secs(1), sensor.clone(), Span::none())
            .unwrap();

        sensor.lock().await.on_event(true, Instant::now());
        assert_eq!(next_push(&mut rx).await, Some(true));

        clock.cancel();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!clock.is_running());
        assert!(rx.try_recv().is_err());
        assert!(sensor.lock().await.record().last_detected_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_sensor() {
        let (sensor, _rx) = sensor(Duration::from_secs(5));
        let clock = DecayClock::start(Duration::from_secs(1), sensor.clone(), Span::none())
            .unwrap();
        assert_eq!(Arc::strong_count(&sensor), 2);

        drop(clock);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(Arc::strong_count(&sensor), 1);
    }

    #[tokio::test]
    async fn test_unschedulable_period_rejected() {
        let (sensor, _rx) = sensor(Duration::from_secs(5));

        let result =
            DecayClock::start(Duration::from_secs(u64::MAX), sensor.clone(), Span::none());
        assert_eq!(
            result.unwrap_err(),
            ClockError::PeriodTooLong(Duration::from_secs(u64::MAX))
        );

        let result = DecayClock::start(Duration::ZERO, sensor.clone(), Span::none());
        assert_eq!(result.unwrap_err(), ClockError::ZeroPeriod);

        // Nothing was spawned holding the sensor
        assert_eq!(Arc::strong_count(&sensor), 1);
    }
}
