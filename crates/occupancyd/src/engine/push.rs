use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::AccessoryIdentity;
use crate::host::HostPlatform;

/// An unsolicited occupancy value change for the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicUpdate {
    pub identity: AccessoryIdentity,
    pub occupied: bool,
}

/// What travels over the push channel
#[derive(Debug)]
pub enum PushMessage {
    Update(CharacteristicUpdate),

    /// Answered once every message queued before it has been handled
    Flush(oneshot::Sender<()>),
}

/// Channel types for pushes FROM state machines TO the host (unbounded - a
/// state machine must never block on the host)
pub type PushSender = mpsc::UnboundedSender<PushMessage>;
pub type PushReceiver = mpsc::UnboundedReceiver<PushMessage>;

/// Queue a flush and wait for the pump to reach it.
///
/// Returns false if the pump is gone.
pub async fn flush(tx: &PushSender) -> bool {
    let (done_tx, done_rx) = oneshot::channel();
    if tx.send(PushMessage::Flush(done_tx)).is_err() {
        return false;
    }
    done_rx.await.is_ok()
}

/// Push capability handed to a single state machine.
///
/// It can only publish values for the accessory it was created for.
#[derive(Debug, Clone)]
pub struct Notifier {
    identity: AccessoryIdentity,
    tx: PushSender,
}

impl Notifier {
    pub fn new(identity: AccessoryIdentity, tx: PushSender) -> Self {
        Self { identity, tx }
    }

    /// Queue a push of `occupied`. Non-blocking.
    pub fn notify(&self, occupied: bool) {
        let update = CharacteristicUpdate {
            identity: self.identity,
            occupied,
        };
        if self.tx.send(PushMessage::Update(update)).is_err() {
            warn!(
                "Push pump is gone, dropping update for {}",
                self.identity
            );
        }
    }
}

/// Deliver queued pushes to the host, in order, until every sender is dropped.
///
/// Failed pushes are logged and not retried: the next transition carries the
/// current value anyway.
pub fn spawn_push_pump(host: Arc<dyn HostPlatform>, mut rx: PushReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let update = match message {
                PushMessage::Update(update) => update,
                PushMessage::Flush(done) => {
                    let _ = done.send(());
                    continue;
                }
            };
            debug!(
                "Pushing OccupancyDetected={} for {} to {}",
                update.occupied,
                update.identity,
                host.name()
            );
            if let Err(e) = host
                .push_characteristic(&update.identity, update.occupied)
                .await
            {
                warn!("Failed to push update for {}: {}", update.identity, e);
            }
        }
        info!("Push pump exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::RecordingHost;

    #[tokio::test]
    async fn test_notifier_tags_identity() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let identity = AccessoryIdentity::derive("kitchen");
        let notifier = Notifier::new(identity, tx);

        notifier.notify(true);

        let Some(PushMessage::Update(update)) = rx.recv().await else {
            panic!("expected an update");
        };
        assert_eq!(
            update,
            CharacteristicUpdate {
                identity,
                occupied: true
            }
        );
    }

    #[tokio::test]
    async fn test_notify_after_pump_gone_does_not_panic() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        Notifier::new(AccessoryIdentity::derive("kitchen"), tx).notify(false);
    }

    #[tokio::test]
    async fn test_pump_delivers_in_order() {
        let host = Arc::new(RecordingHost::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let pump = spawn_push_pump(host.clone(), rx);

        let identity = AccessoryIdentity::derive("kitchen");
        let notifier = Notifier::new(identity, tx);
        notifier.notify(true);
        notifier.notify(false);
        notifier.notify(true);
        drop(notifier);

        pump.await.unwrap();
        assert_eq!(
            host.pushes(),
            vec![(identity, true), (identity, false), (identity, true)]
        );
    }

    #[tokio::test]
    async fn test_flush_waits_for_earlier_updates() {
        let host = Arc::new(RecordingHost::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let _pump = spawn_push_pump(host.clone(), rx);

        let identity = AccessoryIdentity::derive("kitchen");
        Notifier::new(identity, tx.clone()).notify(true);
        Notifier::new(identity, tx.clone()).notify(false);

        assert!(flush(&tx).await);
        assert_eq!(host.pushes(), vec![(identity, true), (identity, false)]);
    }

    #[tokio::test]
    async fn test_flush_without_pump() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        assert!(!flush(&tx).await);
    }
}
