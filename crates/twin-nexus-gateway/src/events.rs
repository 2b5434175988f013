//! Notification fan-out over a broadcast channel.

use tokio::sync::broadcast;
use twin_nexus_core::{Notification, NotificationSink};

/// A [`NotificationSink`] delivering into a tokio broadcast channel.
///
/// Lagging or absent subscribers never block the writer loop; a send into a
/// channel without receivers is simply dropped.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastSink {
    /// Wrap a broadcast sender.
    #[must_use]
    pub fn new(sender: broadcast::Sender<Notification>) -> Self {
        Self { sender }
    }

    /// Subscribe to the notification stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl NotificationSink for BroadcastSink {
    fn deliver(&self, notification: Notification) {
        if self.sender.send(notification).is_err() {
            tracing::trace!("no event subscribers, dropping notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twin_nexus_core::{NotificationAccumulator, NullSink};

    #[tokio::test]
    async fn delivers_to_subscribers() {
        let (sender, _) = broadcast::channel(8);
        let sink = BroadcastSink::new(sender);
        let mut receiver = sink.subscribe();

        let mut acc = NotificationAccumulator::new();
        acc.add_provider("Temp", "t1").unwrap();
        acc.complete(&sink);

        let event = receiver.recv().await.unwrap();
        assert!(matches!(event, Notification::Lifecycle(_)));
    }

    #[test]
    fn no_subscribers_is_not_an_error() {
        let (sender, receiver) = broadcast::channel(8);
        drop(receiver);
        let sink = BroadcastSink::new(sender);

        let mut acc = NotificationAccumulator::new();
        acc.add_provider("Temp", "t1").unwrap();
        acc.complete(&sink);
        // Also fine to flush into a throwaway sink.
        let mut acc = NotificationAccumulator::new();
        acc.add_provider("Temp", "t2").unwrap();
        acc.complete(&NullSink);
    }
}
