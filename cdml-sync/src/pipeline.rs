//! Broadcast pipeline: watcher events → classifier → hub.
//!
//! Events are handled strictly one at a time, in arrival order. Each event
//! yields exactly one wire message; nothing is batched or coalesced.

use tokio::sync::mpsc;

use crate::broadcast::SubscriptionHub;
use crate::classify::ChangeClassifier;
use crate::protocol::ServerMessage;
use crate::watch::FileEvent;

pub struct BroadcastPipeline {
    classifier: ChangeClassifier,
    hub: SubscriptionHub,
}

impl BroadcastPipeline {
    pub fn new(classifier: ChangeClassifier, hub: SubscriptionHub) -> Self {
        Self { classifier, hub }
    }

    /// Classify and broadcast one event. Returns the message that was sent.
    pub async fn process(&self, event: &FileEvent) -> ServerMessage {
        let record = self.classifier.classify(event).await;
        let parsed = record.model.is_some();
        let message = ServerMessage::from(record);

        match self.hub.broadcast(&message).await {
            Ok(delivered) => log::debug!(
                "{:?} {} (parsed: {parsed}) → {delivered} socket(s)",
                event.kind,
                event.path
            ),
            Err(e) => log::error!("Failed to broadcast change to {}: {e}", event.path),
        }
        message
    }

    /// Drain `events` until the sender side closes.
    pub async fn run(self, mut events: mpsc::Receiver<FileEvent>) {
        while let Some(event) = events.recv().await {
            self.process(&event).await;
        }
        log::info!("Broadcast pipeline stopped");
    }
}
