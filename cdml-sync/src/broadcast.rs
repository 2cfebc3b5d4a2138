//! Subscription hub: fan-out of server messages to every connected socket.
//!
//! Each registered socket owns an unbounded outbound queue drained by its
//! writer task. A message is serialized once and the same frame is handed to
//! every open queue. Queues whose socket has gone away are skipped, never
//! buffered for replay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::protocol::{ProtocolError, ServerMessage};

/// A serialized text frame shared between all receivers.
pub type Frame = Arc<str>;

/// Statistics for monitoring hub health.
#[derive(Debug, Clone, Default)]
pub struct HubStats {
    pub messages_sent: u64,
    pub deliveries: u64,
    pub deliveries_skipped: u64,
    pub active_peers: usize,
}

/// Lock-free counters, read via [`SubscriptionHub::stats`].
struct AtomicHubStats {
    messages_sent: AtomicU64,
    deliveries: AtomicU64,
    deliveries_skipped: AtomicU64,
}

impl AtomicHubStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            deliveries_skipped: AtomicU64::new(0),
        }
    }
}

/// Tracks connected viewer sockets by id.
///
/// Register, unregister and broadcast may run concurrently: broadcast only
/// holds the read lock while pushing into non-blocking queues.
#[derive(Clone)]
pub struct SubscriptionHub {
    peers: Arc<RwLock<HashMap<Uuid, mpsc::UnboundedSender<Frame>>>>,
    atomic_stats: Arc<AtomicHubStats>,
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self {
            peers: Arc::new(RwLock::new(HashMap::new())),
            atomic_stats: Arc::new(AtomicHubStats::new()),
        }
    }

    /// Register a socket. Returns its id and the queue its writer drains.
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer_id = Uuid::new_v4();
        self.peers.write().await.insert(peer_id, tx);
        (peer_id, rx)
    }

    /// Unregister a socket. Returns whether it was registered.
    pub async fn unregister(&self, peer_id: &Uuid) -> bool {
        self.peers.write().await.remove(peer_id).is_some()
    }

    /// Serialize once and deliver to every open socket.
    ///
    /// Returns the number of sockets the frame was handed to.
    pub async fn broadcast(&self, msg: &ServerMessage) -> Result<usize, ProtocolError> {
        let frame: Frame = Arc::from(msg.encode()?);
        Ok(self.broadcast_frame(frame).await)
    }

    /// Deliver a pre-encoded frame.
    pub async fn broadcast_frame(&self, frame: Frame) -> usize {
        let peers = self.peers.read().await;
        let mut delivered = 0;
        let mut skipped = 0;
        for (peer_id, tx) in peers.iter() {
            if tx.is_closed() || tx.send(frame.clone()).is_err() {
                log::trace!("Skipping closed socket {peer_id}");
                skipped += 1;
                continue;
            }
            delivered += 1;
        }
        drop(peers);

        self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.atomic_stats
            .deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.atomic_stats
            .deliveries_skipped
            .fetch_add(skipped, Ordering::Relaxed);
        delivered
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn has_peer(&self, peer_id: &Uuid) -> bool {
        self.peers.read().await.contains_key(peer_id)
    }

    pub async fn stats(&self) -> HubStats {
        let peers = self.peers.read().await;
        HubStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            deliveries: self.atomic_stats.deliveries.load(Ordering::Relaxed),
            deliveries_skipped: self.atomic_stats.deliveries_skipped.load(Ordering::Relaxed),
            active_peers: peers.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deleted(file: &str) -> ServerMessage {
        ServerMessage::FileDeleted { file: file.into() }
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let hub = SubscriptionHub::new();
        let (peer_id, _rx) = hub.register().await;
        assert_eq!(hub.peer_count().await, 1);
        assert!(hub.has_peer(&peer_id).await);

        assert!(hub.unregister(&peer_id).await);
        assert!(!hub.unregister(&peer_id).await);
        assert_eq!(hub.peer_count().await, 0);
    }

    #[tokio::test]
    async fn test_fan_out_reaches_every_open_socket() {
        let hub = SubscriptionHub::new();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            receivers.push(hub.register().await.1);
        }

        let count = hub.broadcast(&deleted("a.cdml")).await.unwrap();
        assert_eq!(count, 3);

        for rx in &mut receivers {
            let frame = rx.recv().await.unwrap();
            assert_eq!(ServerMessage::decode(&frame).unwrap(), deleted("a.cdml"));
        }
    }

    #[tokio::test]
    async fn test_unregistered_socket_receives_nothing() {
        let hub = SubscriptionHub::new();
        let (kept, mut kept_rx) = hub.register().await;
        let (gone, mut gone_rx) = hub.register().await;
        hub.unregister(&gone).await;

        assert_eq!(hub.broadcast(&deleted("a.cdml")).await.unwrap(), 1);
        assert!(kept_rx.recv().await.is_some());
        assert!(gone_rx.try_recv().is_err());
        assert!(hub.has_peer(&kept).await);
    }

    #[tokio::test]
    async fn test_closed_socket_is_skipped() {
        let hub = SubscriptionHub::new();
        let (_open, mut open_rx) = hub.register().await;
        let (_closed, closed_rx) = hub.register().await;
        drop(closed_rx);

        assert_eq!(hub.broadcast(&deleted("a.cdml")).await.unwrap(), 1);
        assert!(open_rx.recv().await.is_some());

        let stats = hub.stats().await;
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.deliveries, 1);
        assert_eq!(stats.deliveries_skipped, 1);
        assert_eq!(stats.active_peers, 2);
    }

    #[tokio::test]
    async fn test_concurrent_register_during_broadcast() {
        let hub = SubscriptionHub::new();
        let (_, mut rx) = hub.register().await;

        let churn = {
            let hub = hub.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    let (id, rx) = hub.register().await;
                    drop(rx);
                    hub.unregister(&id).await;
                }
            })
        };
        for i in 0..100 {
            assert!(hub.broadcast(&deleted(&format!("{i}.cdml"))).await.unwrap() >= 1);
        }
        churn.await.unwrap();

        for i in 0..100 {
            let frame = rx.recv().await.unwrap();
            assert_eq!(ServerMessage::decode(&frame).unwrap().file(), format!("{i}.cdml"));
        }
    }
}
