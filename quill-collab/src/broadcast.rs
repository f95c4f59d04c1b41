//! Fan-out of encoded frames to every connection editing a subject.
//!
//! One tokio broadcast channel per room; each connection holds its own
//! receiver buffering up to `capacity` frames. A frame is encoded once and
//! shared behind an `Arc`. Receivers skip frames they originated.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::protocol::{ProtocolError, SyncMessage};
use crate::worker::ConnectionId;

/// An encoded frame and the connection it came from.
#[derive(Debug, Clone)]
pub struct Frame {
    pub origin: ConnectionId,
    pub bytes: Arc<Vec<u8>>,
}

pub struct BroadcastGroup {
    sender: broadcast::Sender<Frame>,
    peers: RwLock<HashSet<ConnectionId>>,
}

impl BroadcastGroup {
    /// `capacity` is how many frames a slow receiver may fall behind before
    /// it starts losing them.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            peers: RwLock::new(HashSet::new()),
        }
    }

    /// Register a connection and return its receiver.
    pub async fn add_peer(&self, connection_id: ConnectionId) -> broadcast::Receiver<Frame> {
        let mut peers = self.peers.write().await;
        peers.insert(connection_id);
        self.sender.subscribe()
    }

    /// Returns whether the connection was registered.
    pub async fn remove_peer(&self, connection_id: &ConnectionId) -> bool {
        self.peers.write().await.remove(connection_id)
    }

    /// Encode `msg` once and send it to every receiver, the sender's own
    /// included. Returns the number of receivers.
    pub fn broadcast(&self, msg: &SyncMessage) -> Result<usize, ProtocolError> {
        let frame = Frame {
            origin: msg.origin,
            bytes: Arc::new(msg.encode()?),
        };
        Ok(self.broadcast_frame(frame))
    }

    pub fn broadcast_frame(&self, frame: Frame) -> usize {
        self.sender.send(frame).unwrap_or(0)
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_add_remove_peer() {
        let group = BroadcastGroup::new(16);
        let alice = Uuid::new_v4();
        let _rx = group.add_peer(alice).await;
        assert_eq!(group.peer_count().await, 1);

        assert!(group.remove_peer(&alice).await);
        assert_eq!(group.peer_count().await, 0);
        assert!(!group.remove_peer(&alice).await);
    }

    #[tokio::test]
    async fn test_fan_out_keeps_origin() {
        let group = BroadcastGroup::new(16);
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let mut rx_alice = group.add_peer(alice).await;
        let mut rx_bob = group.add_peer(bob).await;

        let msg = SyncMessage::update(alice, vec![1, 2, 3]);
        assert_eq!(group.broadcast(&msg).unwrap(), 2);

        // filtering the echo is the receiver's job
        let echoed = rx_alice.recv().await.unwrap();
        assert_eq!(echoed.origin, alice);
        let received = rx_bob.recv().await.unwrap();
        assert_eq!(SyncMessage::decode(&received.bytes).unwrap(), msg);
    }

    #[tokio::test]
    async fn test_send_without_receivers() {
        let group = BroadcastGroup::new(4);
        assert_eq!(group.broadcast(&SyncMessage::ping(Uuid::nil())).unwrap(), 0);
    }
}
