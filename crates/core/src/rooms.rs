use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Outbound half of a subscriber connection. Frames are pre-serialized so a
/// broadcast encodes once.
pub type Outbound = mpsc::Sender<String>;

/// Broadcast groups keyed by channel id. Membership is per connection id.
#[derive(Clone, Default)]
pub struct RoomHub {
    rooms: Arc<Mutex<HashMap<String, HashMap<String, Outbound>>>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HashMap<String, Outbound>>> {
        self.rooms
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn join(&self, room: &str, connection_id: &str, tx: Outbound) {
        let mut rooms = self.lock();
        let members = rooms.entry(room.to_string()).or_default();
        members.insert(connection_id.to_string(), tx);
        debug!(%room, %connection_id, members = members.len(), "room joined");
    }

    /// Returns whether the connection was in the room.
    pub fn leave(&self, room: &str, connection_id: &str) -> bool {
        let mut rooms = self.lock();
        let Some(members) = rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(connection_id).is_some();
        if members.is_empty() {
            rooms.remove(room);
        }
        removed
    }

    pub fn contains(&self, room: &str, connection_id: &str) -> bool {
        self.lock()
            .get(room)
            .is_some_and(|members| members.contains_key(connection_id))
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.lock().get(room).map_or(0, HashMap::len)
    }

    /// Sends `frame` to every member except `exclude`. Slow subscribers whose
    /// buffer is full miss the frame; closed ones are dropped from the room.
    /// Returns how many members received it.
    pub fn broadcast(&self, room: &str, frame: &str, exclude: Option<&str>) -> usize {
        let mut rooms = self.lock();
        let Some(members) = rooms.get_mut(room) else {
            return 0;
        };

        let mut delivered = 0;
        members.retain(|connection_id, tx| {
            if exclude == Some(connection_id.as_str()) {
                return true;
            }
            match tx.try_send(frame.to_string()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(%room, %connection_id, "subscriber lagging, frame dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        if members.is_empty() {
            rooms.remove(room);
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let hub = RoomHub::new();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        hub.join("c1", "a", tx_a);
        hub.join("c1", "b", tx_b);

        assert_eq!(hub.broadcast("c1", "hello", Some("a")), 1);
        assert_eq!(rx_b.recv().await.as_deref(), Some("hello"));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let hub = RoomHub::new();
        let (tx, _rx) = mpsc::channel(8);
        hub.join("c1", "a", tx);

        assert!(hub.leave("c1", "a"));
        assert!(!hub.leave("c1", "a"));
        assert!(!hub.leave("never-joined", "a"));
        assert_eq!(hub.member_count("c1"), 0);
    }

    #[tokio::test]
    async fn test_closed_subscribers_pruned() {
        let hub = RoomHub::new();
        let (tx, rx) = mpsc::channel(8);
        hub.join("c1", "a", tx);
        drop(rx);

        assert_eq!(hub.broadcast("c1", "x", None), 0);
        assert!(!hub.contains("c1", "a"));
    }

    #[tokio::test]
    async fn test_full_subscriber_keeps_membership() {
        let hub = RoomHub::new();
        let (tx, _rx) = mpsc::channel(1);
        hub.join("c1", "a", tx);

        assert_eq!(hub.broadcast("c1", "one", None), 1);
        assert_eq!(hub.broadcast("c1", "two", None), 0);
        assert!(hub.contains("c1", "a"));
    }
}
