//! Connection registry: live room connections keyed by participant, plus message fan-out.

use std::{collections::HashMap, sync::Arc};

use axum::extract::ws::{Message, Utf8Bytes};
use serde::Serialize;
use tokio::sync::{
    RwLock,
    mpsc::{self, error::TrySendError},
    watch,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dao::models::{ParticipantId, RoomCode};

/// Handle used to push messages to one connected client.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::Sender<Message>,
    shutdown: Arc<watch::Sender<bool>>,
}

/// Receiving half owned by the connection's writer task.
#[derive(Debug)]
pub struct ConnectionReceiver {
    pub messages: mpsc::Receiver<Message>,
    /// Flips to `true` once the hub asks the connection to close.
    pub shutdown: watch::Receiver<bool>,
}

impl ConnectionHandle {
    /// Create a handle with a bounded outbound queue of `capacity` messages.
    pub fn channel(capacity: usize) -> (Self, ConnectionReceiver) {
        let (tx, messages) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown) = watch::channel(false);
        let handle = Self {
            id: Uuid::new_v4(),
            tx,
            shutdown: Arc::new(shutdown_tx),
        };
        (handle, ConnectionReceiver { messages, shutdown })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a message without waiting. A full queue drops this message only.
    pub fn try_deliver(&self, message: Message) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(connection = %self.id, "outbound queue full; dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection = %self.id, "outbound queue closed; dropping message");
                false
            }
        }
    }

    /// Ask the writer to flush what is queued and close the transport.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }
}

/// In-memory registry mapping rooms to the live connection of each participant.
///
/// A single reader/writer lock guards the whole registry. Delivery never re-enters the hub.
#[derive(Default)]
pub struct Hub {
    rooms: RwLock<HashMap<RoomCode, HashMap<ParticipantId, ConnectionHandle>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handle` to `(room, participant)`, returning the connection it replaced, if any.
    pub async fn register(
        &self,
        room: &str,
        participant: ParticipantId,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room.to_string())
            .or_default()
            .insert(participant, handle)
    }

    /// Remove the connection `connection_id` from `room`.
    ///
    /// Returns `false` when that connection was already replaced or removed. Empty rooms are pruned.
    pub async fn unregister(&self, room: &str, connection_id: Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(bucket) = rooms.get_mut(room) else {
            return false;
        };

        let before = bucket.len();
        bucket.retain(|_, handle| handle.id != connection_id);
        let removed = bucket.len() != before;

        if bucket.is_empty() {
            rooms.remove(room);
        }
        removed
    }

    /// Send `value` to one participant. No-op when they are offline.
    pub async fn send_to<T>(&self, room: &str, participant: ParticipantId, value: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        let Some(text) = encode(value) else {
            return false;
        };

        let rooms = self.rooms.read().await;
        rooms
            .get(room)
            .and_then(|bucket| bucket.get(&participant))
            .is_some_and(|handle| handle.try_deliver(Message::Text(text)))
    }

    /// Serialize `value` once and deliver it to every connection of `room` not listed in `except`.
    ///
    /// Returns the number of connections the message was queued for.
    pub async fn broadcast<T>(&self, room: &str, value: &T, except: &[ParticipantId]) -> usize
    where
        T: Serialize + ?Sized,
    {
        let Some(text) = encode(value) else {
            return 0;
        };

        let rooms = self.rooms.read().await;
        let Some(bucket) = rooms.get(room) else {
            return 0;
        };

        bucket
            .iter()
            .filter(|(participant, _)| !except.contains(participant))
            .filter(|(_, handle)| handle.try_deliver(Message::Text(text.clone())))
            .count()
    }

    pub async fn is_online(&self, room: &str, participant: ParticipantId) -> bool {
        let rooms = self.rooms.read().await;
        rooms
            .get(room)
            .is_some_and(|bucket| bucket.contains_key(&participant))
    }

    pub async fn online_participants(&self, room: &str) -> Vec<ParticipantId> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room)
            .map(|bucket| bucket.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Number of rooms with at least one live connection.
    pub async fn live_rooms(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Drop the room bucket and close every connection in it.
    pub async fn close_room(&self, room: &str) {
        let bucket = self.rooms.write().await.remove(room);
        for handle in bucket.into_iter().flat_map(HashMap::into_values) {
            handle.close();
        }
    }

    /// Unbind and close the connection of one participant.
    pub async fn close_participant(&self, room: &str, participant: ParticipantId) {
        let handle = {
            let mut rooms = self.rooms.write().await;
            let Some(bucket) = rooms.get_mut(room) else {
                return;
            };
            let handle = bucket.remove(&participant);
            if bucket.is_empty() {
                rooms.remove(room);
            }
            handle
        };

        if let Some(handle) = handle {
            handle.close();
        }
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Option<Utf8Bytes> {
    match serde_json::to_string(value) {
        Ok(text) => Some(text.into()),
        Err(err) => {
            warn!(error = %err, "failed to serialize outbound message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn text(message: Message) -> Value {
        match message {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn broadcast_skips_excluded_participants() {
        let hub = Hub::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (handle_a, mut rx_a) = ConnectionHandle::channel(8);
        let (handle_b, mut rx_b) = ConnectionHandle::channel(8);
        hub.register("ABCD", a, handle_a).await;
        hub.register("ABCD", b, handle_b).await;

        let delivered = hub.broadcast("ABCD", &json!({"kind": "ping"}), &[a]).await;

        assert_eq!(delivered, 1);
        assert_eq!(text(rx_b.messages.try_recv().unwrap()), json!({"kind": "ping"}));
        assert!(rx_a.messages.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_to_offline_participant_is_a_no_op() {
        let hub = Hub::new();
        assert!(!hub.send_to("ABCD", Uuid::new_v4(), &json!({})).await);
    }

    #[tokio::test]
    async fn register_replaces_previous_connection() {
        let hub = Hub::new();
        let id = Uuid::new_v4();
        let (first, _rx_first) = ConnectionHandle::channel(8);
        let (second, mut rx_second) = ConnectionHandle::channel(8);
        let first_id = first.id();

        assert!(hub.register("ABCD", id, first).await.is_none());
        let replaced = hub.register("ABCD", id, second).await.unwrap();
        assert_eq!(replaced.id(), first_id);

        // Stale connection cannot evict its replacement.
        assert!(!hub.unregister("ABCD", first_id).await);
        assert!(hub.send_to("ABCD", id, &json!({"n": 1})).await);
        assert!(rx_second.messages.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unregister_prunes_empty_rooms() {
        let hub = Hub::new();
        let id = Uuid::new_v4();
        let (handle, _rx) = ConnectionHandle::channel(8);
        let connection_id = handle.id();
        hub.register("ABCD", id, handle).await;

        assert!(hub.unregister("ABCD", connection_id).await);
        assert!(hub.rooms.read().await.is_empty());
        assert!(!hub.is_online("ABCD", id).await);
    }

    #[tokio::test]
    async fn full_queue_drops_only_that_message() {
        let hub = Hub::new();
        let (slow, fast) = (Uuid::new_v4(), Uuid::new_v4());
        let (slow_handle, mut slow_rx) = ConnectionHandle::channel(1);
        let (fast_handle, mut fast_rx) = ConnectionHandle::channel(8);
        hub.register("ABCD", slow, slow_handle).await;
        hub.register("ABCD", fast, fast_handle).await;

        assert_eq!(hub.broadcast("ABCD", &json!(1), &[]).await, 2);
        assert_eq!(hub.broadcast("ABCD", &json!(2), &[]).await, 1);

        assert_eq!(text(slow_rx.messages.try_recv().unwrap()), json!(1));
        assert!(slow_rx.messages.try_recv().is_err());
        assert!(!*slow_rx.shutdown.borrow());
        assert_eq!(text(fast_rx.messages.try_recv().unwrap()), json!(1));
        assert_eq!(text(fast_rx.messages.try_recv().unwrap()), json!(2));
        assert!(hub.is_online("ABCD", slow).await);
    }

    #[tokio::test]
    async fn close_room_signals_every_connection() {
        let hub = Hub::new();
        let (handle_a, rx_a) = ConnectionHandle::channel(8);
        let (handle_b, rx_b) = ConnectionHandle::channel(8);
        hub.register("ABCD", Uuid::new_v4(), handle_a).await;
        hub.register("ABCD", Uuid::new_v4(), handle_b).await;

        hub.close_room("ABCD").await;

        assert!(*rx_a.shutdown.borrow());
        assert!(*rx_b.shutdown.borrow());
        assert!(hub.online_participants("ABCD").await.is_empty());
    }

    #[tokio::test]
    async fn close_participant_leaves_others_connected() {
        let hub = Hub::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (handle_a, rx_a) = ConnectionHandle::channel(8);
        let (handle_b, rx_b) = ConnectionHandle::channel(8);
        hub.register("ABCD", a, handle_a).await;
        hub.register("ABCD", b, handle_b).await;

        hub.close_participant("ABCD", a).await;

        assert!(*rx_a.shutdown.borrow());
        assert!(!*rx_b.shutdown.borrow());
        assert_eq!(hub.online_participants("ABCD").await, vec![b]);
    }
}
