//! Rooms & broadcast fabric (C10): a per-handler connection registry, room
//! membership, and fan-out (spec.md §4.9). Grounded on the `RoomManager`
//! shape in the `mockforge-ws` handlers module, generalized to the
//! explicit recipient-set computation (including `includeSelf` and the
//! roomless-sender fallback) this spec requires instead of a
//! `tokio::broadcast` channel per room.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::ws::connection::{Outbox, OutgoingMessage};

pub type ConnectionId = String;

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, Arc<Outbox>>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
    conn_rooms: HashMap<ConnectionId, HashSet<String>>,
}

/// One registry per `wsHandler`; handlers never share connections or rooms
/// (spec.md §4.9 — "broadcasts do NOT cross handlers").
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, id: ConnectionId, outbox: Arc<Outbox>) {
        self.inner.lock().await.connections.insert(id, outbox);
    }

    /// Removes the connection from every room atomically and drops its
    /// outbound sender (spec.md §3 "Rooms" invariant ii).
    pub async fn unregister(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        inner.connections.remove(id);
        if let Some(rooms) = inner.conn_rooms.remove(id) {
            for room in rooms {
                if let Some(members) = inner.rooms.get_mut(&room) {
                    members.remove(id);
                    if members.is_empty() {
                        inner.rooms.remove(&room);
                    }
                }
            }
        }
    }

    pub async fn join(&self, id: &str, room: &str) {
        let mut inner = self.inner.lock().await;
        inner.rooms.entry(room.to_string()).or_default().insert(id.to_string());
        inner.conn_rooms.entry(id.to_string()).or_default().insert(room.to_string());
    }

    pub async fn leave(&self, id: &str, room: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(members) = inner.rooms.get_mut(room) {
            members.remove(id);
            if members.is_empty() {
                inner.rooms.remove(room);
            }
        }
        if let Some(rooms) = inner.conn_rooms.get_mut(id) {
            rooms.remove(room);
        }
    }

    pub async fn rooms_of(&self, id: &str) -> HashSet<String> {
        self.inner.lock().await.conn_rooms.get(id).cloned().unwrap_or_default()
    }

    pub async fn room_members(&self, room: &str) -> HashSet<ConnectionId> {
        self.inner.lock().await.rooms.get(room).cloned().unwrap_or_default()
    }

    /// Compute the recipient set per spec.md §4.9: explicit `room` if
    /// given; else the union of the sender's own rooms; else (roomless
    /// sender) every registered connection. Delivery is fire-and-forget —
    /// a dead receiver is silently skipped so one failure never affects
    /// another recipient.
    pub async fn broadcast(
        &self,
        sender_id: &str,
        message: OutgoingMessage,
        room: Option<&str>,
        include_self: bool,
    ) {
        let (recipients, outboxes): (HashSet<ConnectionId>, HashMap<ConnectionId, Arc<Outbox>>) = {
            let inner = self.inner.lock().await;

            let mut recipients: HashSet<ConnectionId> = match room {
                Some(room) => inner.rooms.get(room).cloned().unwrap_or_default(),
                None => {
                    let sender_rooms = inner.conn_rooms.get(sender_id).cloned().unwrap_or_default();
                    if sender_rooms.is_empty() {
                        inner.connections.keys().cloned().collect()
                    } else {
                        sender_rooms
                            .iter()
                            .flat_map(|r| inner.rooms.get(r).cloned().unwrap_or_default())
                            .collect()
                    }
                }
            };

            if !include_self {
                recipients.remove(sender_id);
            }

            let outboxes = recipients
                .iter()
                .filter_map(|id| inner.connections.get(id).map(|o| (id.clone(), Arc::clone(o))))
                .collect();

            (recipients, outboxes)
        };

        for id in recipients {
            if let Some(outbox) = outboxes.get(&id) {
                outbox.push(message.clone()).await;
            }
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.lock().await.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn register_with_outbox(registry: &Registry, id: &str) -> Arc<Outbox> {
        let outbox = Outbox::new(16);
        registry.register(id.to_string(), Arc::clone(&outbox)).await;
        outbox
    }

    #[tokio::test]
    async fn join_then_leave_updates_both_sides_of_the_invariant() {
        let registry = Registry::new();
        let _outbox = register_with_outbox(&registry, "a").await;
        registry.join("a", "room1").await;

        assert!(registry.room_members("room1").await.contains("a"));
        assert!(registry.rooms_of("a").await.contains("room1"));

        registry.leave("a", "room1").await;
        assert!(!registry.room_members("room1").await.contains("a"));
        assert!(!registry.rooms_of("a").await.contains("room1"));
    }

    #[tokio::test]
    async fn unregister_cascades_out_of_every_room() {
        let registry = Registry::new();
        let _outbox = register_with_outbox(&registry, "a").await;
        registry.join("a", "r1").await;
        registry.join("a", "r2").await;

        registry.unregister("a").await;

        assert!(registry.room_members("r1").await.is_empty());
        assert!(registry.room_members("r2").await.is_empty());
    }

    #[tokio::test]
    async fn broadcast_to_room_excludes_sender_by_default_s6() {
        let registry = Registry::new();
        let outbox_a = register_with_outbox(&registry, "a").await;
        let outbox_b = register_with_outbox(&registry, "b").await;
        registry.join("a", "r").await;
        registry.join("b", "r").await;

        registry
            .broadcast("a", OutgoingMessage::Text("hi".into()), Some("r"), false)
            .await;

        assert!(outbox_b.try_pop().is_some());
        assert!(outbox_a.try_pop().is_none());
    }

    #[tokio::test]
    async fn broadcast_with_no_room_falls_back_to_senders_rooms() {
        let registry = Registry::new();
        let outbox_a = register_with_outbox(&registry, "a").await;
        let outbox_b = register_with_outbox(&registry, "b").await;
        let outbox_c = register_with_outbox(&registry, "c").await;
        registry.join("a", "r1").await;
        registry.join("b", "r1").await;
        // c is in a different room and should not receive the broadcast.
        registry.join("c", "r2").await;

        registry
            .broadcast("a", OutgoingMessage::Text("hi".into()), None, false)
            .await;

        assert!(outbox_b.try_pop().is_some());
        assert!(outbox_a.try_pop().is_none());
        assert!(outbox_c.try_pop().is_none());
    }

    #[tokio::test]
    async fn broadcast_from_roomless_sender_falls_back_to_registry() {
        let registry = Registry::new();
        let outbox_a = register_with_outbox(&registry, "a").await;
        let outbox_b = register_with_outbox(&registry, "b").await;

        registry
            .broadcast("a", OutgoingMessage::Text("hi".into()), None, false)
            .await;

        assert!(outbox_b.try_pop().is_some());
        assert!(outbox_a.try_pop().is_none());
    }
}
