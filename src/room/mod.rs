//! Room registry for the rendezvous server.
//!
//! Pairs two connections under a room key and relays negotiation frames
//! between them. Every membership change happens under the registry lock, so
//! two joins racing for an empty room observe each other.

mod state;

pub use state::{Room, RoomState, MAX_MEMBERS};

use std::collections::HashMap;
use std::fmt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::signaling::{Role, SignalingMessage};

/// Transport-assigned identifier, stable for the lifetime of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serialized frames queued for delivery on one connection.
pub type Outbound = mpsc::UnboundedSender<String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Created,
    Joined,
    Full,
    /// The connection already occupies a room.
    AlreadyInRoom(String),
    UnknownConnection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered(ConnectionId),
    /// Sender is alone (or not in a room); the frame was dropped.
    Dropped,
}

struct ConnectionEntry {
    room: Option<String>,
    role: Role,
    outbound: Outbound,
}

#[derive(Default)]
struct Registry {
    rooms: HashMap<String, Room>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
}

impl Registry {
    fn emit(&self, id: ConnectionId, msg: &SignalingMessage) {
        let Some(entry) = self.connections.get(&id) else {
            return;
        };
        match msg.to_json() {
            Ok(json) => {
                if entry.outbound.send(json).is_err() {
                    debug!(connection = %id, event = msg.event_name(), "Outbound queue closed");
                }
            }
            Err(e) => warn!(connection = %id, "Failed to encode {}: {}", msg.event_name(), e),
        }
    }

    fn detach(&mut self, id: ConnectionId) {
        if let Some(entry) = self.connections.get_mut(&id) {
            entry.room = None;
            entry.role = Role::Unassigned;
        }
    }

    /// Removes `id` from its room. A paired room is dissolved: the remaining
    /// member gets `peer-left` and is detached so its next join starts fresh.
    fn evict(&mut self, id: ConnectionId) -> Option<String> {
        let key = self.connections.get(&id)?.room.clone()?;
        self.detach(id);

        let Some(room) = self.rooms.get_mut(&key) else {
            return Some(key);
        };
        room.remove_member(id);
        let remaining: Vec<ConnectionId> = room.members().to_vec();
        self.rooms.remove(&key);

        for peer in remaining {
            self.emit(peer, &SignalingMessage::PeerLeft { room: key.clone() });
            self.detach(peer);
            info!(room = %key, connection = %peer, "Peer left, room dissolved");
        }
        debug!(room = %key, "Room removed");
        Some(key)
    }
}

#[derive(Default)]
pub struct Rendezvous {
    registry: Mutex<Registry>,
}

impl Rendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transport connection and the queue that feeds its socket.
    pub async fn register(&self, outbound: Outbound) -> ConnectionId {
        let id = ConnectionId::new();
        self.registry.lock().await.connections.insert(
            id,
            ConnectionEntry {
                room: None,
                role: Role::Unassigned,
                outbound,
            },
        );
        debug!(connection = %id, "Connection registered");
        id
    }

    pub async fn join(&self, id: ConnectionId, room_key: &str) -> JoinOutcome {
        let mut registry = self.registry.lock().await;

        let current = match registry.connections.get(&id) {
            Some(entry) => entry.room.clone(),
            None => return JoinOutcome::UnknownConnection,
        };
        if let Some(current) = current {
            warn!(connection = %id, room = %current, "Join rejected, connection already in a room");
            registry.emit(
                id,
                &SignalingMessage::Error {
                    message: format!("already in room {}", current),
                },
            );
            return JoinOutcome::AlreadyInRoom(current);
        }

        let room = registry
            .rooms
            .entry(room_key.to_string())
            .or_insert_with(|| Room::new(room_key.to_string()));

        let role = match room.add_member(id) {
            Ok(role) => role,
            Err(_) => {
                info!(room = %room_key, connection = %id, "Room full");
                registry.emit(
                    id,
                    &SignalingMessage::Full {
                        room: room_key.to_string(),
                    },
                );
                return JoinOutcome::Full;
            }
        };

        if let Some(entry) = registry.connections.get_mut(&id) {
            entry.room = Some(room_key.to_string());
            entry.role = role;
        }
        info!(room = %room_key, connection = %id, %role, "Joined room");

        let room = room_key.to_string();
        match role {
            Role::Caller => {
                registry.emit(id, &SignalingMessage::Created { room });
                JoinOutcome::Created
            }
            _ => {
                registry.emit(id, &SignalingMessage::Joined { room });
                JoinOutcome::Joined
            }
        }
    }

    /// Forwards `raw` unchanged to the sender's peer.
    pub async fn relay(&self, sender: ConnectionId, event: &str, raw: String) -> RelayOutcome {
        let registry = self.registry.lock().await;

        let peer = registry
            .connections
            .get(&sender)
            .and_then(|entry| entry.room.as_ref())
            .and_then(|key| registry.rooms.get(key))
            .and_then(|room| room.peer_of(sender));

        let Some(peer) = peer else {
            debug!(connection = %sender, event, "No peer to relay to, dropping");
            return RelayOutcome::Dropped;
        };
        match registry.connections.get(&peer) {
            Some(entry) if entry.outbound.send(raw).is_ok() => {
                debug!(from = %sender, to = %peer, event, "Relayed");
                RelayOutcome::Delivered(peer)
            }
            _ => {
                debug!(from = %sender, to = %peer, event, "Peer queue closed, dropping");
                RelayOutcome::Dropped
            }
        }
    }

    /// Removes the connection from its room, keeping it registered.
    pub async fn leave(&self, id: ConnectionId) -> Option<String> {
        let mut registry = self.registry.lock().await;
        let left = registry.evict(id);
        if let Some(room) = &left {
            info!(room = %room, connection = %id, "Left room");
        }
        left
    }

    /// Transport closed: leave the room and forget the connection.
    pub async fn disconnect(&self, id: ConnectionId) {
        let mut registry = self.registry.lock().await;
        registry.evict(id);
        registry.connections.remove(&id);
        debug!(connection = %id, "Connection unregistered");
    }

    pub async fn room_state(&self, room_key: &str) -> RoomState {
        self.registry
            .lock()
            .await
            .rooms
            .get(room_key)
            .map(Room::state)
            .unwrap_or(RoomState::Empty)
    }

    pub async fn members(&self, room_key: &str) -> Vec<ConnectionId> {
        self.registry
            .lock()
            .await
            .rooms
            .get(room_key)
            .map(|room| room.members().to_vec())
            .unwrap_or_default()
    }

    pub async fn role_of(&self, id: ConnectionId) -> Option<Role> {
        self.registry.lock().await.connections.get(&id).map(|e| e.role)
    }

    pub async fn room_count(&self) -> usize {
        self.registry.lock().await.rooms.len()
    }
}
