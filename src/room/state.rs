use crate::error::{Error, Result};
use crate::room::ConnectionId;
use crate::signaling::Role;

pub const MAX_MEMBERS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Empty,
    Waiting,
    Paired,
}

/// Members are kept in arrival order; position decides the role.
#[derive(Debug)]
pub struct Room {
    key: String,
    members: Vec<ConnectionId>,
}

impl Room {
    pub fn new(key: String) -> Self {
        Self {
            key,
            members: Vec::with_capacity(MAX_MEMBERS),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> RoomState {
        match self.members.len() {
            0 => RoomState::Empty,
            1 => RoomState::Waiting,
            _ => RoomState::Paired,
        }
    }

    pub fn members(&self) -> &[ConnectionId] {
        &self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn add_member(&mut self, id: ConnectionId) -> Result<Role> {
        let role = match self.state() {
            RoomState::Empty => Role::Caller,
            RoomState::Waiting => Role::Callee,
            RoomState::Paired => return Err(Error::RoomFull(self.key.clone())),
        };
        self.members.push(id);
        Ok(role)
    }

    pub fn remove_member(&mut self, id: ConnectionId) -> bool {
        let before = self.members.len();
        self.members.retain(|member| *member != id);
        self.members.len() != before
    }

    /// The other occupant, only while the room is paired.
    pub fn peer_of(&self, id: ConnectionId) -> Option<ConnectionId> {
        if self.state() != RoomState::Paired || !self.members.contains(&id) {
            return None;
        }
        self.members.iter().copied().find(|member| *member != id)
    }
}
