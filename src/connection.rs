use std::sync::Arc;
use tokio::sync::watch;

use crate::media::RemoteTrack;
use crate::negotiation::{CloseReason, NegotiationState};
use crate::signaling::Role;

/// What the UI collaborator sees of a session.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: NegotiationState,
    pub role: Role,
    pub remote_tracks: Vec<RemoteTrack>,
    pub last_error: Option<String>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: NegotiationState::Idle,
            role: Role::Unassigned,
            remote_tracks: Vec::new(),
            last_error: None,
        }
    }
}

#[derive(Clone)]
pub struct StatusMonitor {
    status: Arc<watch::Sender<SessionStatus>>,
    receiver: watch::Receiver<SessionStatus>,
}

impl StatusMonitor {
    pub fn new() -> Self {
        let (status, receiver) = watch::channel(SessionStatus::default());
        Self {
            status: Arc::new(status),
            receiver,
        }
    }

    pub fn update_state(&self, state: NegotiationState) {
        self.status.send_modify(|status| {
            status.state = state;
        });
    }

    pub fn set_role(&self, role: Role) {
        self.status.send_modify(|status| {
            status.role = role;
        });
    }

    pub fn add_remote_track(&self, track: RemoteTrack) {
        self.status.send_modify(|status| {
            status.remote_tracks.push(track);
        });
    }

    pub fn closed(&self, reason: CloseReason) {
        self.status.send_modify(|status| {
            status.last_error = reason.is_error().then(|| reason.to_string());
            status.remote_tracks.clear();
            status.state = NegotiationState::Closed(reason);
        });
    }

    pub fn current(&self) -> SessionStatus {
        self.receiver.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.receiver.clone()
    }
}

impl Default for StatusMonitor {
    fn default() -> Self {
        Self::new()
    }
}
