use std::collections::VecDeque;
use std::fmt;

use crate::error::Error;
use crate::media::LocalMedia;
use crate::negotiation::IceCandidate;
use crate::signaling::Role;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    RoomFull,
    MediaAcquisitionError(String),
    ConnectionFailed(String),
    NegotiationFailed(String),
    SignalingLost,
    NegotiationTimeout,
    PeerLeft,
    LocalHangup,
}

impl CloseReason {
    /// Whether the UI should present this as a failure.
    pub fn is_error(&self) -> bool {
        !matches!(self, CloseReason::PeerLeft | CloseReason::LocalHangup)
    }
}

impl From<&Error> for CloseReason {
    fn from(err: &Error) -> Self {
        match err {
            Error::RoomFull(_) => CloseReason::RoomFull,
            Error::MediaAcquisition(e) => CloseReason::MediaAcquisitionError(e.clone()),
            Error::SignalingChannel(_) | Error::Ws(_) => CloseReason::SignalingLost,
            Error::ConnectionFailed(e) => CloseReason::ConnectionFailed(e.clone()),
            Error::NegotiationTimeout => CloseReason::NegotiationTimeout,
            other => CloseReason::NegotiationFailed(other.to_string()),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::RoomFull => write!(f, "room is full"),
            CloseReason::MediaAcquisitionError(e) => write!(f, "media acquisition failed: {}", e),
            CloseReason::ConnectionFailed(e) => write!(f, "connection failed: {}", e),
            CloseReason::NegotiationFailed(e) => write!(f, "negotiation failed: {}", e),
            CloseReason::SignalingLost => write!(f, "signaling channel lost"),
            CloseReason::NegotiationTimeout => write!(f, "negotiation timed out"),
            CloseReason::PeerLeft => write!(f, "peer left"),
            CloseReason::LocalHangup => write!(f, "hung up"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    AcquiringMedia,
    AwaitingPeerReady,
    Offering,
    Answering,
    Connected,
    Closed(CloseReason),
}

impl NegotiationState {
    pub fn is_closed(&self) -> bool {
        matches!(self, NegotiationState::Closed(_))
    }

    /// States in which the engine is blocked on its peer.
    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            NegotiationState::AwaitingPeerReady
                | NegotiationState::Offering
                | NegotiationState::Answering
        )
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationState::Idle => write!(f, "Idle"),
            NegotiationState::AcquiringMedia => write!(f, "AcquiringMedia"),
            NegotiationState::AwaitingPeerReady => write!(f, "AwaitingPeerReady"),
            NegotiationState::Offering => write!(f, "Offering"),
            NegotiationState::Answering => write!(f, "Answering"),
            NegotiationState::Connected => write!(f, "Connected"),
            NegotiationState::Closed(reason) => write!(f, "Closed({})", reason),
        }
    }
}

/// Per-participant negotiation state. Owned by exactly one engine.
#[derive(Debug)]
pub struct NegotiationSession {
    role: Role,
    state: NegotiationState,
    remote_description_set: bool,
    pending_candidates: VecDeque<IceCandidate>,
    local_media: Option<LocalMedia>,
}

impl NegotiationSession {
    pub fn new() -> Self {
        Self {
            role: Role::Unassigned,
            state: NegotiationState::Idle,
            remote_description_set: false,
            pending_candidates: VecDeque::new(),
            local_media: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Roles are assigned once; later attempts are refused.
    pub fn assign_role(&mut self, role: Role) -> bool {
        if self.role != Role::Unassigned {
            return false;
        }
        self.role = role;
        true
    }

    pub fn state(&self) -> &NegotiationState {
        &self.state
    }

    pub(crate) fn set_state(&mut self, state: NegotiationState) {
        self.state = state;
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    /// Queues a remote candidate. Returns `false` once a remote description
    /// exists, in which case the caller applies it directly.
    pub fn buffer_candidate(&mut self, candidate: IceCandidate) -> bool {
        if self.remote_description_set {
            return false;
        }
        self.pending_candidates.push_back(candidate);
        true
    }

    /// Marks the remote description as applied and hands back everything
    /// buffered so far, oldest first. Only the first call yields candidates.
    pub fn mark_remote_description_set(&mut self) -> Vec<IceCandidate> {
        if self.remote_description_set {
            return Vec::new();
        }
        self.remote_description_set = true;
        let flushed: Vec<IceCandidate> = self.pending_candidates.drain(..).collect();
        self.pending_candidates.shrink_to_fit();
        flushed
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn attach_media(&mut self, media: LocalMedia) {
        self.local_media = Some(media);
    }

    pub fn local_media(&self) -> Option<&LocalMedia> {
        self.local_media.as_ref()
    }

    pub fn release_media(&mut self) -> Option<LocalMedia> {
        self.local_media.take()
    }
}

impl Default for NegotiationSession {
    fn default() -> Self {
        Self::new()
    }
}
