use tokio::sync::mpsc;

use crate::media::{LocalMedia, RemoteTrack};
use crate::negotiation::{IceCandidate, SdpKind, SessionDescription};
use crate::signaling::SignalingMessage;

/// Everything a negotiation engine reacts to: relayed signaling, local media
/// completion, connectivity callbacks and local commands.
#[derive(Debug)]
pub enum EngineEvent {
    Created,
    Joined,
    Full,
    Ready,
    Offer(SessionDescription),
    Answer(SessionDescription),
    RemoteCandidate(IceCandidate),
    PeerLeft,
    MediaAcquired(LocalMedia),
    MediaFailed(String),
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteTrack),
    ConnectivityFailed(String),
    /// The rendezvous server rejected one of our frames.
    ServerError(String),
    SignalingLost,
    WatchdogExpired,
    Hangup,
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Created => "created",
            EngineEvent::Joined => "joined",
            EngineEvent::Full => "full",
            EngineEvent::Ready => "ready",
            EngineEvent::Offer(_) => "offer",
            EngineEvent::Answer(_) => "answer",
            EngineEvent::RemoteCandidate(_) => "candidate",
            EngineEvent::PeerLeft => "peer-left",
            EngineEvent::MediaAcquired(_) => "media-acquired",
            EngineEvent::MediaFailed(_) => "media-failed",
            EngineEvent::LocalCandidate(_) => "local-candidate",
            EngineEvent::RemoteTrack(_) => "remote-track",
            EngineEvent::ConnectivityFailed(_) => "connectivity-failed",
            EngineEvent::ServerError(_) => "server-error",
            EngineEvent::SignalingLost => "signaling-lost",
            EngineEvent::WatchdogExpired => "watchdog-expired",
            EngineEvent::Hangup => "hangup",
        }
    }

    /// Maps a server frame onto an engine event. Client-bound frames only;
    /// anything else yields `None`.
    pub fn from_signal(msg: SignalingMessage) -> Option<Self> {
        match msg {
            SignalingMessage::Created { .. } => Some(EngineEvent::Created),
            SignalingMessage::Joined { .. } => Some(EngineEvent::Joined),
            SignalingMessage::Full { .. } => Some(EngineEvent::Full),
            SignalingMessage::Ready { .. } => Some(EngineEvent::Ready),
            SignalingMessage::Offer { sdp, .. } => Some(EngineEvent::Offer(SessionDescription {
                kind: SdpKind::Offer,
                sdp,
            })),
            SignalingMessage::Answer { sdp, .. } => Some(EngineEvent::Answer(SessionDescription {
                kind: SdpKind::Answer,
                sdp,
            })),
            SignalingMessage::Candidate {
                label, candidate, ..
            } => Some(EngineEvent::RemoteCandidate(IceCandidate { label, candidate })),
            SignalingMessage::PeerLeft { .. } => Some(EngineEvent::PeerLeft),
            SignalingMessage::Error { message } => Some(EngineEvent::ServerError(message)),
            SignalingMessage::CreateOrJoin { .. } | SignalingMessage::Leave { .. } => None,
        }
    }
}

/// Cloneable sender into an engine's event queue. Handed to the signaling
/// client, the peer transport callbacks and the UI.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns `false` once the engine is gone.
    pub fn send(&self, event: EngineEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn signal(&self, msg: SignalingMessage) -> bool {
        match EngineEvent::from_signal(msg) {
            Some(event) => self.send(event),
            None => !self.tx.is_closed(),
        }
    }

    pub fn local_candidate(&self, candidate: IceCandidate) -> bool {
        self.send(EngineEvent::LocalCandidate(candidate))
    }

    pub fn remote_track(&self, track: RemoteTrack) -> bool {
        self.send(EngineEvent::RemoteTrack(track))
    }

    pub fn connectivity_failed(&self, reason: impl Into<String>) -> bool {
        self.send(EngineEvent::ConnectivityFailed(reason.into()))
    }

    pub fn signaling_lost(&self) -> bool {
        self.send(EngineEvent::SignalingLost)
    }

    pub fn hangup(&self) -> bool {
        self.send(EngineEvent::Hangup)
    }
}
