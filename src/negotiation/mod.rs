//! Per-participant negotiation engine.
//!
//! One engine drives one call attempt: it consumes rendezvous events, local
//! media completion and connectivity callbacks from a single queue and
//! reacts to them one at a time. The session state is the only guard: an
//! event the current state does not accept is logged and dropped.
//!
//! Only the Caller creates an offer, and only after the Callee has sent
//! `ready`, so both sides never offer at once. Remote candidates that arrive
//! before the remote description are queued and applied once it is set.

mod event;
mod session;

pub use event::{EngineEvent, EngineHandle};
pub use session::{CloseReason, NegotiationSession, NegotiationState};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::connection::StatusMonitor;
use crate::error::{Error, Result};
use crate::media::{LocalMedia, MediaSource, RemoteTrack};
use crate::signaling::{Role, SignalingMessage, SignalingSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

/// A trickled ICE candidate; `label` is the m-line index it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub label: u16,
    pub candidate: String,
}

/// Offer/answer primitives of the underlying connectivity engine.
///
/// Implementations report locally gathered candidates, inbound tracks and
/// terminal connectivity failure through an [`EngineHandle`].
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn attach_tracks(&self, media: &LocalMedia) -> Result<()>;
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

pub struct NegotiationEngine {
    room: String,
    session: NegotiationSession,
    transport: Arc<dyn PeerTransport>,
    signaling: Arc<dyn SignalingSink>,
    media: Arc<dyn MediaSource>,
    monitor: StatusMonitor,
    handle: EngineHandle,
    events: mpsc::UnboundedReceiver<EngineEvent>,
    negotiation_timeout: Option<Duration>,
    deadline: Option<Instant>,
    peer_ready: bool,
    early_tracks: Vec<RemoteTrack>,
}

impl NegotiationEngine {
    pub fn new(
        room: impl Into<String>,
        transport: Arc<dyn PeerTransport>,
        signaling: Arc<dyn SignalingSink>,
        media: Arc<dyn MediaSource>,
        handle: EngineHandle,
        events: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> Self {
        Self {
            room: room.into(),
            session: NegotiationSession::new(),
            transport,
            signaling,
            media,
            monitor: StatusMonitor::new(),
            handle,
            events,
            negotiation_timeout: None,
            deadline: None,
            peer_ready: false,
            early_tracks: Vec::new(),
        }
    }

    /// Closes the session if it waits on its peer for longer than `timeout`.
    pub fn with_negotiation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn state(&self) -> &NegotiationState {
        self.session.state()
    }

    pub fn role(&self) -> Role {
        self.session.role()
    }

    pub fn session(&self) -> &NegotiationSession {
        &self.session
    }

    pub fn monitor(&self) -> StatusMonitor {
        self.monitor.clone()
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Asks the rendezvous server for a seat in the room.
    pub async fn start(&mut self) {
        if self.room.is_empty() {
            self.fail(Error::InvalidConfig("room key must not be empty".to_string()))
                .await;
            return;
        }
        info!(room = %self.room, "Joining room");
        let msg = SignalingMessage::CreateOrJoin {
            room: self.room.clone(),
        };
        if let Err(e) = self.signaling.send(msg).await {
            self.fail(e).await;
        }
    }

    /// Joins the room and processes events until the session closes.
    pub async fn run(mut self) -> CloseReason {
        self.start().await;
        loop {
            if let NegotiationState::Closed(reason) = self.session.state() {
                return reason.clone();
            }
            let event = self.next_event().await;
            self.handle_event(event).await;
        }
    }

    /// Processes one queued event. Returns `false` once the session is closed.
    pub async fn step(&mut self) -> bool {
        if self.session.state().is_closed() {
            return false;
        }
        let event = self.next_event().await;
        self.handle_event(event).await;
        !self.session.state().is_closed()
    }

    async fn next_event(&mut self) -> EngineEvent {
        let deadline = self.deadline;
        let watchdog = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            event = self.events.recv() => event.unwrap_or(EngineEvent::SignalingLost),
            _ = watchdog => EngineEvent::WatchdogExpired,
        }
    }

    pub async fn handle_event(&mut self, event: EngineEvent) {
        let name = event.name();
        if let Err(e) = self.dispatch(event).await {
            if e.is_fatal() {
                error!(room = %self.room, event = name, "Session failed: {}", e);
                self.fail(e).await;
            } else {
                warn!(room = %self.room, state = %self.session.state(), event = name, "Ignoring out-of-order event");
            }
        }
    }

    async fn dispatch(&mut self, event: EngineEvent) -> Result<()> {
        use NegotiationState::*;

        let state = self.session.state().clone();
        match (state, event) {
            (Closed(_), event) => {
                debug!(room = %self.room, event = event.name(), "Session closed, dropping event");
                Ok(())
            }
            (_, EngineEvent::Hangup) => {
                self.close(CloseReason::LocalHangup).await;
                Ok(())
            }
            (_, EngineEvent::PeerLeft) => {
                self.close(CloseReason::PeerLeft).await;
                Ok(())
            }
            (_, EngineEvent::SignalingLost) => Err(Error::SignalingChannel(
                "signaling transport disconnected".to_string(),
            )),
            (_, EngineEvent::ConnectivityFailed(reason)) => Err(Error::ConnectionFailed(reason)),
            (_, EngineEvent::LocalCandidate(candidate)) => self.send_candidate(candidate).await,
            // Only the join can be rejected while idle; nothing else would move us on.
            (Idle, EngineEvent::ServerError(message)) => Err(Error::NegotiationFailed(format!(
                "rendezvous server rejected join: {}",
                message
            ))),
            (_, EngineEvent::ServerError(message)) => {
                warn!(room = %self.room, "Rendezvous server reported: {}", message);
                Ok(())
            }

            (Idle, EngineEvent::Created) => self.assign_role(Role::Caller),
            (Idle, EngineEvent::Joined) => self.assign_role(Role::Callee),
            (Idle, EngineEvent::Full) => Err(Error::RoomFull(self.room.clone())),

            (AcquiringMedia, EngineEvent::MediaAcquired(media)) => {
                self.on_media_acquired(media).await
            }
            (AcquiringMedia, EngineEvent::MediaFailed(reason)) => {
                Err(Error::MediaAcquisition(reason))
            }
            (AcquiringMedia, EngineEvent::Ready) if self.session.role() == Role::Caller => {
                debug!(room = %self.room, "Peer ready before local media, deferring offer");
                self.peer_ready = true;
                Ok(())
            }
            (AwaitingPeerReady, EngineEvent::Ready) => self.send_offer().await,

            (Offering, EngineEvent::Answer(desc)) => {
                self.apply_remote_description(desc).await?;
                self.transition(Connected);
                Ok(())
            }
            (Answering, EngineEvent::Offer(desc)) => {
                self.apply_remote_description(desc).await?;
                self.send_answer().await?;
                self.transition(Connected);
                Ok(())
            }

            (Offering | Answering | Connected, EngineEvent::RemoteCandidate(candidate)) => {
                self.on_remote_candidate(candidate).await;
                Ok(())
            }

            (Connected, EngineEvent::RemoteTrack(track)) => {
                info!(room = %self.room, track = %track.track_id, "Remote track available");
                self.monitor.add_remote_track(track);
                Ok(())
            }
            (AcquiringMedia | AwaitingPeerReady | Offering | Answering, EngineEvent::RemoteTrack(track)) => {
                self.early_tracks.push(track);
                Ok(())
            }

            (AwaitingPeerReady | Offering | Answering, EngineEvent::WatchdogExpired) => {
                Err(Error::NegotiationTimeout)
            }

            (state, event) => Err(Error::InvalidStateTransition {
                state: state.to_string(),
                event: event.name().to_string(),
            }),
        }
    }

    fn transition(&mut self, next: NegotiationState) {
        debug!(room = %self.room, from = %self.session.state(), to = %next, "Transition");
        self.deadline = match (next.is_waiting(), self.negotiation_timeout) {
            (true, Some(timeout)) => Some(Instant::now() + timeout),
            _ => None,
        };
        if next == NegotiationState::Connected {
            info!(room = %self.room, role = %self.session.role(), "Session connected");
        }
        self.session.set_state(next.clone());
        self.monitor.update_state(next);

        if self.session.state() == &NegotiationState::Connected {
            for track in self.early_tracks.drain(..) {
                self.monitor.add_remote_track(track);
            }
        }
    }

    fn assign_role(&mut self, role: Role) -> Result<()> {
        if !self.session.assign_role(role) {
            return Err(Error::InvalidStateTransition {
                state: self.session.state().to_string(),
                event: format!("assign {}", role),
            });
        }
        info!(room = %self.room, %role, "Role assigned");
        self.monitor.set_role(role);
        self.transition(NegotiationState::AcquiringMedia);
        self.begin_media_acquisition();
        Ok(())
    }

    fn begin_media_acquisition(&self) {
        let media = Arc::clone(&self.media);
        let handle = self.handle.clone();
        tokio::spawn(async move {
            let event = match media.acquire().await {
                Ok(media) => EngineEvent::MediaAcquired(media),
                Err(e) => EngineEvent::MediaFailed(e.to_string()),
            };
            handle.send(event);
        });
    }

    async fn on_media_acquired(&mut self, media: LocalMedia) -> Result<()> {
        self.transport.attach_tracks(&media).await?;
        debug!(room = %self.room, tracks = media.len(), "Local media attached");
        self.session.attach_media(media);

        match self.session.role() {
            Role::Caller => {
                self.transition(NegotiationState::AwaitingPeerReady);
                if std::mem::take(&mut self.peer_ready) {
                    self.send_offer().await?;
                }
            }
            _ => {
                self.signaling
                    .send(SignalingMessage::Ready {
                        room: self.room.clone(),
                    })
                    .await?;
                self.transition(NegotiationState::Answering);
            }
        }
        Ok(())
    }

    async fn send_offer(&mut self) -> Result<()> {
        let offer = self.transport.create_offer().await?;
        self.transport.set_local_description(offer.clone()).await?;
        self.signaling
            .send(SignalingMessage::Offer {
                room: self.room.clone(),
                sdp: offer.sdp,
            })
            .await?;
        self.transition(NegotiationState::Offering);
        Ok(())
    }

    async fn send_answer(&mut self) -> Result<()> {
        let answer = self.transport.create_answer().await?;
        self.transport.set_local_description(answer.clone()).await?;
        self.signaling
            .send(SignalingMessage::Answer {
                room: self.room.clone(),
                sdp: answer.sdp,
            })
            .await
    }

    async fn apply_remote_description(&mut self, desc: SessionDescription) -> Result<()> {
        if self.session.remote_description_set() {
            return Err(Error::InvalidStateTransition {
                state: self.session.state().to_string(),
                event: "remote description".to_string(),
            });
        }
        self.transport.set_remote_description(desc).await?;

        let pending = self.session.mark_remote_description_set();
        if !pending.is_empty() {
            debug!(room = %self.room, count = pending.len(), "Flushing buffered candidates");
        }
        for candidate in pending {
            self.apply_candidate(candidate).await;
        }
        Ok(())
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        if self.session.remote_description_set() {
            self.apply_candidate(candidate).await;
        } else {
            self.session.buffer_candidate(candidate);
            debug!(room = %self.room, pending = self.session.pending_candidates(), "Buffered remote candidate");
        }
    }

    async fn apply_candidate(&self, candidate: IceCandidate) {
        if let Err(e) = self.transport.add_ice_candidate(candidate).await {
            warn!(room = %self.room, "Failed to add remote candidate: {}", e);
        }
    }

    async fn send_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.signaling
            .send(SignalingMessage::Candidate {
                room: self.room.clone(),
                label: candidate.label,
                candidate: candidate.candidate,
            })
            .await
    }

    async fn fail(&mut self, err: Error) {
        self.close(CloseReason::from(&err)).await;
    }

    /// Releases local media, closes the transport and gives up the room seat.
    async fn close(&mut self, reason: CloseReason) {
        if self.session.state().is_closed() {
            return;
        }
        let joined = self.session.role() != Role::Unassigned;

        self.deadline = None;
        self.session.set_state(NegotiationState::Closed(reason.clone()));

        if let Some(media) = self.session.release_media() {
            debug!(room = %self.room, tracks = media.len(), "Released local media");
        }
        if let Err(e) = self.transport.close().await {
            warn!(room = %self.room, "Failed to close peer transport: {}", e);
        }
        let seat_held = !matches!(
            reason,
            CloseReason::SignalingLost | CloseReason::PeerLeft | CloseReason::RoomFull
        );
        if joined && seat_held {
            let leave = SignalingMessage::Leave {
                room: self.room.clone(),
            };
            if let Err(e) = self.signaling.send(leave).await {
                debug!(room = %self.room, "Could not send leave: {}", e);
            }
        }

        info!(room = %self.room, %reason, "Session closed");
        self.monitor.closed(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorded {
        local: Vec<SessionDescription>,
        remote: Vec<SessionDescription>,
        candidates: Vec<IceCandidate>,
        closed: bool,
    }

    #[derive(Default)]
    struct FakeTransport {
        recorded: Mutex<Recorded>,
        fail_remote: bool,
    }

    #[async_trait]
    impl PeerTransport for FakeTransport {
        async fn attach_tracks(&self, _media: &LocalMedia) -> Result<()> {
            Ok(())
        }
        async fn create_offer(&self) -> Result<SessionDescription> {
            Ok(SessionDescription {
                kind: SdpKind::Offer,
                sdp: "offer-sdp".to_string(),
            })
        }
        async fn create_answer(&self) -> Result<SessionDescription> {
            Ok(SessionDescription {
                kind: SdpKind::Answer,
                sdp: "answer-sdp".to_string(),
            })
        }
        async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
            self.recorded.lock().unwrap().local.push(desc);
            Ok(())
        }
        async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
            if self.fail_remote {
                return Err(Error::NegotiationFailed("malformed sdp".to_string()));
            }
            self.recorded.lock().unwrap().remote.push(desc);
            Ok(())
        }
        async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
            self.recorded.lock().unwrap().candidates.push(candidate);
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            self.recorded.lock().unwrap().closed = true;
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeSignaling {
        sent: Mutex<Vec<SignalingMessage>>,
    }

    impl FakeSignaling {
        fn sent(&self) -> Vec<SignalingMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SignalingSink for FakeSignaling {
        async fn send(&self, msg: SignalingMessage) -> Result<()> {
            self.sent.lock().unwrap().push(msg);
            Ok(())
        }
    }

    struct FakeMedia {
        fail: bool,
    }

    #[async_trait]
    impl MediaSource for FakeMedia {
        async fn acquire(&self) -> Result<LocalMedia> {
            if self.fail {
                return Err(Error::MediaAcquisition("permission denied".to_string()));
            }
            Ok(LocalMedia::default())
        }
    }

    struct Harness {
        engine: NegotiationEngine,
        transport: Arc<FakeTransport>,
        signaling: Arc<FakeSignaling>,
    }

    fn harness_with(transport: FakeTransport, media_fails: bool) -> Harness {
        let transport = Arc::new(transport);
        let signaling = Arc::new(FakeSignaling::default());
        let (handle, events) = EngineHandle::channel();
        let engine = NegotiationEngine::new(
            "room-42",
            transport.clone(),
            signaling.clone(),
            Arc::new(FakeMedia { fail: media_fails }),
            handle,
            events,
        );
        Harness {
            engine,
            transport,
            signaling,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeTransport::default(), false)
    }

    fn candidate(n: u16) -> IceCandidate {
        IceCandidate {
            label: 0,
            candidate: format!("candidate:{}", n),
        }
    }

    fn sdp(kind: SdpKind, sdp: &str) -> SessionDescription {
        SessionDescription {
            kind,
            sdp: sdp.to_string(),
        }
    }

    /// Drives an engine to `AwaitingPeerReady` (Caller) or `Answering` (Callee).
    async fn acquire(h: &mut Harness, event: EngineEvent) {
        h.engine.handle_event(event).await;
        assert_eq!(h.engine.state(), &NegotiationState::AcquiringMedia);
        assert!(h.engine.step().await);
    }

    #[tokio::test]
    async fn test_caller_offers_after_ready() {
        let mut h = harness();
        h.engine.start().await;
        acquire(&mut h, EngineEvent::Created).await;
        assert_eq!(h.engine.role(), Role::Caller);
        assert_eq!(h.engine.state(), &NegotiationState::AwaitingPeerReady);

        h.engine.handle_event(EngineEvent::Ready).await;
        assert_eq!(h.engine.state(), &NegotiationState::Offering);

        h.engine
            .handle_event(EngineEvent::Answer(sdp(SdpKind::Answer, "remote")))
            .await;
        assert_eq!(h.engine.state(), &NegotiationState::Connected);
        assert!(h.engine.session().remote_description_set());

        assert_eq!(
            h.signaling.sent(),
            vec![
                SignalingMessage::CreateOrJoin { room: "room-42".into() },
                SignalingMessage::Offer {
                    room: "room-42".into(),
                    sdp: "offer-sdp".into()
                },
            ]
        );
        let recorded = h.transport.recorded.lock().unwrap();
        assert_eq!(recorded.local, vec![sdp(SdpKind::Offer, "offer-sdp")]);
        assert_eq!(recorded.remote, vec![sdp(SdpKind::Answer, "remote")]);
    }

    #[tokio::test]
    async fn test_callee_sends_ready_then_answers() {
        let mut h = harness();
        acquire(&mut h, EngineEvent::Joined).await;
        assert_eq!(h.engine.role(), Role::Callee);
        assert_eq!(h.engine.state(), &NegotiationState::Answering);
        assert_eq!(
            h.signaling.sent(),
            vec![SignalingMessage::Ready { room: "room-42".into() }]
        );

        h.engine
            .handle_event(EngineEvent::Offer(sdp(SdpKind::Offer, "remote-offer")))
            .await;
        assert_eq!(h.engine.state(), &NegotiationState::Connected);
        assert_eq!(
            h.signaling.sent().last(),
            Some(&SignalingMessage::Answer {
                room: "room-42".into(),
                sdp: "answer-sdp".into()
            })
        );
    }

    #[tokio::test]
    async fn test_candidates_before_offer_are_buffered_and_flushed_in_order() {
        let mut h = harness();
        acquire(&mut h, EngineEvent::Joined).await;

        for n in 0..3 {
            h.engine.handle_event(EngineEvent::RemoteCandidate(candidate(n))).await;
        }
        assert_eq!(h.engine.session().pending_candidates(), 3);
        assert!(h.transport.recorded.lock().unwrap().candidates.is_empty());

        h.engine
            .handle_event(EngineEvent::Offer(sdp(SdpKind::Offer, "o")))
            .await;
        h.engine.handle_event(EngineEvent::RemoteCandidate(candidate(3))).await;

        let applied = h.transport.recorded.lock().unwrap().candidates.clone();
        assert_eq!(applied, (0..4).map(candidate).collect::<Vec<_>>());
        assert_eq!(h.engine.session().pending_candidates(), 0);
    }

    #[tokio::test]
    async fn test_caller_buffers_candidates_until_answer() {
        let mut h = harness();
        acquire(&mut h, EngineEvent::Created).await;
        h.engine.handle_event(EngineEvent::Ready).await;
        assert_eq!(h.engine.state(), &NegotiationState::Offering);

        for n in 0..3 {
            h.engine.handle_event(EngineEvent::RemoteCandidate(candidate(n))).await;
        }
        assert_eq!(h.engine.session().pending_candidates(), 3);
        assert!(h.transport.recorded.lock().unwrap().candidates.is_empty());

        h.engine
            .handle_event(EngineEvent::Answer(sdp(SdpKind::Answer, "a")))
            .await;
        assert_eq!(h.engine.state(), &NegotiationState::Connected);
        assert_eq!(
            h.transport.recorded.lock().unwrap().candidates,
            (0..3).map(candidate).collect::<Vec<_>>()
        );
        assert_eq!(h.engine.session().pending_candidates(), 0);
    }

    #[tokio::test]
    async fn test_second_remote_description_is_ignored() {
        let mut h = harness();
        acquire(&mut h, EngineEvent::Created).await;
        h.engine.handle_event(EngineEvent::Ready).await;
        h.engine
            .handle_event(EngineEvent::Answer(sdp(SdpKind::Answer, "first")))
            .await;

        h.engine
            .handle_event(EngineEvent::Answer(sdp(SdpKind::Answer, "second")))
            .await;
        h.engine
            .handle_event(EngineEvent::Offer(sdp(SdpKind::Offer, "third")))
            .await;

        assert_eq!(h.engine.state(), &NegotiationState::Connected);
        assert_eq!(
            h.transport.recorded.lock().unwrap().remote,
            vec![sdp(SdpKind::Answer, "first")]
        );
    }

    #[tokio::test]
    async fn test_out_of_order_events_do_not_change_state() {
        let mut h = harness();
        h.engine
            .handle_event(EngineEvent::Answer(sdp(SdpKind::Answer, "a")))
            .await;
        assert_eq!(h.engine.state(), &NegotiationState::Idle);

        acquire(&mut h, EngineEvent::Created).await;
        h.engine.handle_event(EngineEvent::Ready).await;
        // A Caller never answers an offer.
        h.engine
            .handle_event(EngineEvent::Offer(sdp(SdpKind::Offer, "glare")))
            .await;
        assert_eq!(h.engine.state(), &NegotiationState::Offering);

        h.engine.handle_event(EngineEvent::Joined).await;
        assert_eq!(h.engine.role(), Role::Caller);
    }

    #[tokio::test]
    async fn test_ready_during_media_acquisition_is_deferred() {
        let mut h = harness();
        h.engine.handle_event(EngineEvent::Created).await;
        h.engine.handle_event(EngineEvent::Ready).await;
        assert_eq!(h.engine.state(), &NegotiationState::AcquiringMedia);

        assert!(h.engine.step().await);
        assert_eq!(h.engine.state(), &NegotiationState::Offering);
    }

    #[tokio::test]
    async fn test_full_room_closes() {
        let mut h = harness();
        h.engine.start().await;
        h.engine.handle_event(EngineEvent::Full).await;
        assert_eq!(h.engine.state(), &NegotiationState::Closed(CloseReason::RoomFull));
        assert_eq!(h.signaling.sent().len(), 1);
        assert!(!h.engine.step().await);
    }

    #[tokio::test]
    async fn test_empty_room_closes_without_joining() {
        let transport = Arc::new(FakeTransport::default());
        let signaling = Arc::new(FakeSignaling::default());
        let (handle, events) = EngineHandle::channel();
        let mut engine = NegotiationEngine::new(
            "",
            transport,
            signaling.clone(),
            Arc::new(FakeMedia { fail: false }),
            handle,
            events,
        );
        engine.start().await;
        assert!(matches!(
            engine.state(),
            NegotiationState::Closed(CloseReason::NegotiationFailed(_))
        ));
        assert!(signaling.sent().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_join_closes() {
        let mut h = harness();
        let monitor = h.engine.monitor();
        h.engine.start().await;
        h.engine.handle().signal(SignalingMessage::Error {
            message: "already in room other".to_string(),
        });
        assert!(!h.engine.step().await);

        assert!(matches!(
            h.engine.state(),
            NegotiationState::Closed(CloseReason::NegotiationFailed(e)) if e.contains("already in room")
        ));
        assert!(monitor.current().last_error.is_some());
        // Never seated, so nothing to leave.
        assert_eq!(h.signaling.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_server_error_after_join_is_not_fatal() {
        let mut h = harness();
        acquire(&mut h, EngineEvent::Joined).await;
        h.engine
            .handle_event(EngineEvent::ServerError("unsupported event ping".to_string()))
            .await;
        assert_eq!(h.engine.state(), &NegotiationState::Answering);
    }

    #[tokio::test]
    async fn test_media_failure_closes() {
        let mut h = harness_with(FakeTransport::default(), true);
        h.engine.handle_event(EngineEvent::Joined).await;
        assert!(!h.engine.step().await);
        assert!(matches!(
            h.engine.state(),
            NegotiationState::Closed(CloseReason::MediaAcquisitionError(_))
        ));
        assert_eq!(
            h.signaling.sent(),
            vec![SignalingMessage::Leave { room: "room-42".into() }]
        );
    }

    #[tokio::test]
    async fn test_rejected_description_closes_and_releases() {
        let transport = FakeTransport {
            fail_remote: true,
            ..Default::default()
        };
        let mut h = harness_with(transport, false);
        acquire(&mut h, EngineEvent::Joined).await;
        assert!(h.engine.session().local_media().is_some());

        h.engine
            .handle_event(EngineEvent::Offer(sdp(SdpKind::Offer, "bad")))
            .await;
        assert!(matches!(
            h.engine.state(),
            NegotiationState::Closed(CloseReason::NegotiationFailed(_))
        ));
        assert!(h.engine.session().local_media().is_none());
        assert!(h.transport.recorded.lock().unwrap().closed);
    }

    #[tokio::test]
    async fn test_connectivity_and_signaling_failures() {
        let mut h = harness();
        acquire(&mut h, EngineEvent::Created).await;
        h.engine
            .handle_event(EngineEvent::ConnectivityFailed("ice failed".to_string()))
            .await;
        assert_eq!(
            h.engine.state(),
            &NegotiationState::Closed(CloseReason::ConnectionFailed("ice failed".to_string()))
        );

        let mut h = harness();
        acquire(&mut h, EngineEvent::Joined).await;
        h.engine.handle_event(EngineEvent::SignalingLost).await;
        assert_eq!(h.engine.state(), &NegotiationState::Closed(CloseReason::SignalingLost));
        assert!(!h
            .signaling
            .sent()
            .iter()
            .any(|m| matches!(m, SignalingMessage::Leave { .. })));
    }

    #[tokio::test]
    async fn test_local_candidates_are_sent() {
        let mut h = harness();
        acquire(&mut h, EngineEvent::Created).await;
        h.engine.handle_event(EngineEvent::Ready).await;
        h.engine.handle_event(EngineEvent::LocalCandidate(candidate(7))).await;
        assert_eq!(
            h.signaling.sent().last(),
            Some(&SignalingMessage::Candidate {
                room: "room-42".into(),
                label: 0,
                candidate: "candidate:7".into()
            })
        );
    }

    #[tokio::test]
    async fn test_remote_tracks_published_once_connected() {
        let mut h = harness();
        let monitor = h.engine.monitor();
        acquire(&mut h, EngineEvent::Joined).await;

        let track = RemoteTrack {
            track_id: "video".to_string(),
            stream_id: "s".to_string(),
            kind: crate::media::MediaKind::Video,
            track: None,
        };
        h.engine.handle_event(EngineEvent::RemoteTrack(track.clone())).await;
        assert!(monitor.current().remote_tracks.is_empty());

        h.engine
            .handle_event(EngineEvent::Offer(sdp(SdpKind::Offer, "o")))
            .await;
        assert_eq!(monitor.current().remote_tracks, vec![track]);
    }

    #[tokio::test]
    async fn test_hangup_releases_and_leaves() {
        let mut h = harness();
        acquire(&mut h, EngineEvent::Created).await;
        h.engine.handle().hangup();
        assert!(!h.engine.step().await);

        assert_eq!(h.engine.state(), &NegotiationState::Closed(CloseReason::LocalHangup));
        assert!(h.engine.session().local_media().is_none());
        assert_eq!(
            h.signaling.sent().last(),
            Some(&SignalingMessage::Leave { room: "room-42".into() })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_closes_waiting_session() {
        let h = harness();
        let engine = h
            .engine
            .with_negotiation_timeout(Some(Duration::from_secs(5)));
        let handle = engine.handle();
        handle.send(EngineEvent::Created);

        let reason = engine.run().await;
        assert_eq!(reason, CloseReason::NegotiationTimeout);
    }
}
