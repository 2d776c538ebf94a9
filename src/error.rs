use tokio_tungstenite::tungstenite::Error as WsError;
use webrtc::Error as WebRTCError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The room already holds two members.
    #[error("room {0} is full")]
    RoomFull(String),

    /// Local capture failed or was denied.
    #[error("media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// An event arrived while the engine was in a state that does not accept it.
    #[error("event {event} is not valid in state {state}")]
    InvalidStateTransition { state: String, event: String },

    #[error("signaling channel error: {0}")]
    SignalingChannel(String),

    /// The connectivity layer reported a terminal failure.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// An offer/answer operation was rejected by the connectivity engine.
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("negotiation timed out")]
    NegotiationTimeout,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("WebRTC error: {0}")]
    WebRTC(#[from] WebRTCError),

    #[error("WebSocket error: {0}")]
    Ws(#[from] WsError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Everything except an out-of-order event terminates the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::InvalidStateTransition { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
