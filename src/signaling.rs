use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::negotiation::EngineHandle;

/// Events exchanged with the rendezvous server, tagged by `event`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SignalingMessage {
    CreateOrJoin {
        room: String,
    },
    Created {
        room: String,
    },
    Joined {
        room: String,
    },
    Full {
        room: String,
    },
    Ready {
        room: String,
    },
    Offer {
        room: String,
        sdp: String,
    },
    Answer {
        room: String,
        sdp: String,
    },
    Candidate {
        room: String,
        label: u16,
        candidate: String,
    },
    Leave {
        room: String,
    },
    #[serde(rename = "peer-left")]
    PeerLeft {
        room: String,
    },
    Error {
        message: String,
    },
}

impl SignalingMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            SignalingMessage::CreateOrJoin { .. } => "create_or_join",
            SignalingMessage::Created { .. } => "created",
            SignalingMessage::Joined { .. } => "joined",
            SignalingMessage::Full { .. } => "full",
            SignalingMessage::Ready { .. } => "ready",
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::Candidate { .. } => "candidate",
            SignalingMessage::Leave { .. } => "leave",
            SignalingMessage::PeerLeft { .. } => "peer-left",
            SignalingMessage::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Role assigned by arrival order in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Unassigned,
    Caller,
    Callee,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Unassigned => write!(f, "Unassigned"),
            Role::Caller => write!(f, "Caller"),
            Role::Callee => write!(f, "Callee"),
        }
    }
}

/// Outbound half of the signaling transport as seen by a negotiation engine.
#[async_trait]
pub trait SignalingSink: Send + Sync {
    async fn send(&self, msg: SignalingMessage) -> Result<()>;
}

/// WebSocket connection to the rendezvous server.
pub struct SignalingClient {
    tx: mpsc::Sender<SignalingMessage>,
    rx: mpsc::Receiver<SignalingMessage>,
}

impl SignalingClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (tx, rx) = mpsc::channel(100);
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<SignalingMessage>(100);

        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let json = match msg.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to encode {} message: {}", msg.event_name(), e);
                        continue;
                    }
                };
                if write.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                match serde_json::from_str::<SignalingMessage>(&text) {
                    Ok(signal) => {
                        if tx.send(signal).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Dropping unparseable signaling frame: {}", e),
                }
            }
            debug!("Signaling connection closed");
        });

        Ok(Self {
            tx: outgoing_tx,
            rx,
        })
    }

    pub async fn send(&self, msg: SignalingMessage) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|e| Error::SignalingChannel(format!("Failed to send message: {}", e)))
    }

    pub fn sender(&self) -> SignalingSender {
        SignalingSender {
            tx: self.tx.clone(),
        }
    }

    /// Feeds every inbound message into an engine and reports the loss of the
    /// connection to it. Returns the outbound half for the engine to use.
    pub fn attach(self, handle: EngineHandle) -> SignalingSender {
        let sender = self.sender();
        let mut rx = self.rx;
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if !handle.signal(msg) {
                    return;
                }
            }
            handle.signaling_lost();
        });
        sender
    }
}

#[derive(Clone)]
pub struct SignalingSender {
    tx: mpsc::Sender<SignalingMessage>,
}

#[async_trait]
impl SignalingSink for SignalingSender {
    async fn send(&self, msg: SignalingMessage) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|e| Error::SignalingChannel(format!("Failed to send message: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_follow_event_tag() {
        let json = SignalingMessage::CreateOrJoin {
            room: "room-42".to_string(),
        }
        .to_json()
        .unwrap();
        assert_eq!(json, r#"{"event":"create_or_join","room":"room-42"}"#);

        let json = SignalingMessage::PeerLeft {
            room: "room-42".to_string(),
        }
        .to_json()
        .unwrap();
        assert_eq!(json, r#"{"event":"peer-left","room":"room-42"}"#);
    }

    #[test]
    fn test_candidate_payload_fields() {
        let msg: SignalingMessage = serde_json::from_str(
            r#"{"event":"candidate","room":"r","label":1,"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            SignalingMessage::Candidate {
                room: "r".to_string(),
                label: 1,
                candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".to_string(),
            }
        );
        assert_eq!(msg.event_name(), "candidate");
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let parsed = serde_json::from_str::<SignalingMessage>(r#"{"event":"hello","room":"r"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_error_frame_shape() {
        let msg = SignalingMessage::Error {
            message: "bad frame".to_string(),
        };
        assert_eq!(msg.to_json().unwrap(), r#"{"event":"error","message":"bad frame"}"#);
    }
}
