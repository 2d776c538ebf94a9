//! Two-party call setup over WebRTC.
//!
//! A rendezvous server pairs two connections under a room key and relays
//! their negotiation messages; a negotiation engine on each side drives the
//! offer/answer/candidate exchange to a connected peer session.

pub mod config;
pub mod connection;
pub mod error;
pub mod media;
pub mod negotiation;
pub mod peer;
pub mod room;
pub mod server;
pub mod signaling;

pub use config::{ClientConfig, ServerConfig};
pub use connection::{SessionStatus, StatusMonitor};
pub use error::{Error, Result};
pub use negotiation::{
    CloseReason, EngineEvent, EngineHandle, NegotiationEngine, NegotiationState, PeerTransport,
};
pub use room::{ConnectionId, Rendezvous, RoomState};
pub use server::{RendezvousServer, ServerHandle};
pub use signaling::{Role, SignalingClient, SignalingMessage, SignalingSink};
