//! Configuration for the rendezvous server and the calling client.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_BIND: &str = "0.0.0.0:5000";
pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:5000";
pub const DEFAULT_ICE_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun.voipbuster.com:3478",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Rendezvous server URL (ws:// or wss://)
    pub signaling_url: String,

    /// STUN/TURN URLs handed to the peer connection
    pub ice_servers: Vec<String>,

    /// Watchdog for a session waiting on its peer (disabled when `None`)
    pub negotiation_timeout: Option<Duration>,

    pub audio: bool,
    pub video: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect(),
            negotiation_timeout: None,
            audio: true,
            video: true,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.signaling_url.starts_with("ws://") || self.signaling_url.starts_with("wss://")) {
            return Err(Error::InvalidConfig(format!(
                "signaling URL must use ws:// or wss://, got {}",
                self.signaling_url
            )));
        }
        if self.ice_servers.iter().any(|url| url.trim().is_empty()) {
            return Err(Error::InvalidConfig("empty ICE server URL".to_string()));
        }
        if self.negotiation_timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidConfig(
                "negotiation timeout must be positive".to_string(),
            ));
        }
        if !self.audio && !self.video {
            return Err(Error::InvalidConfig(
                "at least one of audio or video is required".to_string(),
            ));
        }
        Ok(())
    }
}
