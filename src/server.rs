//! WebSocket front end of the rendezvous server.
//!
//! Each connection gets a writer task fed by an unbounded queue and a read
//! loop that parses only the `event` and `room` fields of a frame. Negotiation
//! frames are relayed as the exact text received.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::room::{ConnectionId, Outbound, Rendezvous};
use crate::signaling::SignalingMessage;

const RELAYED_EVENTS: [&str; 4] = ["ready", "offer", "answer", "candidate"];

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    room: Option<String>,
}

pub struct RendezvousServer {
    listener: TcpListener,
    rendezvous: Arc<Rendezvous>,
}

impl RendezvousServer {
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind).await?;
        Ok(Self {
            listener,
            rendezvous: Arc::new(Rendezvous::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn rendezvous(&self) -> Arc<Rendezvous> {
        Arc::clone(&self.rendezvous)
    }

    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!("Rendezvous server listening on ws://{}", self.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let rendezvous = Arc::clone(&self.rendezvous);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer_addr, rendezvous).await {
                                    warn!("WebSocket connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }
                _ = &mut shutdown => {
                    info!("Rendezvous server shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Runs the server on a background task.
    pub fn spawn(self) -> Result<ServerHandle> {
        let addr = self.local_addr()?;
        let rendezvous = self.rendezvous();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(self.run_until(async {
            let _ = shutdown_rx.await;
        }));
        Ok(ServerHandle {
            addr,
            rendezvous,
            shutdown_tx,
            task,
        })
    }
}

pub struct ServerHandle {
    addr: SocketAddr,
    rendezvous: Arc<Rendezvous>,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn rendezvous(&self) -> Arc<Rendezvous> {
        Arc::clone(&self.rendezvous)
    }

    /// Stops accepting; established connections finish on their own.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    rendezvous: Arc<Rendezvous>,
) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let id = rendezvous.register(tx.clone()).await;
    info!(connection = %id, "Accepted WebSocket connection from {}", peer_addr);

    let forward_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = ws_tx.send(Message::Text(frame)).await {
                debug!("Failed to write frame: {}", e);
                break;
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => dispatch_frame(&rendezvous, id, &tx, text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(connection = %id, "WebSocket read error: {}", e);
                break;
            }
        }
    }

    info!(connection = %id, "Connection closed");
    rendezvous.disconnect(id).await;
    forward_task.abort();
    Ok(())
}

async fn dispatch_frame(rendezvous: &Rendezvous, id: ConnectionId, tx: &Outbound, text: String) {
    let envelope: Envelope = match serde_json::from_str(&text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(connection = %id, "Unparseable frame: {}", e);
            reply_error(tx, format!("invalid frame: {}", e));
            return;
        }
    };

    match envelope.event.as_str() {
        "create_or_join" => match envelope.room {
            Some(room) if !room.is_empty() => {
                rendezvous.join(id, &room).await;
            }
            _ => reply_error(tx, "create_or_join requires a room".to_string()),
        },
        "leave" => {
            rendezvous.leave(id).await;
        }
        event if RELAYED_EVENTS.contains(&event) => {
            rendezvous.relay(id, event, text).await;
        }
        other => {
            warn!(connection = %id, event = other, "Dropping unsupported event");
            reply_error(tx, format!("unsupported event {}", other));
        }
    }
}

fn reply_error(tx: &Outbound, message: String) {
    if let Ok(json) = (SignalingMessage::Error { message }).to_json() {
        let _ = tx.send(json);
    }
}
