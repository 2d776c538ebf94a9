use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use webrtc_call::config::{ClientConfig, ServerConfig, DEFAULT_BIND, DEFAULT_SIGNALING_URL};
use webrtc_call::media::TrackMediaSource;
use webrtc_call::negotiation::{EngineHandle, NegotiationEngine, NegotiationState};
use webrtc_call::peer::WebRtcPeer;
use webrtc_call::server::RendezvousServer;
use webrtc_call::signaling::SignalingClient;

#[derive(Parser)]
#[command(name = "webrtc-call", version, about = "Two-party WebRTC calls through a rendezvous server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the rendezvous server
    Serve {
        #[arg(long, env = "WEBRTC_CALL_BIND", default_value = DEFAULT_BIND)]
        bind: SocketAddr,
    },
    /// Join a room and set up a call with whoever else joins it
    Call {
        /// Room key; a fresh one is generated when omitted
        room: Option<String>,

        #[arg(long, env = "WEBRTC_CALL_SIGNALING_URL", default_value = DEFAULT_SIGNALING_URL)]
        signaling_url: String,

        /// STUN/TURN server URL (repeatable)
        #[arg(long = "ice-server", env = "WEBRTC_CALL_ICE_SERVERS", value_delimiter = ',')]
        ice_servers: Vec<String>,

        /// Give up if the peer does not respond within this many seconds
        #[arg(long, env = "WEBRTC_CALL_TIMEOUT_SECS")]
        timeout_secs: Option<u64>,

        #[arg(long, env = "WEBRTC_CALL_NO_AUDIO")]
        no_audio: bool,

        #[arg(long, env = "WEBRTC_CALL_NO_VIDEO")]
        no_video: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Serve { bind } => serve(ServerConfig { bind }).await,
        Command::Call {
            room,
            signaling_url,
            ice_servers,
            timeout_secs,
            no_audio,
            no_video,
        } => {
            let mut config = ClientConfig {
                signaling_url,
                negotiation_timeout: timeout_secs.map(Duration::from_secs),
                audio: !no_audio,
                video: !no_video,
                ..Default::default()
            };
            if !ice_servers.is_empty() {
                config.ice_servers = ice_servers;
            }
            let room = room.unwrap_or_else(|| Uuid::new_v4().to_string());
            call(config, room).await
        }
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    let server = RendezvousServer::bind(&config).await?;
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

async fn call(config: ClientConfig, room: String) -> Result<()> {
    config.validate()?;
    println!("Room: {}", room);

    let (handle, events) = EngineHandle::channel();
    let client = SignalingClient::connect(&config.signaling_url).await?;
    let signaling = Arc::new(client.attach(handle.clone()));
    let peer = Arc::new(WebRtcPeer::new(&config, handle.clone()).await?);
    let media = Arc::new(TrackMediaSource::from_config(&config));

    let engine = NegotiationEngine::new(room, peer, signaling, media, handle.clone(), events)
        .with_negotiation_timeout(config.negotiation_timeout);

    let mut status = engine.monitor().subscribe();
    tokio::spawn(async move {
        let mut shown_tracks = 0;
        while status.changed().await.is_ok() {
            let current = status.borrow().clone();
            println!("{} ({})", current.state, current.role);
            for track in current.remote_tracks.iter().skip(shown_tracks) {
                println!("Receiving {:?} track {}", track.kind, track.track_id);
            }
            shown_tracks = current.remote_tracks.len();
            if matches!(current.state, NegotiationState::Closed(_)) {
                break;
            }
        }
    });

    let hangup = handle;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            hangup.hangup();
        }
    });

    let reason = engine.run().await;
    info!(%reason, "Call ended");
    if reason.is_error() {
        anyhow::bail!("call ended: {}", reason);
    }
    Ok(())
}
