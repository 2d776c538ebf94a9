use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::warn;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use crate::config::ClientConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn from_codec_type(kind: RTPCodecType) -> Option<Self> {
        match kind {
            RTPCodecType::Audio => Some(MediaKind::Audio),
            RTPCodecType::Video => Some(MediaKind::Video),
            _ => None,
        }
    }
}

/// Locally captured tracks, owned by a session until it closes.
#[derive(Default)]
pub struct LocalMedia {
    tracks: Vec<Arc<TrackLocalStaticSample>>,
}

impl LocalMedia {
    pub fn new(tracks: Vec<Arc<TrackLocalStaticSample>>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[Arc<TrackLocalStaticSample>] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMedia")
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// Inbound track handed to the UI once the session is connected.
#[derive(Clone)]
pub struct RemoteTrack {
    pub track_id: String,
    pub stream_id: String,
    pub kind: MediaKind,
    pub track: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    /// Tracks without a negotiated codec type are reported as audio.
    pub fn from_webrtc(track: Arc<TrackRemote>) -> Self {
        let track_id = track.id();
        let kind = MediaKind::from_codec_type(track.kind()).unwrap_or_else(|| {
            warn!(track = %track_id, "Remote track has no codec type, treating it as audio");
            MediaKind::Audio
        });
        Self {
            track_id,
            stream_id: track.stream_id(),
            kind,
            track: Some(track),
        }
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("track_id", &self.track_id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl PartialEq for RemoteTrack {
    fn eq(&self, other: &Self) -> bool {
        self.track_id == other.track_id
            && self.stream_id == other.stream_id
            && self.kind == other.kind
    }
}

/// Local capture, supplied by the UI collaborator.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self) -> Result<LocalMedia>;
}

/// Creates Opus and VP8 sample tracks for the caller to feed.
pub struct TrackMediaSource {
    audio: bool,
    video: bool,
    stream_id: String,
}

impl TrackMediaSource {
    pub fn new(audio: bool, video: bool, stream_id: impl Into<String>) -> Self {
        Self {
            audio,
            video,
            stream_id: stream_id.into(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.audio, config.video, "webrtc-call")
    }
}

#[async_trait]
impl MediaSource for TrackMediaSource {
    async fn acquire(&self) -> Result<LocalMedia> {
        if !self.audio && !self.video {
            return Err(Error::MediaAcquisition("no audio or video requested".to_string()));
        }

        let mut tracks = Vec::new();
        if self.audio {
            tracks.push(Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48000,
                    channels: 2,
                    ..Default::default()
                },
                "audio".to_owned(),
                self.stream_id.clone(),
            )));
        }
        if self.video {
            tracks.push(Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    clock_rate: 90000,
                    ..Default::default()
                },
                "video".to_owned(),
                self.stream_id.clone(),
            )));
        }
        Ok(LocalMedia::new(tracks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_builds_requested_tracks() {
        let media = TrackMediaSource::new(true, true, "s").acquire().await.unwrap();
        assert_eq!(media.len(), 2);

        let media = TrackMediaSource::new(true, false, "s").acquire().await.unwrap();
        assert_eq!(media.len(), 1);
    }

    #[test]
    fn test_codec_type_mapping() {
        assert_eq!(MediaKind::from_codec_type(RTPCodecType::Audio), Some(MediaKind::Audio));
        assert_eq!(MediaKind::from_codec_type(RTPCodecType::Video), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_codec_type(RTPCodecType::Unspecified), None);
    }

    #[tokio::test]
    async fn test_acquire_without_media_fails() {
        let result = TrackMediaSource::new(false, false, "s").acquire().await;
        assert!(matches!(result, Err(Error::MediaAcquisition(_))));
    }
}
