//! Lokale Medien - Kamera/Mikrofon oder Bildschirmfreigabe
//!
//! Verwendet cpal für die Erkennung der Audio-Eingabegeräte. Die erzeugten
//! Tracks sind `TrackLocalStaticRTP`, die Anwendung schreibt die
//! encodierten Pakete selbst hinein.

use cpal::traits::{DeviceTrait, HostTrait};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Sample Rate (48kHz ist der Standard für Opus)
pub const AUDIO_SAMPLE_RATE: u32 = 48000;

/// Channels (Mono für Voice)
pub const AUDIO_CHANNELS: u16 = 1;

/// RTP Clock Rate für Video
pub const VIDEO_CLOCK_RATE: u32 = 90000;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Media unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown media source: {0}")]
    UnknownSource(String),
}

// ============================================================================
// MEDIA SOURCE
// ============================================================================

/// Quelle für das eigene Video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaSource {
    /// Kamera + Mikrofon
    #[default]
    Camera,
    /// Bildschirmfreigabe (mit System-Audio, falls vorhanden)
    Screen,
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSource::Camera => f.write_str("camera"),
            MediaSource::Screen => f.write_str("screen"),
        }
    }
}

impl FromStr for MediaSource {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "camera" => Ok(MediaSource::Camera),
            "screen" => Ok(MediaSource::Screen),
            other => Err(MediaError::UnknownSource(other.to_string())),
        }
    }
}

// ============================================================================
// LOCAL MEDIA
// ============================================================================

/// Die lokal erfassten Tracks einer Session
#[derive(Clone)]
pub struct LocalMedia {
    source: MediaSource,
    audio: Option<Arc<TrackLocalStaticRTP>>,
    video: Option<Arc<TrackLocalStaticRTP>>,
}

impl LocalMedia {
    /// Medien aus vorhandenen Tracks, z.B. aus einer eigenen Capture-Pipeline
    pub fn new(
        source: MediaSource,
        audio: Option<Arc<TrackLocalStaticRTP>>,
        video: Option<Arc<TrackLocalStaticRTP>>,
    ) -> Self {
        Self {
            source,
            audio,
            video,
        }
    }

    /// Keine Tracks (nur Empfang)
    pub fn empty(source: MediaSource) -> Self {
        Self {
            source,
            audio: None,
            video: None,
        }
    }

    pub fn source(&self) -> MediaSource {
        self.source
    }

    /// Audio-Track, in den die Anwendung Opus-Pakete schreibt
    pub fn audio(&self) -> Option<&Arc<TrackLocalStaticRTP>> {
        self.audio.as_ref()
    }

    /// Video-Track, in den die Anwendung VP8-Pakete schreibt
    pub fn video(&self) -> Option<&Arc<TrackLocalStaticRTP>> {
        self.video.as_ref()
    }

    /// Alle Tracks in der Reihenfolge, in der sie verhandelt werden
    pub fn tracks(&self) -> Vec<Arc<dyn TrackLocal + Send + Sync>> {
        let mut tracks: Vec<Arc<dyn TrackLocal + Send + Sync>> = Vec::new();
        if let Some(audio) = &self.audio {
            tracks.push(Arc::clone(audio) as Arc<dyn TrackLocal + Send + Sync>);
        }
        if let Some(video) = &self.video {
            tracks.push(Arc::clone(video) as Arc<dyn TrackLocal + Send + Sync>);
        }
        tracks
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }
}

impl fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMedia")
            .field("source", &self.source)
            .field("audio", &self.audio.is_some())
            .field("video", &self.video.is_some())
            .finish()
    }
}

// ============================================================================
// ACQUISITION
// ============================================================================

/// Beschafft die lokalen Medien vor dem Beitritt
pub trait MediaAcquirer: Send + Sync {
    fn acquire(&self, source: MediaSource) -> Result<LocalMedia, MediaError>;
}

/// Acquirer auf Basis der echten Geräte
#[derive(Debug, Clone)]
pub struct DeviceAcquirer {
    stream_id: String,
}

impl DeviceAcquirer {
    /// `stream_id` landet als msid im SDP und gruppiert Audio + Video
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
        }
    }

    fn audio_track(&self) -> Arc<TrackLocalStaticRTP> {
        Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: AUDIO_SAMPLE_RATE,
                channels: AUDIO_CHANNELS,
                ..Default::default()
            },
            "audio".to_owned(),
            self.stream_id.clone(),
        ))
    }

    fn video_track(&self) -> Arc<TrackLocalStaticRTP> {
        Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: VIDEO_CLOCK_RATE,
                ..Default::default()
            },
            "video".to_owned(),
            self.stream_id.clone(),
        ))
    }
}

impl Default for DeviceAcquirer {
    fn default() -> Self {
        Self::new("meet-client")
    }
}

impl MediaAcquirer for DeviceAcquirer {
    fn acquire(&self, source: MediaSource) -> Result<LocalMedia, MediaError> {
        let host = cpal::default_host();
        let input_device = host.default_input_device();

        if let Some(device) = &input_device {
            tracing::info!(
                "Using audio input device: {}",
                device.name().unwrap_or_else(|_| "<unnamed>".to_string())
            );
        }

        match source {
            MediaSource::Camera => {
                if input_device.is_none() {
                    tracing::warn!("No audio input device found");
                    return Err(MediaError::Unavailable(
                        "no microphone available for camera capture".to_string(),
                    ));
                }
                Ok(LocalMedia {
                    source,
                    audio: Some(self.audio_track()),
                    video: Some(self.video_track()),
                })
            }
            MediaSource::Screen => {
                if input_device.is_none() {
                    tracing::info!("Screen capture without system audio");
                }
                Ok(LocalMedia {
                    source,
                    audio: input_device.map(|_| self.audio_track()),
                    video: Some(self.video_track()),
                })
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_source_parsing() {
        assert_eq!("camera".parse::<MediaSource>().unwrap(), MediaSource::Camera);
        assert_eq!(" Screen ".parse::<MediaSource>().unwrap(), MediaSource::Screen);
        assert!("webcam".parse::<MediaSource>().is_err());
        assert_eq!(MediaSource::default(), MediaSource::Camera);
    }

    #[test]
    fn test_empty_local_media() {
        let media = LocalMedia::empty(MediaSource::Screen);
        assert!(media.is_empty());
        assert!(media.tracks().is_empty());
        assert_eq!(media.source(), MediaSource::Screen);
    }

    #[test]
    fn test_track_codecs() {
        let acquirer = DeviceAcquirer::new("stream-1");
        let audio = acquirer.audio_track();
        let video = acquirer.video_track();

        assert_eq!(audio.codec().mime_type, MIME_TYPE_OPUS);
        assert_eq!(video.codec().clock_rate, VIDEO_CLOCK_RATE);
        assert_eq!(audio.stream_id(), "stream-1");
        assert_eq!(video.id(), "video");
    }
}
