//! Media Transport
//!
//! Abstraktion über die Peer Connection. Der Coordinator kennt nur dieses
//! Trait, `RtcTransport` implementiert es mit webrtc-rs.
//!
//! Events der Peer Connection (negotiation-needed, lokale Candidates,
//! eingehende Tracks) landen als `TransportEvent` in einem Kanal.

use crate::media::LocalMedia;
use crate::signaling::{IceCandidate, SdpKind, SessionDescription};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Invalid signaling state: {0}")]
    InvalidState(String),
}

// ============================================================================
// SIGNALING STATE
// ============================================================================

/// Signaling-Zustand der Peer Connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

impl SignalingState {
    /// Nächste implizite lokale Description: Answer wenn ein Remote-Offer
    /// anliegt, sonst Offer
    pub fn implicit_local_kind(self) -> Option<SdpKind> {
        match self {
            SignalingState::Stable | SignalingState::HaveLocalOffer => Some(SdpKind::Offer),
            SignalingState::HaveRemoteOffer | SignalingState::HaveLocalPranswer => {
                Some(SdpKind::Answer)
            }
            SignalingState::HaveRemotePranswer | SignalingState::Closed => None,
        }
    }
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalingState::Stable => "stable",
            SignalingState::HaveLocalOffer => "have-local-offer",
            SignalingState::HaveRemoteOffer => "have-remote-offer",
            SignalingState::HaveLocalPranswer => "have-local-pranswer",
            SignalingState::HaveRemotePranswer => "have-remote-pranswer",
            SignalingState::Closed => "closed",
        };
        f.write_str(name)
    }
}

impl From<RTCSignalingState> for SignalingState {
    fn from(state: RTCSignalingState) -> Self {
        match state {
            RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
            RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
            RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
            RTCSignalingState::Closed => SignalingState::Closed,
            _ => SignalingState::Stable,
        }
    }
}

// ============================================================================
// TRANSPORT EVENTS
// ============================================================================

/// Events der Peer Connection
#[derive(Debug, Clone)]
pub enum TransportEvent<T> {
    NegotiationNeeded,
    /// `None` = Candidate-Sammlung abgeschlossen
    LocalCandidate(Option<IceCandidate>),
    RemoteTrack { mid: Option<String>, track: T },
}

// ============================================================================
// MEDIA TRANSPORT
// ============================================================================

#[async_trait]
pub trait MediaTransport: Send + Sync + 'static {
    /// Handle für eingehende Tracks
    type Track: Clone + Send + Sync + 'static;

    fn signaling_state(&self) -> SignalingState;

    /// Implizites setLocalDescription: Offer in `stable`, Answer in
    /// `have-remote-offer`. Gibt die gesetzte Description zurück.
    async fn set_local_description(&self) -> Result<SessionDescription, TransportError>;

    /// Setzt die Remote Description. Ein Offer in `have-local-offer` verwirft
    /// die eigene, noch unbeantwortete Offer vorher.
    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), TransportError>;

    /// Identische Candidates werden nur einmal angewendet
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError>;

    async fn add_local_media(&self, media: &LocalMedia) -> Result<(), TransportError>;

    /// Ab hier erzeugt der Transport keine Events mehr
    fn detach_handlers(&self);

    async fn close(&self) -> Result<(), TransportError>;
}

fn candidate_key(candidate: &IceCandidate) -> String {
    format!(
        "{}|{}|{}",
        candidate.candidate,
        candidate.sdp_mid.as_deref().unwrap_or_default(),
        candidate
            .sdp_mline_index
            .map(|index| index.to_string())
            .unwrap_or_default()
    )
}

// ============================================================================
// RTC TRANSPORT
// ============================================================================

pub type RtcEvent = TransportEvent<Arc<TrackRemote>>;

/// `MediaTransport` über eine webrtc-rs Peer Connection
///
/// webrtc-rs kennt kein lokales Rollback aus `have-local-offer`. Muss der
/// polite Peer seine noch unbeantwortete Offer verwerfen, wird die Peer
/// Connection mit denselben lokalen Tracks neu aufgebaut. Nach einer
/// abgeschlossenen Verhandlung ist das nicht mehr möglich.
pub struct RtcTransport {
    api: API,
    config: RTCConfiguration,
    pc: RwLock<Arc<RTCPeerConnection>>,
    events: mpsc::UnboundedSender<RtcEvent>,
    local_tracks: Mutex<Vec<Arc<dyn TrackLocal + Send + Sync>>>,
    applied_candidates: Mutex<HashSet<String>>,
    detached: AtomicBool,
}

impl RtcTransport {
    /// Erstellt die Peer Connection und registriert die Event Handler
    pub async fn new(
        ice_servers: Vec<RTCIceServer>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RtcEvent>), TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::WebRtc(e.to_string()))?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| TransportError::WebRtc(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config.clone())
                .await
                .map_err(|e| TransportError::WebRtc(e.to_string()))?,
        );

        let (events, event_rx) = mpsc::unbounded_channel();
        Self::setup_handlers(&pc, events.clone());

        Ok((
            Self {
                api,
                config,
                pc: RwLock::new(pc),
                events,
                local_tracks: Mutex::new(Vec::new()),
                applied_candidates: Mutex::new(HashSet::new()),
                detached: AtomicBool::new(false),
            },
            event_rx,
        ))
    }

    fn pc(&self) -> Arc<RTCPeerConnection> {
        Arc::clone(&self.pc.read())
    }

    fn setup_handlers(pc: &RTCPeerConnection, event_tx: mpsc::UnboundedSender<RtcEvent>) {
        let tx = event_tx.clone();
        pc.on_negotiation_needed(Box::new(move || {
            let _ = tx.send(TransportEvent::NegotiationNeeded);
            Box::pin(async {})
        }));

        let tx = event_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let event = match candidate {
                Some(c) => match c.to_json() {
                    Ok(init) => Some(TransportEvent::LocalCandidate(Some(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }))),
                    Err(e) => {
                        tracing::warn!("Failed to serialize local candidate: {}", e);
                        None
                    }
                },
                None => Some(TransportEvent::LocalCandidate(None)),
            };
            if let Some(event) = event {
                let _ = tx.send(event);
            }
            Box::pin(async {})
        }));

        let tx = event_tx;
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  transceiver: Arc<RTCRtpTransceiver>| {
                let mid = transceiver.mid().map(|mid| mid.to_string());
                tracing::info!("Received track {} on mid {:?}", track.kind(), mid);
                let _ = tx.send(TransportEvent::RemoteTrack { mid, track });
                Box::pin(async {})
            },
        ));
    }

    fn clear_handlers(pc: &RTCPeerConnection) {
        pc.on_negotiation_needed(Box::new(|| Box::pin(async {})));
        pc.on_ice_candidate(Box::new(|_| Box::pin(async {})));
        pc.on_track(Box::new(|_, _, _| Box::pin(async {})));
    }

    /// Verwirft die eigene Offer und wendet die Remote-Offer auf einer
    /// frischen Peer Connection an
    ///
    /// Die Handler kommen erst nach `set_remote_description` dazu, sonst
    /// meldet die neue Connection sofort negotiation-needed.
    async fn restart_with_remote_offer(
        &self,
        remote: RTCSessionDescription,
    ) -> Result<(), TransportError> {
        let previous = self.pc();
        if previous.current_remote_description().await.is_some() {
            return Err(TransportError::InvalidState(
                "cannot discard a local offer after the first completed negotiation".to_string(),
            ));
        }

        tracing::debug!("Discarding unanswered local offer");
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.config.clone())
                .await
                .map_err(|e| TransportError::WebRtc(e.to_string()))?,
        );

        let tracks = self.local_tracks.lock().clone();
        for track in tracks {
            pc.add_track(track)
                .await
                .map_err(|e| TransportError::WebRtc(e.to_string()))?;
        }

        if let Err(e) = pc.set_remote_description(remote).await {
            let _ = pc.close().await;
            return Err(TransportError::WebRtc(e.to_string()));
        }

        if !self.detached.load(Ordering::SeqCst) {
            Self::setup_handlers(&pc, self.events.clone());
        }
        Self::clear_handlers(&previous);

        *self.pc.write() = pc;
        self.applied_candidates.lock().clear();

        if let Err(e) = previous.close().await {
            tracing::warn!("Failed to close discarded peer connection: {}", e);
        }
        Ok(())
    }
}

#[async_trait]
impl MediaTransport for RtcTransport {
    type Track = Arc<TrackRemote>;

    fn signaling_state(&self) -> SignalingState {
        self.pc.read().signaling_state().into()
    }

    async fn set_local_description(&self) -> Result<SessionDescription, TransportError> {
        let pc = self.pc();
        let state = SignalingState::from(pc.signaling_state());
        let desc = match state.implicit_local_kind() {
            Some(SdpKind::Offer) => pc.create_offer(None).await,
            Some(_) => pc.create_answer(None).await,
            None => {
                return Err(TransportError::InvalidState(format!(
                    "cannot create local description in {}",
                    state
                )))
            }
        }
        .map_err(|e| TransportError::WebRtc(e.to_string()))?;

        pc.set_local_description(desc.clone())
            .await
            .map_err(|e| TransportError::WebRtc(e.to_string()))?;

        let applied = pc.local_description().await.unwrap_or(desc);
        let kind = match applied.sdp_type {
            RTCSdpType::Offer => SdpKind::Offer,
            RTCSdpType::Pranswer => SdpKind::Pranswer,
            _ => SdpKind::Answer,
        };
        Ok(SessionDescription {
            kind,
            sdp: applied.sdp,
        })
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), TransportError> {
        let remote = match desc.kind {
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp.clone()),
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp.clone()),
            SdpKind::Pranswer => RTCSessionDescription::pranswer(desc.sdp.clone()),
            SdpKind::Rollback => {
                return Err(TransportError::InvalidState(
                    "remote rollback is not supported".to_string(),
                ))
            }
        }
        .map_err(|e| TransportError::InvalidSdp(e.to_string()))?;

        if desc.is_offer() && self.signaling_state() == SignalingState::HaveLocalOffer {
            return self.restart_with_remote_offer(remote).await;
        }

        self.pc()
            .set_remote_description(remote)
            .await
            .map_err(|e| TransportError::WebRtc(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        let key = candidate_key(candidate);
        if self.applied_candidates.lock().contains(&key) {
            tracing::debug!("Candidate already applied");
            return Ok(());
        }

        self.pc()
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate.clone(),
                sdp_mid: candidate.sdp_mid.clone(),
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment.clone(),
            })
            .await
            .map_err(|e| TransportError::WebRtc(e.to_string()))?;

        self.applied_candidates.lock().insert(key);
        Ok(())
    }

    async fn add_local_media(&self, media: &LocalMedia) -> Result<(), TransportError> {
        let pc = self.pc();
        for track in media.tracks() {
            pc.add_track(Arc::clone(&track))
                .await
                .map_err(|e| TransportError::WebRtc(e.to_string()))?;
            self.local_tracks.lock().push(track);
        }
        tracing::info!("Added local {} media", media.source());
        Ok(())
    }

    fn detach_handlers(&self) {
        self.detached.store(true, Ordering::SeqCst);
        Self::clear_handlers(&self.pc.read());
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.pc()
            .close()
            .await
            .map_err(|e| TransportError::WebRtc(e.to_string()))
    }
}

impl fmt::Debug for RtcTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtcTransport")
            .field("signaling_state", &self.signaling_state())
            .field("applied_candidates", &self.applied_candidates.lock().len())
            .finish()
    }
}

// ============================================================================
// FAKE TRANSPORT (TESTS)
// ============================================================================

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Hält `set_local_description` an, bis der Test es freigibt
    #[derive(Default)]
    pub(crate) struct Gate {
        pub(crate) entered: Notify,
        pub(crate) release: Notify,
    }

    /// Signaling-Zustandsautomat ohne echtes Netzwerk
    ///
    /// Erlaubt nur die Übergänge, die auch `RtcTransport` schafft: eine
    /// Remote-Offer in `have-local-offer` ersetzt die Connection, aber nur
    /// solange noch keine Verhandlung abgeschlossen ist.
    pub(crate) struct FakeTransport {
        label: String,
        state: Mutex<SignalingState>,
        has_remote: AtomicBool,
        negotiated: AtomicBool,
        candidates: Mutex<HashSet<String>>,
        gate: Option<Arc<Gate>>,
        pub(crate) local_tracks: AtomicUsize,
        pub(crate) restarts: AtomicUsize,
        pub(crate) detached: AtomicBool,
        pub(crate) closed: AtomicBool,
    }

    impl FakeTransport {
        pub(crate) fn new(label: &str) -> Self {
            Self {
                label: label.to_string(),
                state: Mutex::new(SignalingState::Stable),
                has_remote: AtomicBool::new(false),
                negotiated: AtomicBool::new(false),
                candidates: Mutex::new(HashSet::new()),
                gate: None,
                local_tracks: AtomicUsize::new(0),
                restarts: AtomicUsize::new(0),
                detached: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }
        }

        pub(crate) fn gated(label: &str, gate: Arc<Gate>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(label)
            }
        }

        pub(crate) fn set_state(&self, state: SignalingState) {
            *self.state.lock() = state;
        }

        pub(crate) fn candidate_count(&self) -> usize {
            self.candidates.lock().len()
        }
    }

    #[async_trait]
    impl MediaTransport for FakeTransport {
        type Track = String;

        fn signaling_state(&self) -> SignalingState {
            *self.state.lock()
        }

        async fn set_local_description(&self) -> Result<SessionDescription, TransportError> {
            if let Some(gate) = &self.gate {
                gate.entered.notify_one();
                gate.release.notified().await;
            }

            let mut state = self.state.lock();
            match *state {
                SignalingState::Stable | SignalingState::HaveLocalOffer => {
                    *state = SignalingState::HaveLocalOffer;
                    Ok(SessionDescription::offer(format!("offer-from-{}", self.label)))
                }
                SignalingState::HaveRemoteOffer => {
                    *state = SignalingState::Stable;
                    self.negotiated.store(true, Ordering::SeqCst);
                    Ok(SessionDescription::answer(format!("answer-from-{}", self.label)))
                }
                other => Err(TransportError::InvalidState(other.to_string())),
            }
        }

        async fn set_remote_description(
            &self,
            desc: &SessionDescription,
        ) -> Result<(), TransportError> {
            let mut state = self.state.lock();
            let next = match (desc.kind, *state) {
                (SdpKind::Offer, SignalingState::Stable) => SignalingState::HaveRemoteOffer,
                (SdpKind::Offer, SignalingState::HaveLocalOffer) => {
                    if self.negotiated.load(Ordering::SeqCst) {
                        return Err(TransportError::InvalidState(
                            "cannot discard a local offer after the first completed negotiation"
                                .to_string(),
                        ));
                    }
                    self.restarts.fetch_add(1, Ordering::SeqCst);
                    self.candidates.lock().clear();
                    SignalingState::HaveRemoteOffer
                }
                (SdpKind::Answer, SignalingState::HaveLocalOffer) => {
                    self.negotiated.store(true, Ordering::SeqCst);
                    SignalingState::Stable
                }
                (kind, current) => {
                    return Err(TransportError::InvalidState(format!(
                        "cannot apply {} in {}",
                        kind, current
                    )))
                }
            };
            *state = next;
            self.has_remote.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
            if !self.has_remote.load(Ordering::SeqCst) {
                return Err(TransportError::InvalidState(
                    "no remote description".to_string(),
                ));
            }
            self.candidates.lock().insert(candidate_key(candidate));
            Ok(())
        }

        async fn add_local_media(&self, media: &LocalMedia) -> Result<(), TransportError> {
            self.local_tracks
                .fetch_add(media.tracks().len(), Ordering::SeqCst);
            Ok(())
        }

        fn detach_handlers(&self) {
            self.detached.store(true, Ordering::SeqCst);
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.closed.store(true, Ordering::SeqCst);
            *self.state.lock() = SignalingState::Closed;
            Ok(())
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::fake::FakeTransport;
    use super::*;
    use crate::media::MediaSource;
    use std::sync::atomic::Ordering;
    use tokio::time::{sleep, timeout, Duration};
    use webrtc::api::media_engine::MIME_TYPE_OPUS;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
    use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

    const WAIT: Duration = Duration::from_secs(10);

    fn audio_track(id: &str) -> Arc<TrackLocalStaticRTP> {
        Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 1,
                ..Default::default()
            },
            id.to_owned(),
            "test-stream".to_owned(),
        ))
    }

    fn audio_media(id: &str) -> LocalMedia {
        LocalMedia::new(MediaSource::Camera, Some(audio_track(id)), None)
    }

    async fn rtc_with_audio(id: &str) -> (RtcTransport, mpsc::UnboundedReceiver<RtcEvent>) {
        let (transport, events) = RtcTransport::new(vec![]).await.unwrap();
        transport.add_local_media(&audio_media(id)).await.unwrap();
        (transport, events)
    }

    /// Wartet auf das Ende der Candidate-Sammlung
    async fn gathering_complete(events: &mut mpsc::UnboundedReceiver<RtcEvent>) {
        loop {
            match timeout(WAIT, events.recv()).await.unwrap() {
                Some(TransportEvent::LocalCandidate(None)) => return,
                Some(_) => continue,
                None => panic!("transport event channel closed"),
            }
        }
    }

    fn host_candidate() -> IceCandidate {
        IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 192.168.1.10 50000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    #[test]
    fn test_implicit_local_kind() {
        assert_eq!(SignalingState::Stable.implicit_local_kind(), Some(SdpKind::Offer));
        assert_eq!(
            SignalingState::HaveRemoteOffer.implicit_local_kind(),
            Some(SdpKind::Answer)
        );
        assert_eq!(SignalingState::Closed.implicit_local_kind(), None);
        assert_eq!(SignalingState::HaveLocalOffer.to_string(), "have-local-offer");
    }

    #[test]
    fn test_signaling_state_from_rtc() {
        assert_eq!(
            SignalingState::from(RTCSignalingState::HaveRemoteOffer),
            SignalingState::HaveRemoteOffer
        );
        assert_eq!(SignalingState::from(RTCSignalingState::Stable), SignalingState::Stable);
    }

    // ========================================================================
    // FAKE TRANSPORT
    // ========================================================================

    #[tokio::test]
    async fn test_fake_replaces_unanswered_offer() {
        let transport = FakeTransport::new("a");
        let offer = transport.set_local_description().await.unwrap();
        assert!(offer.is_offer());
        assert_eq!(transport.signaling_state(), SignalingState::HaveLocalOffer);

        transport
            .set_remote_description(&SessionDescription::offer("remote"))
            .await
            .unwrap();
        assert_eq!(transport.signaling_state(), SignalingState::HaveRemoteOffer);
        assert_eq!(transport.restarts.load(Ordering::SeqCst), 1);

        let answer = transport.set_local_description().await.unwrap();
        assert_eq!(answer.kind, SdpKind::Answer);
        assert_eq!(transport.signaling_state(), SignalingState::Stable);
    }

    #[tokio::test]
    async fn test_fake_keeps_offer_after_completed_negotiation() {
        let transport = FakeTransport::new("a");
        transport.set_local_description().await.unwrap();
        transport
            .set_remote_description(&SessionDescription::answer("remote"))
            .await
            .unwrap();

        transport.set_local_description().await.unwrap();
        let result = transport
            .set_remote_description(&SessionDescription::offer("remote"))
            .await;
        assert!(matches!(result, Err(TransportError::InvalidState(_))));
        assert_eq!(transport.signaling_state(), SignalingState::HaveLocalOffer);
    }

    #[tokio::test]
    async fn test_duplicate_candidate_is_noop() {
        let transport = FakeTransport::new("a");
        let candidate = host_candidate();

        assert!(transport.add_ice_candidate(&candidate).await.is_err());

        transport
            .set_remote_description(&SessionDescription::offer("remote"))
            .await
            .unwrap();
        transport.add_ice_candidate(&candidate).await.unwrap();
        transport.add_ice_candidate(&candidate).await.unwrap();
        assert_eq!(transport.candidate_count(), 1);
    }

    // ========================================================================
    // RTC TRANSPORT
    // ========================================================================

    #[tokio::test]
    async fn test_rtc_offer_answer_exchange() {
        let (a, _a_events) = rtc_with_audio("audio-a").await;
        let (b, _b_events) = rtc_with_audio("audio-b").await;

        let offer = a.set_local_description().await.unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(offer.sdp.contains("m=audio"));
        assert_eq!(a.signaling_state(), SignalingState::HaveLocalOffer);

        b.set_remote_description(&offer).await.unwrap();
        assert_eq!(b.signaling_state(), SignalingState::HaveRemoteOffer);

        let answer = b.set_local_description().await.unwrap();
        assert_eq!(answer.kind, SdpKind::Answer);
        assert_eq!(b.signaling_state(), SignalingState::Stable);

        a.set_remote_description(&answer).await.unwrap();
        assert_eq!(a.signaling_state(), SignalingState::Stable);

        a.close().await.unwrap();
        b.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rtc_remote_offer_replaces_unanswered_local_offer() {
        let (polite, mut polite_events) = rtc_with_audio("audio-a").await;
        let (impolite, _impolite_events) = rtc_with_audio("audio-b").await;

        let _discarded = polite.set_local_description().await.unwrap();
        let offer = impolite.set_local_description().await.unwrap();
        gathering_complete(&mut polite_events).await;

        polite.set_remote_description(&offer).await.unwrap();
        assert_eq!(polite.signaling_state(), SignalingState::HaveRemoteOffer);

        let answer = polite.set_local_description().await.unwrap();
        assert_eq!(answer.kind, SdpKind::Answer);
        assert!(answer.sdp.contains("m=audio"));
        assert_eq!(polite.signaling_state(), SignalingState::Stable);

        impolite.set_remote_description(&answer).await.unwrap();
        assert_eq!(impolite.signaling_state(), SignalingState::Stable);

        // Die neue Connection meldet ihre Candidates über denselben Kanal
        gathering_complete(&mut polite_events).await;

        polite.close().await.unwrap();
        impolite.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rtc_offer_cannot_be_discarded_after_negotiation() {
        let (a, _a_events) = rtc_with_audio("audio-a").await;
        let (b, _b_events) = rtc_with_audio("audio-b").await;

        let offer = a.set_local_description().await.unwrap();
        b.set_remote_description(&offer).await.unwrap();
        let answer = b.set_local_description().await.unwrap();
        a.set_remote_description(&answer).await.unwrap();

        a.set_local_description().await.unwrap();
        let second = b.set_local_description().await.unwrap();
        assert!(second.is_offer());

        let result = a.set_remote_description(&second).await;
        assert!(matches!(result, Err(TransportError::InvalidState(_))));
        assert_eq!(a.signaling_state(), SignalingState::HaveLocalOffer);

        a.close().await.unwrap();
        b.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rtc_duplicate_candidate_is_applied_once() {
        let (a, _a_events) = rtc_with_audio("audio-a").await;
        let (b, _b_events) = rtc_with_audio("audio-b").await;

        assert!(b.add_ice_candidate(&host_candidate()).await.is_err());

        let offer = a.set_local_description().await.unwrap();
        b.set_remote_description(&offer).await.unwrap();

        b.add_ice_candidate(&host_candidate()).await.unwrap();
        b.add_ice_candidate(&host_candidate()).await.unwrap();
        assert_eq!(b.applied_candidates.lock().len(), 1);

        a.close().await.unwrap();
        b.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rtc_events_stop_after_detach() {
        let (transport, mut events) = RtcTransport::new(vec![]).await.unwrap();

        transport.add_local_media(&audio_media("audio-a")).await.unwrap();
        loop {
            match timeout(WAIT, events.recv()).await.unwrap() {
                Some(TransportEvent::NegotiationNeeded) => break,
                Some(_) => continue,
                None => panic!("transport event channel closed"),
            }
        }

        transport.detach_handlers();
        transport.add_local_media(&audio_media("audio-b")).await.unwrap();
        transport.set_local_description().await.unwrap();
        sleep(Duration::from_millis(500)).await;

        assert!(events.try_recv().is_err());
        transport.close().await.unwrap();
    }
}
