//! Negotiation Coordinator (Perfect Negotiation)
//!
//! Eine Instanz pro Raumbeitritt. Verarbeitet:
//! - negotiation-needed → implizite Offer senden
//! - eingehende Offer/Answer inkl. Glare-Auflösung über die Rolle
//! - Trickle ICE in beide Richtungen
//! - Remote-Tracks, Stream-Mappings und Raum-Metadaten
//!
//! Alle Handler nehmen `&self`; Flags und Registry liegen hinter
//! `parking_lot`-Locks, die nie über ein `.await` gehalten werden.

use super::transport::{MediaTransport, SignalingState, TransportError};
use crate::presence::{RoomPresenceView, RoomState, RoomUpdate};
use crate::registry::{ParticipantView, RemoteStream, TrackPlacement, TrackRegistry};
use crate::signaling::{
    IceCandidate, SessionDescription, SignalMessage, SignalSender, SignalingError, StreamMapping,
};
use parking_lot::Mutex;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("Remote candidate rejected: {0}")]
    CandidateRejected(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Unknown signaling role: {0}")]
    UnknownRole(String),

    #[error("Session is closed")]
    Closed,
}

// ============================================================================
// ROLE
// ============================================================================

/// Rolle bei Offer-Kollisionen
///
/// Polite gibt nach (verwirft die eigene Offer), Impolite ignoriert die
/// fremde Offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalingRole {
    #[default]
    Polite,
    Impolite,
}

impl SignalingRole {
    /// Deterministische Rolle für ein Peer-Paar: die kleinere Identität ist
    /// polite, beide Seiten kommen ohne Absprache zum selben Ergebnis
    pub fn derive(local_id: &str, remote_id: &str) -> Self {
        if local_id <= remote_id {
            SignalingRole::Polite
        } else {
            SignalingRole::Impolite
        }
    }

    pub fn is_polite(self) -> bool {
        self == SignalingRole::Polite
    }
}

impl fmt::Display for SignalingRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalingRole::Polite => f.write_str("polite"),
            SignalingRole::Impolite => f.write_str("impolite"),
        }
    }
}

impl FromStr for SignalingRole {
    type Err = NegotiationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polite" => Ok(SignalingRole::Polite),
            "impolite" => Ok(SignalingRole::Impolite),
            other => Err(NegotiationError::UnknownRole(other.to_string())),
        }
    }
}

/// Wie eine Session ihre Rolle bekommt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolePolicy {
    Fixed(SignalingRole),
    /// Aus eigener und fremder Identität abgeleitet
    Derived { remote_id: String },
}

impl Default for RolePolicy {
    fn default() -> Self {
        RolePolicy::Fixed(SignalingRole::Polite)
    }
}

impl RolePolicy {
    pub fn resolve(&self, local_id: Option<&str>) -> SignalingRole {
        match self {
            RolePolicy::Fixed(role) => *role,
            RolePolicy::Derived { remote_id } => match local_id {
                Some(local_id) => SignalingRole::derive(local_id, remote_id),
                None => {
                    tracing::warn!("No local identity to derive role from, staying polite");
                    SignalingRole::Polite
                }
            },
        }
    }
}

// ============================================================================
// EVENTS & OUTCOMES
// ============================================================================

/// Events für die UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ParticipantBound {
        mid: String,
        user_id: String,
        display_name: String,
    },
    StreamCreated {
        user_id: String,
    },
    TrackAppended {
        user_id: String,
    },
    RoomStateChanged(RoomState),
    Closed,
}

/// Ergebnis einer eingehenden Nachricht
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// Offer-Kollision auf der impoliten Seite, Nachricht verworfen
    OfferIgnored,
    /// Remote-Offer angewendet und Answer gesendet
    Answered,
    /// Remote-Answer angewendet
    DescriptionApplied,
    CandidateApplied,
    /// Candidate gehörte zu einer ignorierten Offer
    CandidateIgnored,
    MappingApplied,
    RoomStateUpdated,
}

/// Perfect-Negotiation Flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NegotiationFlags {
    pub making_offer: bool,
    pub ignore_offer: bool,
}

// ============================================================================
// NEGOTIATION COORDINATOR
// ============================================================================

pub struct NegotiationCoordinator<T: MediaTransport> {
    transport: Arc<T>,
    signals: SignalSender,
    role: SignalingRole,
    flags: Mutex<NegotiationFlags>,
    registry: Mutex<TrackRegistry<T::Track>>,
    room_state: watch::Sender<RoomState>,
    events: broadcast::Sender<SessionEvent>,
    closed: AtomicBool,
}

impl<T: MediaTransport> NegotiationCoordinator<T> {
    pub fn new(transport: Arc<T>, signals: SignalSender, role: SignalingRole) -> Self {
        let (room_state, _) = watch::channel(RoomState::default());
        let (events, _) = broadcast::channel(100);

        Self {
            transport,
            signals,
            role,
            flags: Mutex::new(NegotiationFlags::default()),
            registry: Mutex::new(TrackRegistry::new()),
            room_state,
            events,
            closed: AtomicBool::new(false),
        }
    }

    pub fn role(&self) -> SignalingRole {
        self.role
    }

    pub fn flags(&self) -> NegotiationFlags {
        *self.flags.lock()
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn presence(&self) -> RoomPresenceView {
        RoomPresenceView::new(self.room_state.subscribe())
    }

    pub fn participants(&self) -> Vec<ParticipantView> {
        self.registry.lock().participants()
    }

    pub fn stream_for(&self, user_id: &str) -> Option<RemoteStream<T::Track>> {
        self.registry.lock().stream_for(user_id).cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), NegotiationError> {
        if self.is_closed() {
            return Err(NegotiationError::Closed);
        }
        Ok(())
    }

    fn emit(&self, event: SessionEvent) {
        // Kein Empfänger ist kein Fehler
        let _ = self.events.send(event);
    }

    // ========================================================================
    // LOCAL SIDE
    // ========================================================================

    /// negotiation-needed: Offer erzeugen, setzen und senden
    pub async fn on_negotiation_needed(&self) -> Result<(), NegotiationError> {
        self.ensure_open()?;

        self.flags.lock().making_offer = true;
        let result = self.send_local_description().await;
        self.flags.lock().making_offer = false;

        if let Err(e) = &result {
            tracing::warn!("Negotiation failed: {}", e);
        }
        result
    }

    async fn send_local_description(&self) -> Result<(), NegotiationError> {
        let desc = self.transport.set_local_description().await?;
        self.ensure_open()?;

        tracing::debug!("Sending local {}", desc.kind);
        self.signals.send(&SignalMessage::Description(desc))?;
        Ok(())
    }

    /// Lokaler Candidate: unverändert weiterleiten, Ende-Marker nicht
    pub fn on_local_candidate(&self, candidate: Option<IceCandidate>) -> Result<(), NegotiationError> {
        let Some(candidate) = candidate else {
            tracing::debug!("Local candidate gathering complete");
            return Ok(());
        };
        self.ensure_open()?;
        self.signals.send(&SignalMessage::Candidate(candidate))?;
        Ok(())
    }

    // ========================================================================
    // REMOTE SIDE
    // ========================================================================

    /// Verarbeitet eine Nachricht vom Relay
    pub async fn handle_signal(&self, msg: SignalMessage) -> Result<SignalOutcome, NegotiationError> {
        self.ensure_open()?;

        match msg {
            SignalMessage::Description(desc) => self.on_remote_description(desc).await,
            SignalMessage::Candidate(candidate) => self.on_remote_candidate(candidate).await,
            SignalMessage::StreamMapping(mapping) => Ok(self.on_stream_mapping(mapping)),
            SignalMessage::UsersCount(count) => Ok(self.on_room_update(RoomUpdate::UsersCount(count))),
            SignalMessage::CallStart(start) => Ok(self.on_room_update(RoomUpdate::CallStart(start))),
        }
    }

    async fn on_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<SignalOutcome, NegotiationError> {
        let is_offer = desc.is_offer();

        let ignore = {
            let mut flags = self.flags.lock();
            let stable = self.transport.signaling_state() == SignalingState::Stable;
            let collision = is_offer && (flags.making_offer || !stable);
            flags.ignore_offer = !self.role.is_polite() && collision;
            flags.ignore_offer
        };

        if ignore {
            tracing::info!("Offer collision, ignoring remote offer ({})", self.role);
            return Ok(SignalOutcome::OfferIgnored);
        }

        self.transport.set_remote_description(&desc).await?;
        self.flags.lock().ignore_offer = false;
        tracing::debug!("Applied remote {}", desc.kind);

        if !is_offer {
            return Ok(SignalOutcome::DescriptionApplied);
        }

        self.send_local_description().await?;
        Ok(SignalOutcome::Answered)
    }

    async fn on_remote_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Result<SignalOutcome, NegotiationError> {
        match self.transport.add_ice_candidate(&candidate).await {
            Ok(()) => Ok(SignalOutcome::CandidateApplied),
            Err(e) if self.flags.lock().ignore_offer => {
                tracing::debug!("Dropping candidate of ignored offer: {}", e);
                Ok(SignalOutcome::CandidateIgnored)
            }
            Err(e) => Err(NegotiationError::CandidateRejected(e.to_string())),
        }
    }

    fn on_stream_mapping(&self, mapping: StreamMapping) -> SignalOutcome {
        let placements = self.registry.lock().bind(
            &mapping.mid,
            &mapping.user_id,
            &mapping.display_name,
        );

        tracing::debug!(
            "mid {} belongs to {} ({})",
            mapping.mid,
            mapping.user_id,
            mapping.display_name
        );
        self.emit(SessionEvent::ParticipantBound {
            mid: mapping.mid,
            user_id: mapping.user_id,
            display_name: mapping.display_name,
        });
        for placement in placements {
            self.emit_placement(placement);
        }
        SignalOutcome::MappingApplied
    }

    fn on_room_update(&self, update: RoomUpdate) -> SignalOutcome {
        let mut changed = false;
        self.room_state.send_modify(|state| changed = state.apply(update));

        if changed {
            let snapshot = self.room_state.borrow().clone();
            self.emit(SessionEvent::RoomStateChanged(snapshot));
        }
        SignalOutcome::RoomStateUpdated
    }

    /// Eingehender Track, wird über die mid einem Teilnehmer zugeordnet
    pub fn on_remote_track(&self, mid: Option<&str>, track: T::Track) -> Option<TrackPlacement> {
        if self.is_closed() {
            return None;
        }
        let Some(mid) = mid else {
            tracing::warn!("Remote track without mid, dropping");
            return None;
        };

        let placement = self.registry.lock().attach(mid, track);
        self.emit_placement(placement.clone());
        Some(placement)
    }

    fn emit_placement(&self, placement: TrackPlacement) {
        match placement {
            TrackPlacement::Created { user_id } => {
                tracing::info!("New remote stream for {}", user_id);
                self.emit(SessionEvent::StreamCreated { user_id });
            }
            TrackPlacement::Appended { user_id } => {
                self.emit(SessionEvent::TrackAppended { user_id });
            }
            TrackPlacement::Pending { mid } => {
                tracing::debug!("No mapping for mid {} yet, parking track", mid);
            }
        }
    }

    // ========================================================================
    // TEARDOWN
    // ========================================================================

    /// Ab hier sind alle Handler No-Ops
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Negotiation coordinator shut down");
        self.emit(SessionEvent::Closed);
    }
}

impl<T: MediaTransport> fmt::Debug for NegotiationCoordinator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiationCoordinator")
            .field("role", &self.role)
            .field("flags", &self.flags())
            .field("signaling_state", &self.transport.signaling_state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
