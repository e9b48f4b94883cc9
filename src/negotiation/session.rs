//! Negotiation Session
//!
//! Eine Session pro Raumbeitritt. Besitzt Socket, Transport und Coordinator
//! und treibt zwei Tasks:
//! - Signal-Driver: Socket-Events in Ankunftsreihenfolge
//! - Transport-Driver: negotiation-needed, lokale Candidates, Remote-Tracks
//!
//! Beide laufen verzahnt an ihren `.await`-Punkten, so wie Event Handler
//! im Browser.

use super::coordinator::{NegotiationCoordinator, NegotiationError, SessionEvent, SignalingRole};
use super::transport::{MediaTransport, RtcTransport, TransportError, TransportEvent};
use crate::config::ClientConfig;
use crate::media::{LocalMedia, MediaAcquirer};
use crate::presence::RoomPresenceView;
use crate::registry::ParticipantView;
use crate::signaling::{SignalSender, SignalingError, SignalingSocket, SocketEvent};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),
}

// ============================================================================
// NEGOTIATION SESSION
// ============================================================================

pub struct NegotiationSession<T: MediaTransport> {
    id: Uuid,
    room_id: String,
    coordinator: Arc<NegotiationCoordinator<T>>,
    socket: SignalingSocket,
    local_media: LocalMedia,
    drivers: Vec<JoinHandle<()>>,
}

impl NegotiationSession<RtcTransport> {
    /// Tritt einem Raum bei: Socket + lokale Medien, Peer Connection, Drivers
    pub async fn join(
        config: &ClientConfig,
        room_id: &str,
        display_name: &str,
        acquirer: &dyn MediaAcquirer,
        role: SignalingRole,
    ) -> Result<Self, SessionError> {
        let (mut socket, inbound, local_media) = SignalingSocket::open(
            config.server_url.as_str(),
            room_id,
            display_name,
            acquirer,
            config.media_source,
        )
        .await?;

        let (transport, events) = match RtcTransport::new(config.ice_servers.clone()).await {
            Ok(created) => created,
            Err(e) => {
                socket.close().await;
                return Err(e.into());
            }
        };

        Self::start(socket, inbound, Arc::new(transport), events, role, local_media).await
    }
}

impl<T: MediaTransport> NegotiationSession<T> {
    /// Verdrahtet Socket und Transport mit einem neuen Coordinator
    ///
    /// Die lokalen Tracks werden vor dem Start der Drivers hinzugefügt, das
    /// daraus folgende negotiation-needed wartet im Event-Kanal.
    pub async fn start(
        mut socket: SignalingSocket,
        inbound: mpsc::Receiver<SocketEvent>,
        transport: Arc<T>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent<T::Track>>,
        role: SignalingRole,
        local_media: LocalMedia,
    ) -> Result<Self, SessionError> {
        if let Err(e) = transport.add_local_media(&local_media).await {
            tracing::error!("Failed to add local media: {}", e);
            socket.close().await;
            if let Err(close_err) = transport.close().await {
                tracing::warn!("Failed to close transport: {}", close_err);
            }
            return Err(e.into());
        }

        let coordinator = Arc::new(NegotiationCoordinator::new(
            Arc::clone(&transport),
            socket.sender(),
            role,
        ));

        let drivers = vec![
            tokio::spawn(drive_signals(Arc::clone(&coordinator), inbound, socket.sender())),
            tokio::spawn(drive_transport(Arc::clone(&coordinator), transport_events)),
        ];

        let id = Uuid::new_v4();
        let room_id = socket.room_id().to_string();
        tracing::info!("Session {} joined room {} as {}", id, room_id, role);

        Ok(Self {
            id,
            room_id,
            coordinator,
            socket,
            local_media,
            drivers,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn role(&self) -> SignalingRole {
        self.coordinator.role()
    }

    pub fn local_media(&self) -> &LocalMedia {
        &self.local_media
    }

    pub fn coordinator(&self) -> &Arc<NegotiationCoordinator<T>> {
        &self.coordinator
    }

    /// `false` nach `leave()` oder wenn der Relay die Verbindung beendet hat
    pub fn is_active(&self) -> bool {
        !self.coordinator.is_closed()
    }

    pub fn presence(&self) -> RoomPresenceView {
        self.coordinator.presence()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.coordinator.subscribe()
    }

    pub fn participants(&self) -> Vec<ParticipantView> {
        self.coordinator.participants()
    }

    /// Verlässt den Raum
    ///
    /// Reihenfolge: Coordinator stilllegen, Handler lösen, Drivers stoppen,
    /// Socket schließen, Transport schließen.
    pub async fn leave(mut self) {
        self.coordinator.shutdown();
        self.coordinator.transport().detach_handlers();

        for driver in self.drivers.drain(..) {
            driver.abort();
        }

        self.socket.close().await;

        if let Err(e) = self.coordinator.transport().close().await {
            tracing::warn!("Failed to close transport: {}", e);
        }

        tracing::info!("Session {} left room {}", self.id, self.room_id);
    }
}

impl<T: MediaTransport> Drop for NegotiationSession<T> {
    fn drop(&mut self) {
        for driver in self.drivers.drain(..) {
            driver.abort();
        }
    }
}

impl<T: MediaTransport> std::fmt::Debug for NegotiationSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiationSession")
            .field("id", &self.id)
            .field("room_id", &self.room_id)
            .field("role", &self.role())
            .field("is_active", &self.is_active())
            .finish()
    }
}

// ============================================================================
// DRIVERS
// ============================================================================

async fn drive_signals<T: MediaTransport>(
    coordinator: Arc<NegotiationCoordinator<T>>,
    mut inbound: mpsc::Receiver<SocketEvent>,
    signals: SignalSender,
) {
    while let Some(event) = inbound.recv().await {
        match event {
            SocketEvent::Message(msg) => match coordinator.handle_signal(msg).await {
                Ok(outcome) => tracing::debug!("Signal handled: {:?}", outcome),
                Err(NegotiationError::Closed) => break,
                Err(e) => tracing::warn!("Signal handling failed: {}", e),
            },
            SocketEvent::Closed => {
                tracing::warn!("Session ended: {}", SignalingError::TransportClosed);
                coordinator.shutdown();
                signals.close();
                coordinator.transport().detach_handlers();
                if let Err(e) = coordinator.transport().close().await {
                    tracing::warn!("Failed to close transport: {}", e);
                }
                break;
            }
        }
    }
}

async fn drive_transport<T: MediaTransport>(
    coordinator: Arc<NegotiationCoordinator<T>>,
    mut events: mpsc::UnboundedReceiver<TransportEvent<T::Track>>,
) {
    while let Some(event) = events.recv().await {
        if coordinator.is_closed() {
            break;
        }
        match event {
            TransportEvent::NegotiationNeeded => {
                // Fehler loggt der Coordinator selbst
                let _ = coordinator.on_negotiation_needed().await;
            }
            TransportEvent::LocalCandidate(candidate) => {
                if let Err(e) = coordinator.on_local_candidate(candidate) {
                    tracing::warn!("Failed to send local candidate: {}", e);
                }
            }
            TransportEvent::RemoteTrack { mid, track } => {
                coordinator.on_remote_track(mid.as_deref(), track);
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
