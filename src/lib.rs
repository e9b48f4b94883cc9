//! Meet Client - Raum-Videokonferenz Client
//!
//! Native Client-Bibliothek für den Meet-Service mit:
//! - WebSocket-Signaling über den Raum-Relay
//! - WebRTC Perfect Negotiation (webrtc-rs)
//! - Zuordnung der Remote-Tracks zu Teilnehmern
//! - Bearer-Token Auth mit Refresh-and-Retry

pub mod auth;
pub mod config;
pub mod identity;
pub mod media;
pub mod negotiation;
pub mod presence;
pub mod registry;
pub mod signaling;

use auth::{
    AuthApi, AuthError, AuthenticatedChannel, DisplayNameVariant, HttpBackend, ProfileApi,
    ReqwestBackend, UserProfile, REFRESH_PATH,
};
use config::ClientConfig;
use identity::{IdentityError, IdentityStore};
use media::{DeviceAcquirer, MediaAcquirer};
use negotiation::{NegotiationSession, RtcTransport, SessionError, SessionEvent};
use once_cell::sync::OnceCell;
use presence::RoomPresenceView;
use registry::ParticipantView;
use signaling::SignalingError;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

/// Standard-Filter, wenn `RUST_LOG` nicht gesetzt ist
pub const DEFAULT_LOG_FILTER: &str = "meet_client_lib=debug,webrtc=warn";

static LOGGING: OnceCell<()> = OnceCell::new();

/// Singleton für den Client der Anwendung
static CLIENT: OnceCell<Arc<MeetClient>> = OnceCell::new();

/// Initialisiert das Logging genau einmal pro Prozess
pub fn init_logging() {
    LOGGING.get_or_init(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));

        // Ein bereits gesetzter globaler Subscriber bleibt bestehen
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Meet client already initialized")]
    AlreadyInitialized,
}

impl ClientError {
    /// Refresh fehlgeschlagen, der User muss sich neu anmelden
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ClientError::Auth(AuthError::AuthExpired))
    }

    /// Kamera/Mikrofon/Bildschirm nicht verfügbar, Beitritt abgebrochen
    pub fn is_media_unavailable(&self) -> bool {
        matches!(
            self,
            ClientError::Session(SessionError::Signaling(SignalingError::MediaUnavailable(_)))
        )
    }
}

// ============================================================================
// MEET CLIENT
// ============================================================================

/// Application State: Konfiguration, Identität, API und die aktive Session
pub struct MeetClient<B: HttpBackend = ReqwestBackend> {
    config: ClientConfig,
    identity: IdentityStore,
    auth: AuthApi<B>,
    profile: ProfileApi<B>,
    acquirer: Arc<dyn MediaAcquirer>,
    session: Mutex<Option<NegotiationSession<RtcTransport>>>,
}

impl MeetClient<ReqwestBackend> {
    /// Initialisiert Logging, lädt die Identität und baut den HTTP-Client
    pub fn init(config: ClientConfig) -> Result<Self, ClientError> {
        init_logging();
        tracing::info!("Initializing meet client for {}", config.server_url);

        let identity = match &config.identity_path {
            Some(path) => IdentityStore::at_path(path)?,
            None => IdentityStore::load_or_default()?,
        };
        if identity.is_authenticated() {
            tracing::info!("Restored session for {:?}", identity.user_id());
        }

        let backend = Arc::new(ReqwestBackend::new()?);
        Self::with_parts(config, identity, backend, Arc::new(DeviceAcquirer::default()))
    }

    /// Initialisiert den prozessweiten Client
    pub fn init_global(config: ClientConfig) -> Result<Arc<Self>, ClientError> {
        if CLIENT.get().is_some() {
            return Err(ClientError::AlreadyInitialized);
        }

        let client = Arc::new(Self::init(config)?);
        CLIENT
            .set(Arc::clone(&client))
            .map_err(|_| ClientError::AlreadyInitialized)?;

        Ok(client)
    }

    /// Gibt den prozessweiten Client zurück
    pub fn get() -> Option<Arc<Self>> {
        CLIENT.get().cloned()
    }
}

impl<B: HttpBackend> MeetClient<B> {
    pub fn with_parts(
        config: ClientConfig,
        identity: IdentityStore,
        backend: Arc<B>,
        acquirer: Arc<dyn MediaAcquirer>,
    ) -> Result<Self, ClientError> {
        let channel = AuthenticatedChannel::new(
            Arc::clone(&backend),
            identity.clone(),
            auth::endpoint(&config.server_url, REFRESH_PATH)?,
        );

        Ok(Self {
            auth: AuthApi::new(backend, identity.clone(), config.server_url.clone()),
            profile: ProfileApi::new(channel, config.server_url.clone()),
            config,
            identity,
            acquirer,
            session: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn identity(&self) -> &IdentityStore {
        &self.identity
    }

    // ========================================================================
    // ROOM
    // ========================================================================

    /// Tritt einem Raum bei, eine vorherige Session wird vorher beendet
    pub async fn join_room(&self, room_id: &str, display_name: &str) -> Result<Uuid, ClientError> {
        let mut current = self.session.lock().await;
        if let Some(previous) = current.take() {
            tracing::info!("Leaving room {} before joining {}", previous.room_id(), room_id);
            previous.leave().await;
        }

        let role = self
            .config
            .role_policy
            .resolve(self.identity.user_id().as_deref());

        let session = NegotiationSession::join(
            &self.config,
            room_id,
            display_name,
            self.acquirer.as_ref(),
            role,
        )
        .await?;

        self.identity.set_display_name(Some(display_name.to_string()));
        let id = session.id();
        *current = Some(session);
        Ok(id)
    }

    /// Verlässt den aktuellen Raum, `false` wenn keiner aktiv war
    ///
    /// Eine vom Relay beendete Session wird trotzdem aufgeräumt.
    pub async fn leave_room(&self) -> bool {
        match self.session.lock().await.take() {
            Some(session) => {
                let was_active = session.is_active();
                session.leave().await;
                was_active
            }
            None => false,
        }
    }

    pub async fn current_room(&self) -> Option<String> {
        self.with_active_session(|s| s.room_id().to_string()).await
    }

    pub async fn presence(&self) -> Option<RoomPresenceView> {
        self.with_active_session(|s| s.presence()).await
    }

    pub async fn subscribe(&self) -> Option<broadcast::Receiver<SessionEvent>> {
        self.with_active_session(|s| s.subscribe()).await
    }

    pub async fn participants(&self) -> Vec<ParticipantView> {
        self.with_active_session(|s| s.participants())
            .await
            .unwrap_or_default()
    }

    async fn with_active_session<R>(
        &self,
        f: impl FnOnce(&NegotiationSession<RtcTransport>) -> R,
    ) -> Option<R> {
        self.session
            .lock()
            .await
            .as_ref()
            .filter(|session| session.is_active())
            .map(f)
    }

    // ========================================================================
    // AUTH & PROFILE
    // ========================================================================

    pub async fn login(&self, identifier: &str, password: &str) -> Result<(), ClientError> {
        Ok(self.auth.login(identifier, password).await?)
    }

    pub async fn signup(&self, identifier: &str, password: &str) -> Result<String, ClientError> {
        Ok(self.auth.signup(identifier, password).await?)
    }

    pub async fn logout(&self) -> Result<(), ClientError> {
        Ok(self.auth.logout().await?)
    }

    pub async fn profile(&self) -> Result<UserProfile, ClientError> {
        Ok(self.profile.get().await?)
    }

    pub async fn update_profile(&self, changes: &UserProfile) -> Result<UserProfile, ClientError> {
        Ok(self.profile.update(changes).await?)
    }

    /// Namensvorschläge für den Beitritt
    ///
    /// Anonym oder mit abgelaufener Sitzung bleibt nur die manuelle Eingabe.
    pub async fn display_name_variants(&self) -> Result<Vec<DisplayNameVariant>, ClientError> {
        if !self.identity.is_authenticated() {
            return Ok(auth::display_name_variants(None));
        }

        match self.profile.get().await {
            Ok(profile) => Ok(auth::display_name_variants(Some(&profile))),
            Err(AuthError::AuthExpired) => {
                tracing::info!("Session expired, offering manual name only");
                Ok(auth::display_name_variants(None))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl<B: HttpBackend> std::fmt::Debug for MeetClient<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeetClient")
            .field("server_url", &self.config.server_url.as_str())
            .field("authenticated", &self.identity.is_authenticated())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
