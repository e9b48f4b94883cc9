//! WebSocket Client für den Raum-Relay
//!
//! Eine Verbindung pro Raumbeitritt:
//! - URL `ws(s)://<host>/api/room/ws?roomId=<id>&shownName=<name>`
//! - Lokale Medien werden vor "ready" beschafft
//! - Eingehende Frames werden in Empfangsreihenfolge weitergereicht
//! - Ausgehende Frames laufen über einen Writer-Task

use super::messages::SignalMessage;
use crate::media::{LocalMedia, MediaAcquirer, MediaError, MediaSource};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Pfad des Raum-WebSockets auf dem Relay
pub const ROOM_WS_PATH: &str = "/api/room/ws";

const INBOUND_BUFFER: usize = 100;
const OUTBOUND_BUFFER: usize = 100;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid relay URL: {0}")]
    InvalidUrl(String),

    #[error("Not connected to room relay")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Invalid signaling frame: {0}")]
    InvalidFrame(String),

    #[error("Local media unavailable: {0}")]
    MediaUnavailable(#[from] MediaError),

    #[error("Room relay closed the connection")]
    TransportClosed,
}

// ============================================================================
// SOCKET EVENTS
// ============================================================================

/// Events vom Raum-Socket (onMessage / onClose)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Nachricht vom Relay
    Message(SignalMessage),

    /// Verbindung getrennt (Server, Netzwerk oder Fehler)
    Closed,
}

#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(String),
    Close,
}

// ============================================================================
// SOCKET STATE
// ============================================================================

#[derive(Debug, Clone, Default)]
struct SocketState {
    is_connected: bool,
    frames_sent: u64,
    frames_received: u64,
}

// ============================================================================
// SIGNAL SENDER
// ============================================================================

/// Klonbarer Sender für ausgehende Frames
///
/// Nach dem Schließen des Sockets schlägt jedes `send` mit
/// `NotConnected` fehl, es werden keine Frames mehr geschrieben.
#[derive(Clone)]
pub struct SignalSender {
    tx: mpsc::Sender<Outbound>,
    state: Arc<RwLock<SocketState>>,
}

impl SignalSender {
    /// Serialisiert und sendet eine Nachricht (non-blocking)
    pub fn send(&self, msg: &SignalMessage) -> Result<(), SignalingError> {
        if !self.state.read().is_connected {
            return Err(SignalingError::NotConnected);
        }

        let frame = msg.to_frame()?;
        self.tx
            .try_send(Outbound::Frame(frame))
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;
        self.state.write().frames_sent += 1;
        Ok(())
    }

    /// Prüft ob verbunden
    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected
    }

    /// Trennt die Verbindung und beendet den Writer-Task
    ///
    /// Für den Fall, dass der Relay die Verbindung beendet hat und niemand
    /// `SignalingSocket::close` aufruft.
    pub fn close(&self) {
        self.state.write().is_connected = false;
        // Writer bereits beendet: nichts mehr zu tun
        let _ = self.tx.try_send(Outbound::Close);
    }

    /// Sender ohne echte Verbindung, die Frames landen im zurückgegebenen Receiver
    #[cfg(test)]
    pub(crate) fn test_pair() -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let state = SocketState {
            is_connected: true,
            ..Default::default()
        };
        (
            Self {
                tx,
                state: Arc::new(RwLock::new(state)),
            },
            rx,
        )
    }
}

// ============================================================================
// SIGNALING SOCKET
// ============================================================================

/// Duplex-Verbindung zum Raum-Relay
pub struct SignalingSocket {
    room_id: String,
    sender: SignalSender,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl SignalingSocket {
    /// Baut die WebSocket-URL für einen Raum aus der HTTP-Basis-URL
    pub fn room_url(server_url: &str, room_id: &str, shown_name: &str) -> Result<Url, SignalingError> {
        let mut url =
            Url::parse(server_url).map_err(|e| SignalingError::InvalidUrl(e.to_string()))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(SignalingError::InvalidUrl(format!(
                    "unsupported scheme '{}'",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| SignalingError::InvalidUrl(format!("cannot switch to {}", scheme)))?;

        url.set_path(ROOM_WS_PATH);
        url.query_pairs_mut()
            .clear()
            .append_pair("roomId", room_id)
            .append_pair("shownName", shown_name);

        Ok(url)
    }

    /// Verbindet mit dem Raum und beschafft danach die lokalen Medien
    ///
    /// Schlägt die Beschaffung fehl, wird der Socket wieder geschlossen und
    /// `MediaUnavailable` zurückgegeben. Der Negotiation-Layer sieht davon nichts.
    pub async fn open(
        server_url: &str,
        room_id: &str,
        display_name: &str,
        acquirer: &dyn MediaAcquirer,
        source: MediaSource,
    ) -> Result<(Self, mpsc::Receiver<SocketEvent>, LocalMedia), SignalingError> {
        let (mut socket, events) = Self::connect(server_url, room_id, display_name).await?;

        match acquirer.acquire(source) {
            Ok(media) => {
                tracing::info!(
                    "Room socket ready for {} ({} local track(s) from {})",
                    room_id,
                    media.tracks().len(),
                    source
                );
                Ok((socket, events, media))
            }
            Err(e) => {
                tracing::warn!("Local media acquisition failed, aborting join: {}", e);
                socket.close().await;
                Err(SignalingError::MediaUnavailable(e))
            }
        }
    }

    /// Baut nur die WebSocket-Verbindung auf und startet Reader/Writer-Tasks
    pub async fn connect(
        server_url: &str,
        room_id: &str,
        display_name: &str,
    ) -> Result<(Self, mpsc::Receiver<SocketEvent>), SignalingError> {
        let url = Self::room_url(server_url, room_id, display_name)?;

        tracing::info!("Connecting to room relay: {}", url);

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let state = Arc::new(RwLock::new(SocketState {
            is_connected: true,
            ..Default::default()
        }));
        let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel::<SocketEvent>(INBOUND_BUFFER);

        // Read-Task starten
        let state_clone = Arc::clone(&state);
        let reader = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        state_clone.write().frames_received += 1;
                        match SignalMessage::from_frame(&text) {
                            Ok(Some(msg)) => {
                                if event_tx.send(SocketEvent::Message(msg)).await.is_err() {
                                    break;
                                }
                            }
                            Ok(None) => {
                                tracing::debug!("Ignoring frame without known fields: {}", text)
                            }
                            Err(e) => tracing::warn!("Dropping signaling frame: {}", e),
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("Room socket closed by relay");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Room socket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            // Disconnect-Status setzen
            state_clone.write().is_connected = false;
            let _ = event_tx.send(SocketEvent::Closed).await;
        });

        // Write-Task starten
        let writer = tokio::spawn(async move {
            while let Some(outbound) = rx.recv().await {
                match outbound {
                    Outbound::Frame(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            tracing::error!("Failed to send room socket frame: {}", e);
                            break;
                        }
                    }
                    Outbound::Close => break,
                }
            }
            let _ = write.close().await;
        });

        Ok((
            Self {
                room_id: room_id.to_string(),
                sender: SignalSender { tx, state },
                reader: Some(reader),
                writer: Some(writer),
            },
            event_rx,
        ))
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Gibt einen klonbaren Sender zurück
    pub fn sender(&self) -> SignalSender {
        self.sender.clone()
    }

    /// Sendet eine Nachricht an den Relay
    pub fn send(&self, msg: &SignalMessage) -> Result<(), SignalingError> {
        self.sender.send(msg)
    }

    /// Prüft ob verbunden
    pub fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }

    #[cfg(test)]
    pub(crate) fn writer_finished(&self) -> bool {
        self.writer.as_ref().map_or(true, |writer| writer.is_finished())
    }

    /// Schließt die Verbindung und beendet beide Tasks
    pub async fn close(&mut self) {
        let stats = {
            let mut state = self.sender.state.write();
            state.is_connected = false;
            state.clone()
        };

        let _ = self.sender.tx.send(Outbound::Close).await;
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        tracing::info!(
            "Room socket for {} closed ({} sent, {} received)",
            self.room_id,
            stats.frames_sent,
            stats.frames_received
        );
    }
}

impl Drop for SignalingSocket {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

impl std::fmt::Debug for SignalingSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingSocket")
            .field("room_id", &self.room_id)
            .field("state", &*self.sender.state.read())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::signaling::{IceCandidate, StreamMapping};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{accept_async, WebSocketStream};

    struct NoDevices;

    impl MediaAcquirer for NoDevices {
        fn acquire(&self, _source: MediaSource) -> Result<LocalMedia, MediaError> {
            Err(MediaError::Unavailable("permission denied".to_string()))
        }
    }

    struct ReceiveOnly;

    impl MediaAcquirer for ReceiveOnly {
        fn acquire(&self, source: MediaSource) -> Result<LocalMedia, MediaError> {
            Ok(LocalMedia::empty(source))
        }
    }

    /// Startet einen Relay mit genau einer Verbindung
    pub(crate) async fn relay() -> (String, tokio::task::JoinHandle<WebSocketStream<TcpStream>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            accept_async(stream).await.unwrap()
        });
        (format!("http://{}", addr), handle)
    }

    #[test]
    fn test_room_url() {
        let url = SignalingSocket::room_url("http://localhost:8080", "r1", "Alice B").unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.path(), ROOM_WS_PATH);

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("roomId".to_string(), "r1".to_string()),
                ("shownName".to_string(), "Alice B".to_string()),
            ]
        );

        let secure = SignalingSocket::room_url("https://meet.example.com/app", "r2", "x").unwrap();
        assert_eq!(secure.scheme(), "wss");
        assert_eq!(secure.host_str(), Some("meet.example.com"));

        assert!(SignalingSocket::room_url("ftp://example.com", "r", "x").is_err());
        assert!(SignalingSocket::room_url("not a url", "r", "x").is_err());
    }

    #[tokio::test]
    async fn test_inbound_frames_keep_order() {
        let (url, server) = relay().await;
        let (_socket, mut events) = SignalingSocket::connect(&url, "r1", "Alice").await.unwrap();

        let mut ws = server.await.unwrap();
        ws.send(Message::Text(r#"{"streamMapping":"0:u42:Alice"}"#.to_string()))
            .await
            .unwrap();
        ws.send(Message::Text("garbage".to_string())).await.unwrap();
        ws.send(Message::Text(r#"{"usersCount":2}"#.to_string()))
            .await
            .unwrap();
        ws.close(None).await.unwrap();

        assert_eq!(
            events.recv().await,
            Some(SocketEvent::Message(SignalMessage::StreamMapping(StreamMapping {
                mid: "0".to_string(),
                user_id: "u42".to_string(),
                display_name: "Alice".to_string(),
            })))
        );
        assert_eq!(
            events.recv().await,
            Some(SocketEvent::Message(SignalMessage::UsersCount(2)))
        );
        assert_eq!(events.recv().await, Some(SocketEvent::Closed));
    }

    #[tokio::test]
    async fn test_outbound_frames_reach_relay() {
        let (url, server) = relay().await;
        let (socket, _events) = SignalingSocket::connect(&url, "r1", "Alice").await.unwrap();
        let mut ws = server.await.unwrap();

        let candidate = SignalMessage::Candidate(IceCandidate {
            candidate: "candidate:1".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        });
        socket.send(&candidate).unwrap();

        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                assert_eq!(SignalMessage::from_frame(&text).unwrap(), Some(candidate));
            }
            other => panic!("unexpected relay frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_without_media_closes_socket() {
        let (url, server) = relay().await;
        let result = SignalingSocket::open(&url, "r1", "Alice", &NoDevices, MediaSource::Camera).await;

        assert!(matches!(result, Err(SignalingError::MediaUnavailable(_))));

        let mut ws = server.await.unwrap();
        match ws.next().await {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {}
            other => panic!("relay should see the socket close, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (url, server) = relay().await;
        let (mut socket, _events, media) =
            SignalingSocket::open(&url, "r1", "Alice", &ReceiveOnly, MediaSource::Screen)
                .await
                .unwrap();
        let _ws = server.await.unwrap();

        assert!(media.is_empty());
        assert!(socket.is_connected());

        let sender = socket.sender();
        socket.close().await;

        assert!(!socket.is_connected());
        assert_eq!(
            sender.send(&SignalMessage::UsersCount(1)),
            Err(SignalingError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_sender_close_stops_writer() {
        let (url, server) = relay().await;
        let (socket, _events) = SignalingSocket::connect(&url, "r1", "Alice").await.unwrap();
        let mut ws = server.await.unwrap();

        let sender = socket.sender();
        sender.close();

        assert!(!socket.is_connected());
        while !socket.writer_finished() {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            sender.send(&SignalMessage::UsersCount(1)),
            Err(SignalingError::NotConnected)
        );
        match ws.next().await {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {}
            other => panic!("relay should see the socket close, got {:?}", other),
        }
    }
}
