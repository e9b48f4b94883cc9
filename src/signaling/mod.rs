//! Signaling Module - WebSocket Client für den Raum-Relay
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Relay-Server:
//! - WebSocket-Verbindung pro Raumbeitritt aufbauen und schließen
//! - Nachrichten als JSON-Text-Frames kodieren und dekodieren
//! - Eingehende Nachrichten geordnet weiterleiten
//!

mod client;
mod messages;

pub use client::{SignalSender, SignalingError, SignalingSocket, SocketEvent, ROOM_WS_PATH};
pub use messages::*;

#[cfg(test)]
pub(crate) use client::Outbound;
#[cfg(test)]
pub(crate) use client::tests::relay as test_relay;
