//! Message Types für das Raum-Signaling-Protokoll
//!
//! Jeder WebSocket-Frame ist ein flaches JSON-Objekt. Welche Nachricht
//! gemeint ist, ergibt sich aus der (gegenseitig exklusiven) Feldgruppe:
//!
//! | Felder | Richtung | Bedeutung |
//! |---|---|---|
//! | `type`, `sdp` | beide | Offer/Answer |
//! | `candidate`, `sdpMid`, `sdpMLineIndex`, `usernameFragment` | beide | ICE Candidate |
//! | `streamMapping` | eingehend | `"<mid>:<userId>:<displayName>"` |
//! | `usersCount` | eingehend | Anzahl Teilnehmer |
//! | `callStart` | eingehend | Startzeit des Calls |
//!
//! Der Relay-Server serialisiert immer alle Felder seiner Message-Struktur,
//! leere Strings und `usersCount: 0` zählen deshalb als "nicht vorhanden".

use super::client::SignalingError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// SESSION DESCRIPTIONS
// ============================================================================

/// Typ einer Session Description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl SdpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpKind::Offer => "offer",
            SdpKind::Answer => "answer",
            SdpKind::Pranswer => "pranswer",
            SdpKind::Rollback => "rollback",
        }
    }
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SdpKind {
    type Err = SignalingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offer" => Ok(SdpKind::Offer),
            "answer" => Ok(SdpKind::Answer),
            "pranswer" => Ok(SdpKind::Pranswer),
            "rollback" => Ok(SdpKind::Rollback),
            other => Err(SignalingError::InvalidFrame(format!(
                "unknown description type '{}'",
                other
            ))),
        }
    }
}

/// Offer oder Answer mit SDP-Body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn is_offer(&self) -> bool {
        self.kind == SdpKind::Offer
    }
}

// ============================================================================
// ICE CANDIDATES
// ============================================================================

/// ICE Candidate im Browser-Format (`RTCIceCandidateInit`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

// ============================================================================
// STREAM MAPPING
// ============================================================================

/// Zuordnung einer Media-Line (mid) zu einem Teilnehmer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMapping {
    pub mid: String,
    pub user_id: String,
    pub display_name: String,
}

impl StreamMapping {
    /// Formatiert das Mapping wieder im Wire-Format
    pub fn to_wire(&self) -> String {
        format!("{}:{}:{}", self.mid, self.user_id, self.display_name)
    }
}

impl FromStr for StreamMapping {
    type Err = SignalingError;

    /// Parst `"<mid>:<userId>:<displayName>"`.
    ///
    /// Der Name darf selbst Doppelpunkte enthalten. Fehlt er, verwendet der
    /// Server die userId als Namen, das wird hier nachgebildet.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let mid = parts.next().unwrap_or_default();
        let user_id = parts.next().unwrap_or_default();
        if mid.is_empty() || user_id.is_empty() {
            return Err(SignalingError::InvalidFrame(format!(
                "malformed stream mapping '{}'",
                s
            )));
        }
        let display_name = match parts.next() {
            Some(name) if !name.is_empty() => name,
            _ => user_id,
        };

        Ok(Self {
            mid: mid.to_string(),
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
        })
    }
}

// ============================================================================
// SIGNAL MESSAGES
// ============================================================================

/// Alle Nachrichten, die über den Raum-WebSocket laufen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    /// Offer/Answer
    Description(SessionDescription),
    /// Trickle-ICE Candidate
    Candidate(IceCandidate),
    /// mid → userId → Anzeigename
    StreamMapping(StreamMapping),
    /// Anzahl Teilnehmer im Raum
    UsersCount(u32),
    /// Startzeit des Calls (Server-Format `02.01.2006 15:04:05`)
    CallStart(String),
}

/// Eingehender Frame mit allen möglichen Feldern
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    sdp: Option<String>,
    candidate: Option<String>,
    sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    sdp_mline_index: Option<u16>,
    username_fragment: Option<String>,
    stream_mapping: Option<String>,
    users_count: Option<u32>,
    call_start: Option<String>,
}

/// Ausgehender Frame, eine Variante pro Feldgruppe
#[derive(Serialize)]
#[serde(untagged)]
enum WireFrame<'a> {
    Description {
        #[serde(rename = "type")]
        kind: SdpKind,
        sdp: &'a str,
    },
    Candidate(&'a IceCandidate),
    StreamMapping {
        #[serde(rename = "streamMapping")]
        stream_mapping: String,
    },
    UsersCount {
        #[serde(rename = "usersCount")]
        users_count: u32,
    },
    CallStart {
        #[serde(rename = "callStart")]
        call_start: &'a str,
    },
}

fn present(field: Option<String>) -> Option<String> {
    field.filter(|value| !value.is_empty())
}

impl SignalMessage {
    /// Parst einen Text-Frame.
    ///
    /// Gibt `Ok(None)` zurück, wenn keine bekannte Feldgruppe belegt ist.
    pub fn from_frame(text: &str) -> Result<Option<Self>, SignalingError> {
        let raw: RawFrame = serde_json::from_str(text)
            .map_err(|e| SignalingError::InvalidFrame(e.to_string()))?;

        if let Some(sdp) = present(raw.sdp) {
            let kind = present(raw.kind)
                .ok_or_else(|| SignalingError::InvalidFrame("sdp without type".to_string()))?
                .parse()?;
            return Ok(Some(SignalMessage::Description(SessionDescription {
                kind,
                sdp,
            })));
        }

        if let Some(candidate) = present(raw.candidate) {
            return Ok(Some(SignalMessage::Candidate(IceCandidate {
                candidate,
                sdp_mid: raw.sdp_mid,
                sdp_mline_index: raw.sdp_mline_index,
                username_fragment: present(raw.username_fragment),
            })));
        }

        if let Some(mapping) = present(raw.stream_mapping) {
            return Ok(Some(SignalMessage::StreamMapping(mapping.parse()?)));
        }

        if let Some(count) = raw.users_count.filter(|count| *count > 0) {
            return Ok(Some(SignalMessage::UsersCount(count)));
        }

        if let Some(start) = present(raw.call_start) {
            return Ok(Some(SignalMessage::CallStart(start)));
        }

        Ok(None)
    }

    /// Serialisiert die Nachricht als JSON-Text-Frame
    pub fn to_frame(&self) -> Result<String, SignalingError> {
        let frame = match self {
            SignalMessage::Description(desc) => WireFrame::Description {
                kind: desc.kind,
                sdp: &desc.sdp,
            },
            SignalMessage::Candidate(candidate) => WireFrame::Candidate(candidate),
            SignalMessage::StreamMapping(mapping) => WireFrame::StreamMapping {
                stream_mapping: mapping.to_wire(),
            },
            SignalMessage::UsersCount(users_count) => WireFrame::UsersCount {
                users_count: *users_count,
            },
            SignalMessage::CallStart(call_start) => WireFrame::CallStart { call_start },
        };

        serde_json::to_string(&frame).map_err(|e| SignalingError::SendFailed(e.to_string()))
    }
}

// ============================================================================
// TESTS
// ============================================================================
