//! Client-Konfiguration
//!
//! Wird aus Umgebungsvariablen gelesen:
//! - `MEET_SERVER_URL` (Standard `http://localhost:8080`)
//! - `MEET_MEDIA_SOURCE` (`camera` | `screen`)
//! - `MEET_SIGNALING_ROLE` (`polite` | `impolite`)
//! - `MEET_REMOTE_PEER_ID` (Rolle aus den Identitäten ableiten)
//! - `MEET_TURN_URL`, `MEET_TURN_USERNAME`, `MEET_TURN_CREDENTIAL`
//! - `MEET_IDENTITY_PATH`

use crate::media::MediaSource;
use crate::negotiation::{RolePolicy, SignalingRole};
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use url::Url;
use webrtc::ice_transport::ice_server::RTCIceServer;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

pub const ENV_SERVER_URL: &str = "MEET_SERVER_URL";
pub const ENV_MEDIA_SOURCE: &str = "MEET_MEDIA_SOURCE";
pub const ENV_SIGNALING_ROLE: &str = "MEET_SIGNALING_ROLE";
pub const ENV_REMOTE_PEER_ID: &str = "MEET_REMOTE_PEER_ID";
pub const ENV_TURN_URL: &str = "MEET_TURN_URL";
pub const ENV_TURN_USERNAME: &str = "MEET_TURN_USERNAME";
pub const ENV_TURN_CREDENTIAL: &str = "MEET_TURN_CREDENTIAL";
pub const ENV_IDENTITY_PATH: &str = "MEET_IDENTITY_PATH";

// ============================================================================
// ICE SERVER CONFIGURATION
// ============================================================================

/// Standard STUN/TURN Server Konfiguration
pub fn default_ice_servers() -> Vec<RTCIceServer> {
    vec![
        // Google STUN Server
        RTCIceServer {
            urls: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            ..Default::default()
        },
        // Öffentlicher TURN Relay für restriktive NATs
        RTCIceServer {
            urls: vec!["turn:openrelay.metered.ca:80".to_string()],
            username: "openrelayproject".to_string(),
            credential: "openrelayproject".to_string(),
            ..Default::default()
        },
    ]
}

// ============================================================================
// CLIENT CONFIG
// ============================================================================

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP-Basis-URL des Servers (REST + Raum-WebSocket)
    pub server_url: Url,
    pub media_source: MediaSource,
    pub role_policy: RolePolicy,
    pub ice_servers: Vec<RTCIceServer>,
    /// `None` = Standardpfad im App-Datenverzeichnis
    pub identity_path: Option<PathBuf>,
}

impl ClientConfig {
    pub fn new(server_url: Url) -> Self {
        Self {
            server_url,
            media_source: MediaSource::default(),
            role_policy: RolePolicy::default(),
            ice_servers: default_ice_servers(),
            identity_path: None,
        }
    }

    /// Liest die Konfiguration aus der Prozessumgebung
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Liest die Konfiguration über eine beliebige Key-Value-Quelle
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let raw_url = get(ENV_SERVER_URL).unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        let server_url = Url::parse(raw_url.trim())
            .with_context(|| format!("{} is not a valid URL: {}", ENV_SERVER_URL, raw_url))?;
        if !matches!(server_url.scheme(), "http" | "https") {
            bail!("{} must use http or https, got {}", ENV_SERVER_URL, server_url.scheme());
        }

        let mut config = Self::new(server_url);

        if let Some(source) = get(ENV_MEDIA_SOURCE) {
            config.media_source = source
                .parse()
                .with_context(|| format!("invalid {}", ENV_MEDIA_SOURCE))?;
        }

        config.role_policy = match (get(ENV_SIGNALING_ROLE), get(ENV_REMOTE_PEER_ID)) {
            (Some(role), _) => RolePolicy::Fixed(
                role.parse::<SignalingRole>()
                    .with_context(|| format!("invalid {}", ENV_SIGNALING_ROLE))?,
            ),
            (None, Some(remote_id)) => RolePolicy::Derived { remote_id },
            (None, None) => RolePolicy::default(),
        };

        if let Some(url) = get(ENV_TURN_URL) {
            let username = get(ENV_TURN_USERNAME)
                .with_context(|| format!("{} requires {}", ENV_TURN_URL, ENV_TURN_USERNAME))?;
            let credential = get(ENV_TURN_CREDENTIAL)
                .with_context(|| format!("{} requires {}", ENV_TURN_URL, ENV_TURN_CREDENTIAL))?;
            config.add_turn_server(url, username, credential);
        }

        config.identity_path = get(ENV_IDENTITY_PATH).map(PathBuf::from);

        Ok(config)
    }

    /// Zusätzlicher TURN Server mit Credentials
    pub fn add_turn_server(&mut self, url: String, username: String, credential: String) {
        self.ice_servers.push(RTCIceServer {
            urls: vec![url],
            username,
            credential,
            ..Default::default()
        });
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ClientConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.server_url.as_str(), "http://localhost:8080/");
        assert_eq!(config.media_source, MediaSource::Camera);
        assert_eq!(config.role_policy, RolePolicy::Fixed(SignalingRole::Polite));
        assert_eq!(config.ice_servers.len(), 2);
        assert!(config.identity_path.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            (ENV_SERVER_URL, "https://meet.example.com"),
            (ENV_MEDIA_SOURCE, "screen"),
            (ENV_REMOTE_PEER_ID, "u-remote"),
            (ENV_TURN_URL, "turn:turn.example.com:3478"),
            (ENV_TURN_USERNAME, "user"),
            (ENV_TURN_CREDENTIAL, "pass"),
            (ENV_IDENTITY_PATH, "/tmp/identity.json"),
        ])
        .unwrap();

        assert_eq!(config.server_url.scheme(), "https");
        assert_eq!(config.media_source, MediaSource::Screen);
        assert_eq!(
            config.role_policy,
            RolePolicy::Derived {
                remote_id: "u-remote".to_string()
            }
        );
        assert_eq!(config.ice_servers.len(), 3);
        assert_eq!(config.ice_servers[2].username, "user");
        assert_eq!(config.identity_path, Some(PathBuf::from("/tmp/identity.json")));
    }

    #[test]
    fn test_explicit_role_wins_over_derivation() {
        let config = config_from(&[
            (ENV_SIGNALING_ROLE, "impolite"),
            (ENV_REMOTE_PEER_ID, "u-remote"),
        ])
        .unwrap();
        assert_eq!(config.role_policy, RolePolicy::Fixed(SignalingRole::Impolite));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(config_from(&[(ENV_SERVER_URL, "ftp://example.com")]).is_err());
        assert!(config_from(&[(ENV_SERVER_URL, "::")]).is_err());
        assert!(config_from(&[(ENV_MEDIA_SOURCE, "webcam")]).is_err());
        assert!(config_from(&[(ENV_SIGNALING_ROLE, "rude")]).is_err());
        assert!(config_from(&[(ENV_TURN_URL, "turn:x")]).is_err());
    }
}
