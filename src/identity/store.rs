//! Identity Store
//!
//! Hält die Identität der Sitzung (userId, Access Token, Anzeigename) und
//! speichert Token + Identifier dauerhaft im App-Datenverzeichnis.
//!
//! ## Verwendung
//! ```rust,no_run
//! use meet_client_lib::identity::IdentityStore;
//!
//! let store = IdentityStore::load_or_default()?;
//! if let Some(token) = store.access_token() {
//!     println!("restored session with token of {} bytes", token.len());
//! }
//! # Ok::<(), meet_client_lib::identity::IdentityError>(())
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL, Engine};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Failed to access identity file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid identity file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not determine app data directory")]
    NoDataDirectory,
}

// ============================================================================
// IDENTITY
// ============================================================================

/// Identität der aktuellen Sitzung
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// `sub`-Claim aus dem Access Token
    pub user_id: Option<String>,
    pub access_token: Option<String>,
    /// E-Mail oder Telefonnummer des Logins
    pub identifier: Option<String>,
    pub display_name: Option<String>,
}

impl Identity {
    pub fn is_anonymous(&self) -> bool {
        self.access_token.is_none()
    }
}

/// Dauerhaft gespeicherter Teil der Identität
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedIdentity {
    access_token: Option<String>,
    identifier: Option<String>,
}

#[derive(Deserialize)]
struct TokenClaims {
    sub: Option<String>,
}

/// Liest den `sub`-Claim aus einem JWT
///
/// Die Signatur wird nicht geprüft, der Wert dient nur der Anzeige und der
/// Rollenableitung.
pub fn subject_from_token(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = BASE64_URL.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice::<TokenClaims>(&bytes).ok()?.sub
}

// ============================================================================
// IDENTITY STORE
// ============================================================================

/// Geteilter, prozessweiter Identity Store
#[derive(Clone)]
pub struct IdentityStore {
    identity: Arc<RwLock<Identity>>,
    path: Option<PathBuf>,
}

impl IdentityStore {
    /// Lädt die gespeicherte Identität oder startet anonym
    ///
    /// Die Datei liegt im App-Datenverzeichnis:
    /// - Windows: `%APPDATA%/meet/meet-client/data/identity.json`
    /// - macOS: `~/Library/Application Support/com.meet.meet-client/identity.json`
    /// - Linux: `~/.local/share/meet-client/identity.json`
    pub fn load_or_default() -> Result<Self, IdentityError> {
        Self::at_path(Self::default_path()?)
    }

    /// Store mit expliziter Datei
    pub fn at_path(path: impl Into<PathBuf>) -> Result<Self, IdentityError> {
        let path = path.into();
        let persisted = if path.exists() {
            tracing::info!("Loading identity from {:?}", path);
            let content = fs::read_to_string(&path)?;
            serde_json::from_str::<PersistedIdentity>(&content)?
        } else {
            PersistedIdentity::default()
        };

        let identity = Identity {
            user_id: persisted.access_token.as_deref().and_then(subject_from_token),
            access_token: persisted.access_token,
            identifier: persisted.identifier,
            display_name: None,
        };

        Ok(Self {
            identity: Arc::new(RwLock::new(identity)),
            path: Some(path),
        })
    }

    /// Store ohne Persistenz
    pub fn in_memory() -> Self {
        Self {
            identity: Arc::new(RwLock::new(Identity::default())),
            path: None,
        }
    }

    fn default_path() -> Result<PathBuf, IdentityError> {
        let proj_dirs = directories::ProjectDirs::from("com", "meet", "meet-client")
            .ok_or(IdentityError::NoDataDirectory)?;

        Ok(proj_dirs.data_dir().join("identity.json"))
    }

    /// Kopie der aktuellen Identität
    pub fn snapshot(&self) -> Identity {
        self.identity.read().clone()
    }

    /// Aktueller Token-Wert für den Authorization-Header
    pub fn access_token(&self) -> Option<String> {
        self.identity.read().access_token.clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.identity.read().user_id.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        !self.identity.read().is_anonymous()
    }

    /// Nach erfolgreichem Login
    pub fn sign_in(&self, access_token: &str, identifier: &str) -> Result<(), IdentityError> {
        {
            let mut identity = self.identity.write();
            identity.user_id = subject_from_token(access_token);
            identity.access_token = Some(access_token.to_string());
            identity.identifier = Some(identifier.to_string());
        }
        self.persist()
    }

    /// Tauscht den Token nach einem Refresh aus
    pub fn replace_token(&self, access_token: &str) -> Result<(), IdentityError> {
        {
            let mut identity = self.identity.write();
            identity.access_token = Some(access_token.to_string());
            if let Some(user_id) = subject_from_token(access_token) {
                identity.user_id = Some(user_id);
            }
        }
        self.persist()
    }

    /// Refresh fehlgeschlagen oder Logout: Token verwerfen, anonym weiter
    ///
    /// Der Identifier bleibt erhalten (Login-Formular kann ihn vorbelegen).
    pub fn downgrade_to_anonymous(&self) -> Result<(), IdentityError> {
        {
            let mut identity = self.identity.write();
            identity.access_token = None;
            identity.user_id = None;
        }
        self.persist()
    }

    pub fn set_display_name(&self, display_name: Option<String>) {
        self.identity.write().display_name = display_name;
    }

    fn persist(&self) -> Result<(), IdentityError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let persisted = {
            let identity = self.identity.read();
            PersistedIdentity {
                access_token: identity.access_token.clone(),
                identifier: identity.identifier.clone(),
            }
        };
        write_private(path, &serde_json::to_string_pretty(&persisted)?)
    }
}

impl std::fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let identity = self.identity.read();
        f.debug_struct("IdentityStore")
            .field("user_id", &identity.user_id)
            .field("authenticated", &!identity.is_anonymous())
            .field("path", &self.path)
            .finish()
    }
}

/// Schreibt eine Datei, die nur der Owner lesen darf
fn write_private(path: &Path, content: &str) -> Result<(), IdentityError> {
    // Parent-Verzeichnis erstellen falls nicht vorhanden
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
