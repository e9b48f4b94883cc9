//! Auth- und Profil-Endpoints
//!
//! Login/Signup/Logout laufen direkt über das Backend (ohne Bearer Token),
//! Profil-Requests über den `AuthenticatedChannel`.

use super::channel::{ApiRequest, AuthError, AuthenticatedChannel, HttpBackend};
use crate::identity::IdentityStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

pub const LOGIN_PATH: &str = "/api/auth/login";
pub const SIGNUP_PATH: &str = "/api/auth/signup";
pub const LOGOUT_PATH: &str = "/api/auth/logout";
pub const USER_PATH: &str = "/api/user";

/// Titel der manuellen Eingabe in der Namensauswahl
pub const MANUAL_NAME_TITLE: &str = "Enter name";

/// Absolute URL eines API-Pfads
pub fn endpoint(server: &Url, path: &str) -> Result<String, AuthError> {
    server
        .join(path)
        .map(|url| url.to_string())
        .map_err(|e| AuthError::Http(format!("invalid endpoint {}: {}", path, e)))
}

// ============================================================================
// TYPES
// ============================================================================

#[derive(Serialize)]
struct Credentials<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignupResponse {
    user_id: String,
}

/// Profil des eingeloggten Users
///
/// Leere Strings bedeuten "nicht gesetzt", beim PATCH lässt der Server sie
/// unverändert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Ein Eintrag der Namensauswahl vor dem Beitritt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayNameVariant {
    pub title: String,
    /// `None` = Name wird manuell eingegeben
    pub value: Option<String>,
}

/// Namensvorschläge aus dem Profil
pub fn display_name_variants(profile: Option<&UserProfile>) -> Vec<DisplayNameVariant> {
    let mut variants = vec![DisplayNameVariant {
        title: MANUAL_NAME_TITLE.to_string(),
        value: None,
    }];

    let Some(profile) = profile else {
        return variants;
    };

    if !profile.name.is_empty() {
        variants.push(DisplayNameVariant {
            title: profile.name.clone(),
            value: Some(profile.name.clone()),
        });
    }
    if !profile.email.is_empty() {
        variants.push(DisplayNameVariant {
            title: format!("Email {}", profile.email),
            value: Some(profile.email.clone()),
        });
    }
    if !profile.phone.is_empty() {
        variants.push(DisplayNameVariant {
            title: format!("Tel {}", profile.phone),
            value: Some(profile.phone.clone()),
        });
    }
    variants
}

// ============================================================================
// AUTH API
// ============================================================================

/// Login, Signup, Logout
pub struct AuthApi<B> {
    backend: Arc<B>,
    identity: IdentityStore,
    server: Url,
}

impl<B: HttpBackend> AuthApi<B> {
    pub fn new(backend: Arc<B>, identity: IdentityStore, server: Url) -> Self {
        Self {
            backend,
            identity,
            server,
        }
    }

    /// Meldet an und speichert Token + Identifier
    pub async fn login(&self, identifier: &str, password: &str) -> Result<(), AuthError> {
        let request = ApiRequest::post(endpoint(&self.server, LOGIN_PATH)?)
            .json(&Credentials { identifier, password })?;

        let response = self.backend.execute(request).await?.error_for_status()?;
        let body: LoginResponse = response.json()?;

        self.identity.sign_in(&body.access_token, identifier)?;
        tracing::info!("Logged in as {}", identifier);
        Ok(())
    }

    /// Legt einen Account an, gibt die neue userId zurück
    pub async fn signup(&self, identifier: &str, password: &str) -> Result<String, AuthError> {
        let request = ApiRequest::post(endpoint(&self.server, SIGNUP_PATH)?)
            .json(&Credentials { identifier, password })?;

        let response = self.backend.execute(request).await?.error_for_status()?;
        let body: SignupResponse = response.json()?;

        tracing::info!("Created user {}", body.user_id);
        Ok(body.user_id)
    }

    /// Meldet ab, die lokale Identität wird in jedem Fall verworfen
    pub async fn logout(&self) -> Result<(), AuthError> {
        let result = match endpoint(&self.server, LOGOUT_PATH) {
            Ok(url) => self
                .backend
                .execute(ApiRequest::post(url))
                .await
                .and_then(|response| response.error_for_status()),
            Err(e) => Err(e),
        };

        self.identity.downgrade_to_anonymous()?;
        self.identity.set_display_name(None);

        if let Err(e) = &result {
            tracing::warn!("Logout request failed: {}", e);
        }
        result.map(|_| ())
    }
}

// ============================================================================
// PROFILE API
// ============================================================================

/// `GET/PATCH /api/user` über den Authenticated Channel
pub struct ProfileApi<B> {
    channel: AuthenticatedChannel<B>,
    server: Url,
}

impl<B: HttpBackend> ProfileApi<B> {
    pub fn new(channel: AuthenticatedChannel<B>, server: Url) -> Self {
        Self { channel, server }
    }

    pub async fn get(&self) -> Result<UserProfile, AuthError> {
        let request = ApiRequest::get(endpoint(&self.server, USER_PATH)?);
        self.channel.send(request).await?.error_for_status()?.json()
    }

    /// Überträgt nur die gesetzten Felder, gibt das gespeicherte Profil zurück
    pub async fn update(&self, changes: &UserProfile) -> Result<UserProfile, AuthError> {
        let request = ApiRequest::patch(endpoint(&self.server, USER_PATH)?).json(changes)?;
        let profile: UserProfile = self.channel.send(request).await?.error_for_status()?.json()?;

        tracing::info!("Profile of {} updated", profile.user_id);
        Ok(profile)
    }
}

// ============================================================================
// TESTS
// ============================================================================
