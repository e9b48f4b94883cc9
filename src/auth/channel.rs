//! Authenticated Channel
//!
//! Jeder API-Request läuft hier durch:
//! - Bearer Token anhängen, falls vorhanden
//! - Bei 401 genau einmal `refresh-token` aufrufen
//! - Original-Request genau einmal mit dem neuen Token wiederholen
//!
//! Schlägt der Refresh fehl, wird der gespeicherte Token gelöscht und der
//! Aufrufer bekommt `AuthError::AuthExpired`.

use crate::identity::{IdentityError, IdentityStore};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Pfad des Refresh-Endpoints (Refresh Token kommt als Cookie mit)
pub const REFRESH_PATH: &str = "/api/auth/refresh-token";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Session expired, please log in again")]
    AuthExpired,

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response body: {0}")]
    Decode(String),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Http(err.to_string())
    }
}

// ============================================================================
// REQUEST / RESPONSE
// ============================================================================

/// Ein API-Request, unabhängig vom HTTP-Client
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// JSON-Body inkl. Content-Type
    pub fn json<T: Serialize>(self, body: &T) -> Result<Self, AuthError> {
        let encoded = serde_json::to_string(body).map_err(|e| AuthError::Decode(e.to_string()))?;
        let mut request = self.header(CONTENT_TYPE.as_str(), "application/json");
        request.body = Some(encoded);
        Ok(request)
    }

    /// Wert eines Headers (case-insensitive)
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn with_bearer(&self, token: Option<&str>) -> Self {
        let mut request = self.clone();
        request
            .headers
            .retain(|(key, _)| !key.eq_ignore_ascii_case(AUTHORIZATION.as_str()));
        if let Some(token) = token {
            request
                .headers
                .push((AUTHORIZATION.to_string(), format!("Bearer {}", token)));
        }
        request
    }
}

/// Antwort mit Status und rohem Body
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, AuthError> {
        serde_json::from_str(&self.body).map_err(|e| AuthError::Decode(e.to_string()))
    }

    /// Nicht-2xx in `AuthError::Rejected` umwandeln (Server liefert `{message}`)
    pub fn error_for_status(self) -> Result<Self, AuthError> {
        if self.is_success() {
            return Ok(self);
        }
        let message = serde_json::from_str::<ErrorBody>(&self.body)
            .ok()
            .and_then(|body| body.message)
            .unwrap_or_else(|| {
                self.status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });
        Err(AuthError::Rejected {
            status: self.status.as_u16(),
            message,
        })
    }
}

// ============================================================================
// HTTP BACKEND
// ============================================================================

/// Führt einen einzelnen Request aus, ohne Auth-Logik
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, AuthError>;
}

/// reqwest mit Cookie-Jar (für das Refresh Token)
#[derive(Debug, Clone)]
pub struct ReqwestBackend {
    http: reqwest::Client,
}

impl ReqwestBackend {
    pub fn new() -> Result<Self, AuthError> {
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, AuthError> {
        tracing::debug!("{} {}", request.method, request.url);

        let mut builder = self.http.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(ApiResponse { status, body })
    }
}

// ============================================================================
// AUTHENTICATED CHANNEL
// ============================================================================

enum SendStep {
    Attempt,
    Refresh,
    Retry { token: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody {
    access_token: Option<String>,
}

/// Request-Wrapper mit Refresh-and-Retry bei 401
pub struct AuthenticatedChannel<B> {
    backend: Arc<B>,
    identity: IdentityStore,
    refresh_url: String,
}

impl<B> Clone for AuthenticatedChannel<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            identity: self.identity.clone(),
            refresh_url: self.refresh_url.clone(),
        }
    }
}

impl<B: HttpBackend> AuthenticatedChannel<B> {
    pub fn new(backend: Arc<B>, identity: IdentityStore, refresh_url: impl Into<String>) -> Self {
        Self {
            backend,
            identity,
            refresh_url: refresh_url.into(),
        }
    }

    pub fn identity(&self) -> &IdentityStore {
        &self.identity
    }

    /// Sendet einen Request, höchstens ein Refresh und ein Retry
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, AuthError> {
        let mut step = SendStep::Attempt;
        loop {
            step = match step {
                SendStep::Attempt => {
                    let token = self.identity.access_token();
                    let response = self
                        .backend
                        .execute(request.with_bearer(token.as_deref()))
                        .await?;
                    if response.status != StatusCode::UNAUTHORIZED {
                        return Ok(response);
                    }
                    tracing::info!("{} {} unauthorized, refreshing token", request.method, request.url);
                    SendStep::Refresh
                }
                SendStep::Refresh => match self.refresh().await? {
                    Some(token) => SendStep::Retry { token },
                    None => {
                        self.identity.downgrade_to_anonymous()?;
                        return Err(AuthError::AuthExpired);
                    }
                },
                SendStep::Retry { token } => {
                    return self.backend.execute(request.with_bearer(Some(&token))).await;
                }
            };
        }
    }

    /// `Some(token)` bei Erfolg, `None` wenn der Server den Refresh ablehnt
    async fn refresh(&self) -> Result<Option<String>, AuthError> {
        let response = self
            .backend
            .execute(ApiRequest::post(self.refresh_url.as_str()))
            .await?;

        if response.status != StatusCode::OK {
            tracing::warn!("Token refresh failed with status {}", response.status);
            return Ok(None);
        }

        let token = response
            .json::<RefreshBody>()
            .ok()
            .and_then(|body| body.access_token)
            .filter(|token| !token.is_empty());

        match token {
            Some(token) => {
                self.identity.replace_token(&token)?;
                tracing::info!("Access token refreshed");
                Ok(Some(token))
            }
            None => {
                tracing::warn!("Token refresh returned no access token");
                Ok(None)
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
