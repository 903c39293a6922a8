//! Per-recipient OAuth credentials for upload destinations.
//!
//! A credential is a scoped acquisition around each delivery:
//!
//! ```text
//! load <recipient>.json ──▶ expired? ──yes──▶ refresh ──▶ save back ──▶ use
//!                              └──no────────────────────────────────────▲
//! ```
//!
//! The core pipeline never sees any of this; it only calls
//! [`super::RecipientSink::deliver`].

use crate::store::{ObjectStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Google's OAuth token endpoint.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Refresh a little before the recorded expiry so the token survives the upload.
const EXPIRY_SKEW_SECS: i64 = 60;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Stored OAuth credential for one recipient.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    /// `None` means the expiry is unknown and the token is used as is.
    #[serde(default)]
    pub token_expiry: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.token_expiry
            .is_some_and(|expiry| expiry <= now + Duration::seconds(EXPIRY_SKEW_SECS))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .field("token_expiry", &self.token_expiry)
            .finish()
    }
}

/// Errors emitted while acquiring a credential.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credential stored for '{0}'")]
    NotFound(String),

    #[error("credential for '{recipient}' is invalid: {detail}")]
    Invalid { recipient: String, detail: String },

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error("credential storage failed: {0}")]
    Store(String),
}

/// Where credentials live.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, recipient: &str) -> Result<Credential, CredentialError>;
    async fn save(&self, recipient: &str, credential: &Credential) -> Result<(), CredentialError>;
}

/// Exchanges a refresh token for a fresh access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, credential: &Credential) -> Result<Credential, CredentialError>;
}

// ── Object-store backed credentials ──────────────────────────────────────

/// Credentials stored as `<recipient>.json` in a configuration container.
#[derive(Clone)]
pub struct ObjectStoreCredentials {
    store: Arc<dyn ObjectStore>,
    container: String,
}

impl ObjectStoreCredentials {
    pub fn new(store: Arc<dyn ObjectStore>, container: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
        }
    }

    pub fn key_for(recipient: &str) -> String {
        format!("{recipient}.json")
    }
}

#[async_trait]
impl CredentialStore for ObjectStoreCredentials {
    async fn load(&self, recipient: &str) -> Result<Credential, CredentialError> {
        let bytes = self
            .store
            .get(&self.container, &Self::key_for(recipient))
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => CredentialError::NotFound(recipient.to_string()),
                other => CredentialError::Store(other.to_string()),
            })?;
        serde_json::from_slice(&bytes).map_err(|e| CredentialError::Invalid {
            recipient: recipient.to_string(),
            detail: e.to_string(),
        })
    }

    async fn save(&self, recipient: &str, credential: &Credential) -> Result<(), CredentialError> {
        let json = serde_json::to_vec_pretty(credential)
            .map_err(|e| CredentialError::Store(e.to_string()))?;
        self.store
            .put(&self.container, &Self::key_for(recipient), json)
            .await
            .map_err(|e| CredentialError::Store(e.to_string()))
    }
}

// ── OAuth refresh ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Refresh-token grant against the credential's `token_uri`.
#[derive(Debug, Clone, Default)]
pub struct OAuthRefresher {
    client: reqwest::Client,
}

impl OAuthRefresher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self, credential: &Credential) -> Result<Credential, CredentialError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", credential.refresh_token.as_str()),
            ("client_id", credential.client_id.as_str()),
            ("client_secret", credential.client_secret.as_str()),
        ];
        let response = self
            .client
            .post(&credential.token_uri)
            .form(&form)
            .send()
            .await
            .map_err(|e| CredentialError::Refresh(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CredentialError::Refresh(format!("HTTP {}", response.status())));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::Refresh(e.to_string()))?;
        Ok(apply_token(credential, token, Utc::now()))
    }
}

fn apply_token(credential: &Credential, token: TokenResponse, now: DateTime<Utc>) -> Credential {
    Credential {
        access_token: token.access_token,
        refresh_token: token
            .refresh_token
            .unwrap_or_else(|| credential.refresh_token.clone()),
        token_expiry: token.expires_in.map(|secs| now + Duration::seconds(secs)),
        ..credential.clone()
    }
}

// ── Broker ───────────────────────────────────────────────────────────────

/// Loads, refreshes-if-expired and persists credentials.
#[derive(Clone)]
pub struct CredentialBroker {
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
}

impl CredentialBroker {
    pub fn new(store: Arc<dyn CredentialStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self { store, refresher }
    }

    /// A usable credential for `recipient` as of `now`.
    ///
    /// An expired credential is refreshed and the refreshed form saved back
    /// before it is returned.
    pub async fn acquire(
        &self,
        recipient: &str,
        now: DateTime<Utc>,
    ) -> Result<Credential, CredentialError> {
        let credential = self.store.load(recipient).await?;
        if !credential.is_expired(now) {
            debug!("Credential for {} is current", recipient);
            return Ok(credential);
        }

        let refreshed = self.refresher.refresh(&credential).await?;
        self.store.save(recipient, &refreshed).await?;
        info!("Refreshed and saved credential for {}", recipient);
        Ok(refreshed)
    }
}
