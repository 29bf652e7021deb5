//! Access tokens for the Pub/Sub REST API
//!
//! A [`TokenProvider`] hands out the bearer token for each request. Which
//! provider is used is decided once, from [`PubSubConfig`]:
//!
//! 1. emulator configured: no token ([`Anonymous`])
//! 2. explicit token: [`StaticToken`]
//! 3. credentials file of type `authorized_user`: [`AuthorizedUser`]
//! 4. otherwise the GCE metadata server ([`MetadataServer`])

use crate::config::PubSubConfig;
use crate::error::{PubSubError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const METADATA_HOST: &str = "metadata.google.internal";

/// Tokens this close to expiry are refreshed before use
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Source of OAuth bearer tokens
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current access token, or `None` if requests go unauthenticated.
    async fn access_token(&self, http: &reqwest::Client) -> Result<Option<String>>;

    /// Drop any cached token.
    async fn invalidate(&self) {}
}

/// No authentication, for the Pub/Sub emulator
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

#[async_trait]
impl TokenProvider for Anonymous {
    async fn access_token(&self, _http: &reqwest::Client) -> Result<Option<String>> {
        Ok(None)
    }
}

/// A fixed token supplied by the caller
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self, _http: &reqwest::Client) -> Result<Option<String>> {
        Ok(Some(self.0.clone()))
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + EXPIRY_MARGIN < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

async fn read_token_response(response: reqwest::Response, source: &str) -> Result<CachedToken> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PubSubError::Auth(format!(
            "{source} returned HTTP {}: {body}",
            status.as_u16()
        )));
    }

    let bytes = response.bytes().await?;
    let parsed: TokenResponse = serde_json::from_slice(&bytes)
        .map_err(|e| PubSubError::Auth(format!("{source} returned an invalid token: {e}")))?;

    Ok(CachedToken {
        token: parsed.access_token,
        expires_at: Instant::now() + Duration::from_secs(parsed.expires_in),
    })
}

/// User credentials exchanged through the OAuth refresh-token grant
///
/// This is the `authorized_user` file written by
/// `gcloud auth application-default login`.
pub struct AuthorizedUser {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    token_uri: String,
    cache: Mutex<Option<CachedToken>>,
}

impl AuthorizedUser {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
            token_uri: GOOGLE_TOKEN_URI.to_string(),
            cache: Mutex::new(None),
        }
    }

    pub fn with_token_uri(mut self, uri: impl Into<String>) -> Self {
        self.token_uri = uri.into();
        self
    }
}

#[async_trait]
impl TokenProvider for AuthorizedUser {
    async fn access_token(&self, http: &reqwest::Client) -> Result<Option<String>> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref().filter(|c| c.is_fresh()) {
            return Ok(Some(cached.token.clone()));
        }

        tracing::debug!(token_uri = %self.token_uri, "Refreshing user access token");

        let response = http
            .post(&self.token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await?;

        let fresh = read_token_response(response, "token endpoint").await?;
        let token = fresh.token.clone();
        *cache = Some(fresh);
        Ok(Some(token))
    }

    async fn invalidate(&self) {
        self.cache.lock().await.take();
    }
}

/// Default service account token from the GCE metadata server
pub struct MetadataServer {
    host: String,
    cache: Mutex<Option<CachedToken>>,
}

impl Default for MetadataServer {
    fn default() -> Self {
        Self::new(METADATA_HOST)
    }
}

impl MetadataServer {
    /// `host` may include a port, e.g. `127.0.0.1:8080`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            cache: Mutex::new(None),
        }
    }

    fn token_url(&self) -> String {
        format!(
            "http://{}/computeMetadata/v1/instance/service-accounts/default/token",
            self.host
        )
    }
}

#[async_trait]
impl TokenProvider for MetadataServer {
    async fn access_token(&self, http: &reqwest::Client) -> Result<Option<String>> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref().filter(|c| c.is_fresh()) {
            return Ok(Some(cached.token.clone()));
        }

        tracing::debug!(host = %self.host, "Fetching token from metadata server");

        let response = http
            .get(self.token_url())
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;

        let fresh = read_token_response(response, "metadata server").await?;
        let token = fresh.token.clone();
        *cache = Some(fresh);
        Ok(Some(token))
    }

    async fn invalidate(&self) {
        self.cache.lock().await.take();
    }
}

/// Google credentials JSON file
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialsFile {
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
        #[serde(default)]
        quota_project_id: Option<String>,
    },
    ServiceAccount {
        client_email: String,
        #[serde(default)]
        project_id: Option<String>,
    },
}

impl CredentialsFile {
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            PubSubError::Config(format!(
                "cannot read credentials file {}: {e}",
                path.display()
            ))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            PubSubError::Config(format!(
                "invalid credentials file {}: {e}",
                path.display()
            ))
        })
    }

    /// Project the credentials belong to, if the file names one.
    pub fn project(&self) -> Option<&str> {
        match self {
            CredentialsFile::AuthorizedUser {
                quota_project_id, ..
            } => quota_project_id.as_deref(),
            CredentialsFile::ServiceAccount { project_id, .. } => project_id.as_deref(),
        }
    }
}

/// Credentials resolved from configuration
pub struct ResolvedCredentials {
    pub provider: Box<dyn TokenProvider>,

    /// Project named by the credentials file, used when none is configured
    pub project: Option<String>,
}

/// Pick the token provider for `config`, reading the credentials file if
/// one is configured.
pub async fn resolve_credentials(config: &PubSubConfig) -> Result<ResolvedCredentials> {
    let file = match &config.credentials_file {
        Some(path) => Some(CredentialsFile::load(path).await?),
        None => None,
    };
    let project = file.as_ref().and_then(|f| f.project()).map(str::to_string);

    let provider: Box<dyn TokenProvider> = if config.uses_emulator() {
        Box::new(Anonymous)
    } else if let Some(token) = &config.token {
        Box::new(StaticToken::new(token.clone()))
    } else {
        match file {
            Some(CredentialsFile::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
                ..
            }) => Box::new(AuthorizedUser::new(client_id, client_secret, refresh_token)),
            Some(CredentialsFile::ServiceAccount { client_email, .. }) => {
                return Err(PubSubError::Config(format!(
                    "service account key for {client_email} cannot be used to mint tokens; \
                     supply an access token or use application default credentials"
                )));
            }
            None => Box::new(MetadataServer::default()),
        }
    };

    Ok(ResolvedCredentials { provider, project })
}
