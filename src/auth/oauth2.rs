//! OAuth 2.0 Client Credentials Flow
//!
//! The strategy asks a [`TokenProvider`] for an access token. The default
//! provider posts a `client_credentials` grant to the token URL and caches
//! the token until shortly before it expires.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{mismatch, AuthConfig, AuthStrategy, AuthorizationToken, OAuth2Settings, AUTHORIZATION};
use crate::crypto::MASK;
use crate::errors::{ReqflowError, Result};

/// OAuth 2.0 token response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
}

/// OAuth 2.0 error response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenError {
    pub error: String,
    pub error_description: Option<String>,
}

/// Cached token with expiration tracking
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub access_token: String,
    pub obtained_at: Instant,
    pub expires_in: Option<Duration>,
}

impl CachedToken {
    /// Still usable, with a 30 second margin
    pub fn is_valid(&self) -> bool {
        match self.expires_in {
            Some(expires_in) => self.obtained_at.elapsed() < expires_in.saturating_sub(Duration::from_secs(30)),
            None => true,
        }
    }
}

/// Source of OAuth 2.0 access tokens
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self, settings: &OAuth2Settings) -> Result<String>;
}

/// Token provider talking to the token endpoint over HTTP
pub struct HttpTokenProvider {
    client: reqwest::Client,
    cache: DashMap<String, CachedToken>,
    in_flight: Arc<DashSet<String>>,
}

/// Removes the in-flight marker even if the fetch is cancelled
struct InFlightGuard {
    key: String,
    in_flight: Arc<DashSet<String>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

impl HttpTokenProvider {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            cache: DashMap::new(),
            in_flight: Arc::new(DashSet::new()),
        }
    }

    fn cache_key(settings: &OAuth2Settings) -> String {
        use sha2::{Digest, Sha256};
        let secret_hash = hex::encode(Sha256::digest(settings.client_secret.as_bytes()));
        format!(
            "{}:{}:{}:{}",
            settings.token_url,
            settings.client_id,
            secret_hash,
            settings.scopes.join(",")
        )
    }

    fn cached(&self, key: &str) -> Option<String> {
        self.cache
            .get(key)
            .filter(|t| t.is_valid())
            .map(|t| t.access_token.clone())
    }

    async fn obtain_token(&self, settings: &OAuth2Settings) -> Result<CachedToken> {
        let mut form = vec![("grant_type", "client_credentials".to_string())];
        if !settings.scopes.is_empty() {
            form.push(("scope", settings.scopes.join(" ")));
        }

        let obtained_at = Instant::now();
        let response = self
            .client
            .post(&settings.token_url)
            .basic_auth(&settings.client_id, Some(&settings.client_secret))
            .form(&form)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let msg = match serde_json::from_str::<TokenError>(&body) {
                Ok(TokenError {
                    error,
                    error_description: Some(desc),
                }) => format!("{}: {}", error, desc),
                Ok(TokenError { error, .. }) => error,
                Err(_) => format!("status {}: {}", status, body),
            };
            warn!(token_url = %settings.token_url, "OAuth2 token request failed");
            return Err(ReqflowError::Authorization(format!("OAuth2 token request failed: {}", msg)));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| ReqflowError::Authorization(format!("Failed to parse token response: {}", e)))?;

        Ok(CachedToken {
            access_token: token.access_token,
            obtained_at,
            expires_in: token.expires_in.map(Duration::from_secs),
        })
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn access_token(&self, settings: &OAuth2Settings) -> Result<String> {
        let key = Self::cache_key(settings);
        if let Some(token) = self.cached(&key) {
            return Ok(token);
        }

        // One fetch per key; everyone else waits for the cache to fill
        loop {
            if self.in_flight.insert(key.clone()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            if let Some(token) = self.cached(&key) {
                return Ok(token);
            }
        }

        let _guard = InFlightGuard {
            key: key.clone(),
            in_flight: self.in_flight.clone(),
        };
        debug!(token_url = %settings.token_url, "fetching OAuth2 token");
        let token = self.obtain_token(settings).await?;
        let access_token = token.access_token.clone();
        self.cache.insert(key, token);
        Ok(access_token)
    }
}

pub struct OAuth2Strategy {
    provider: Arc<dyn TokenProvider>,
}

impl OAuth2Strategy {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl AuthStrategy for OAuth2Strategy {
    async fn generate(&self, live: &AuthConfig, _history: &AuthConfig) -> Result<AuthorizationToken> {
        let AuthConfig::OAuth2(settings) = live else {
            return Err(mismatch("oauth2", live));
        };
        let token = self.provider.access_token(settings).await?;
        Ok(AuthorizationToken::header(
            AUTHORIZATION,
            format!("{} {}", settings.header_prefix, token),
            format!("{} {}", settings.header_prefix, MASK),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_token_validity() {
        let token = CachedToken {
            access_token: "test".to_string(),
            obtained_at: Instant::now(),
            expires_in: Some(Duration::from_secs(3600)),
        };
        assert!(token.is_valid());

        let expired = CachedToken {
            obtained_at: Instant::now() - Duration::from_secs(3700),
            ..token
        };
        assert!(!expired.is_valid());
    }

    #[test]
    fn test_cache_key_hides_secret() {
        let settings = OAuth2Settings {
            token_url: "https://idp/token".into(),
            client_id: "cid".into(),
            client_secret: "super-secret".into(),
            scopes: vec!["read".into()],
            header_prefix: "Bearer".into(),
        };
        let key = HttpTokenProvider::cache_key(&settings);
        assert!(key.starts_with("https://idp/token:cid:"));
        assert!(!key.contains("super-secret"));
    }
}
