//! Authorization
//!
//! Requests and folders carry an [`AuthConfig`]. At execution time the
//! [`AuthorizationDispatcher`] picks the strategy registered for the config's
//! [`AuthType`] and produces an [`AuthorizationToken`]: a header for the
//! live request, a redacted header for the history copy, and optional query
//! parameters.

mod apikey;
mod basic;
mod bearer;
pub mod oauth2;

pub use apikey::ApiKeyStrategy;
pub use basic::BasicStrategy;
pub use bearer::BearerStrategy;
pub use oauth2::{CachedToken, HttpTokenProvider, OAuth2Strategy, TokenProvider};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{ReqflowError, Result};
use crate::models::collection::{Collection, NodeId};
use crate::models::request::{KeyValue, Request};

pub const AUTHORIZATION: &str = "Authorization";

fn default_header_prefix() -> String {
    "Bearer".to_string()
}

/// Where an API key is sent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    #[default]
    Header,
    Query,
}

/// OAuth 2.0 client credentials grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Settings {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    #[serde(default = "default_header_prefix")]
    pub header_prefix: String,
}

/// Authorization attached to a request or folder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AuthConfig {
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        #[serde(default)]
        password: String,
    },
    ApiKey {
        key: String,
        value: String,
        #[serde(default)]
        location: ApiKeyLocation,
    },
    #[serde(rename = "oauth2")]
    OAuth2(OAuth2Settings),
    #[default]
    InheritFromParent,
}

/// Strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthType {
    None,
    Bearer,
    Basic,
    ApiKey,
    OAuth2,
    InheritFromParent,
}

impl AuthConfig {
    pub fn auth_type(&self) -> AuthType {
        match self {
            AuthConfig::None => AuthType::None,
            AuthConfig::Bearer { .. } => AuthType::Bearer,
            AuthConfig::Basic { .. } => AuthType::Basic,
            AuthConfig::ApiKey { .. } => AuthType::ApiKey,
            AuthConfig::OAuth2(_) => AuthType::OAuth2,
            AuthConfig::InheritFromParent => AuthType::InheritFromParent,
        }
    }

    /// Apply `f` to every templated string of the config
    pub fn visit_strings_mut<F>(&mut self, f: &mut F) -> Result<()>
    where
        F: FnMut(&mut String) -> Result<()>,
    {
        match self {
            AuthConfig::None | AuthConfig::InheritFromParent => Ok(()),
            AuthConfig::Bearer { token } => f(token),
            AuthConfig::Basic { username, password } => {
                f(username)?;
                f(password)
            }
            AuthConfig::ApiKey { key, value, .. } => {
                f(key)?;
                f(value)
            }
            AuthConfig::OAuth2(settings) => {
                f(&mut settings.token_url)?;
                f(&mut settings.client_id)?;
                f(&mut settings.client_secret)?;
                for scope in &mut settings.scopes {
                    f(scope)?;
                }
                Ok(())
            }
        }
    }
}

/// Authorization material produced by a strategy; every part is optional
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationToken {
    /// Header for the live request
    pub unsafe_token: Option<KeyValue>,
    /// Redacted header for the history copy
    pub safe_token: Option<KeyValue>,
    /// Query parameters for the live request
    pub params: Vec<KeyValue>,
}

impl AuthorizationToken {
    pub fn header(name: &str, live: String, history: String) -> Self {
        Self {
            unsafe_token: Some(KeyValue::new(name, live)),
            safe_token: Some(KeyValue::new(name, history)),
            params: Vec::new(),
        }
    }
}

/// One way of producing authorization material.
///
/// `live` carries decrypted values, `history` the masked ones.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    async fn generate(&self, live: &AuthConfig, history: &AuthConfig) -> Result<AuthorizationToken>;
}

/// Strategy for `none` and for an inherit that found nothing above it
#[derive(Debug, Default)]
pub struct NoAuthStrategy;

#[async_trait]
impl AuthStrategy for NoAuthStrategy {
    async fn generate(&self, _live: &AuthConfig, _history: &AuthConfig) -> Result<AuthorizationToken> {
        Ok(AuthorizationToken::default())
    }
}

pub(crate) fn mismatch(expected: &str, got: &AuthConfig) -> ReqflowError {
    ReqflowError::Authorization(format!(
        "{} strategy cannot handle {:?} configuration",
        expected,
        got.auth_type()
    ))
}

/// Type-to-strategy table built once at startup
pub struct AuthorizationDispatcher {
    strategies: HashMap<AuthType, Arc<dyn AuthStrategy>>,
}

impl AuthorizationDispatcher {
    pub fn new(token_provider: Arc<dyn TokenProvider>) -> Self {
        let none: Arc<dyn AuthStrategy> = Arc::new(NoAuthStrategy);
        let mut strategies: HashMap<AuthType, Arc<dyn AuthStrategy>> = HashMap::new();
        strategies.insert(AuthType::None, none.clone());
        strategies.insert(AuthType::InheritFromParent, none);
        strategies.insert(AuthType::Bearer, Arc::new(BearerStrategy));
        strategies.insert(AuthType::Basic, Arc::new(BasicStrategy));
        strategies.insert(AuthType::ApiKey, Arc::new(ApiKeyStrategy));
        strategies.insert(AuthType::OAuth2, Arc::new(OAuth2Strategy::new(token_provider)));
        Self { strategies }
    }

    /// Replace the strategy for one type
    pub fn register(&mut self, auth_type: AuthType, strategy: Arc<dyn AuthStrategy>) {
        self.strategies.insert(auth_type, strategy);
    }

    pub async fn get_authorization_token(&self, live: &AuthConfig, history: &AuthConfig) -> Result<AuthorizationToken> {
        let auth_type = live.auth_type();
        let strategy = self.strategies.get(&auth_type).ok_or_else(|| {
            ReqflowError::Authorization(format!("no strategy registered for {:?}", auth_type))
        })?;
        debug!(auth_type = ?auth_type, "generating authorization");
        strategy.generate(live, history).await
    }

    /// Generate a token for the request pair and inject it
    pub async fn authorize(&self, live: &mut Request, history: &mut Request) -> Result<()> {
        let token = self.get_authorization_token(&live.auth, &history.auth).await?;
        inject(token, live, history);
        Ok(())
    }
}

/// Put authorization material on the request copies.
///
/// A header already present under the same name (case-insensitive) wins
/// over the generated one.
pub fn inject(token: AuthorizationToken, live: &mut Request, history: &mut Request) {
    if let Some(header) = token.unsafe_token {
        if !live.has_header(&header.key) {
            live.headers.push(header);
        }
    }
    if let Some(header) = token.safe_token {
        if !history.has_header(&header.key) {
            history.headers.push(header);
        }
    }
    live.params.extend(token.params);
}

/// Follow inherit links up the parent chain.
///
/// Returns the first non-inherit config, or [`AuthConfig::None`] once the
/// walk runs past the root. A parent chain that loops is an error.
pub fn resolve_inherited(collection: &Collection, node: NodeId) -> Result<AuthConfig> {
    let mut visited = HashSet::new();
    let mut current = Some(node);

    while let Some(id) = current {
        if !visited.insert(id) {
            return Err(ReqflowError::Authorization(format!(
                "cycle in folder parent chain at node #{}",
                id.0
            )));
        }
        let node = collection.node(id)?;
        match node.auth() {
            AuthConfig::InheritFromParent => current = node.parent,
            auth => return Ok(auth.clone()),
        }
    }

    Ok(AuthConfig::None)
}
