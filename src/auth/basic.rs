//! HTTP Basic Authentication (RFC 7617)

use async_trait::async_trait;
use base64::Engine;

use super::{mismatch, AuthConfig, AuthStrategy, AuthorizationToken, AUTHORIZATION};
use crate::errors::Result;

#[derive(Debug, Default)]
pub struct BasicStrategy;

fn encode(username: &str, password: &str) -> String {
    let credentials = format!("{}:{}", username, password);
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(credentials.as_bytes())
    )
}

#[async_trait]
impl AuthStrategy for BasicStrategy {
    async fn generate(&self, live: &AuthConfig, history: &AuthConfig) -> Result<AuthorizationToken> {
        let AuthConfig::Basic { username, password } = live else {
            return Err(mismatch("basic", live));
        };
        let safe = match history {
            AuthConfig::Basic { username, password } => encode(username, password),
            other => return Err(mismatch("basic", other)),
        };
        Ok(AuthorizationToken::header(AUTHORIZATION, encode(username, password), safe))
    }
}
