//! Bearer Token Authentication (RFC 6750)

use async_trait::async_trait;

use super::{mismatch, AuthConfig, AuthStrategy, AuthorizationToken, AUTHORIZATION};
use crate::errors::Result;

#[derive(Debug, Default)]
pub struct BearerStrategy;

#[async_trait]
impl AuthStrategy for BearerStrategy {
    async fn generate(&self, live: &AuthConfig, history: &AuthConfig) -> Result<AuthorizationToken> {
        match (live, history) {
            (AuthConfig::Bearer { token }, AuthConfig::Bearer { token: masked }) => Ok(AuthorizationToken::header(
                AUTHORIZATION,
                format!("Bearer {}", token),
                format!("Bearer {}", masked),
            )),
            (AuthConfig::Bearer { .. }, other) | (other, _) => Err(mismatch("bearer", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bearer_header() {
        let live = AuthConfig::Bearer { token: "my-token".into() };
        let history = AuthConfig::Bearer { token: "******".into() };
        let token = BearerStrategy.generate(&live, &history).await.unwrap();
        assert_eq!(token.unsafe_token.unwrap().value, "Bearer my-token");
        assert_eq!(token.safe_token.unwrap().value, "Bearer ******");
        assert!(token.params.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_config_is_error() {
        assert!(BearerStrategy.generate(&AuthConfig::None, &AuthConfig::None).await.is_err());
    }
}
