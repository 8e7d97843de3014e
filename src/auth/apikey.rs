//! API key authentication, as a header or a query parameter

use async_trait::async_trait;

use super::{mismatch, ApiKeyLocation, AuthConfig, AuthStrategy, AuthorizationToken};
use crate::errors::{ReqflowError, Result};
use crate::models::request::KeyValue;

#[derive(Debug, Default)]
pub struct ApiKeyStrategy;

#[async_trait]
impl AuthStrategy for ApiKeyStrategy {
    async fn generate(&self, live: &AuthConfig, history: &AuthConfig) -> Result<AuthorizationToken> {
        let AuthConfig::ApiKey { key, value, location } = live else {
            return Err(mismatch("api-key", live));
        };
        if key.trim().is_empty() {
            return Err(ReqflowError::Authorization("API key name is empty".into()));
        }

        match location {
            ApiKeyLocation::Header => {
                let masked = match history {
                    AuthConfig::ApiKey { value, .. } => value.clone(),
                    other => return Err(mismatch("api-key", other)),
                };
                Ok(AuthorizationToken::header(key, value.clone(), masked))
            }
            ApiKeyLocation::Query => Ok(AuthorizationToken {
                params: vec![KeyValue::new(key.clone(), value.clone())],
                ..Default::default()
            }),
        }
    }
}
