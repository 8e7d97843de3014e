//! Error types for reqflow
//!
//! Every failure that can happen while resolving, authorizing or executing a
//! step maps onto one [`ReqflowError`] variant. The step executor never lets
//! these escape the walk: they are converted into a [`StepError`] carrying an
//! [`ErrorKind`] tag and delivered like any other result.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which size ceiling was violated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeLimitKind {
    Request,
    Response,
}

impl std::fmt::Display for SizeLimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SizeLimitKind::Request => write!(f, "request"),
            SizeLimitKind::Response => write!(f, "response"),
        }
    }
}

/// Script phase that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptPhase {
    Pre,
    Post,
}

impl std::fmt::Display for ScriptPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptPhase::Pre => write!(f, "pre-script"),
            ScriptPhase::Post => write!(f, "post-script"),
        }
    }
}

/// Sub-classification of script failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScriptErrorKind {
    Decrypt,
    Encrypt,
    EngineUnavailable,
    SandboxContext,
    Runtime,
}

/// Main error type for reqflow
#[derive(Error, Debug)]
pub enum ReqflowError {
    #[error("variables not found: {}", .0.join(", "))]
    VariableNotFound(Vec<String>),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("authorization error: {0}")]
    Authorization(String),

    #[error("{kind} size {size} bytes exceeds limit of {limit} bytes")]
    SizeLimitExceeded {
        kind: SizeLimitKind,
        size: u64,
        limit: u64,
    },

    #[error("{phase} error: {message}")]
    Script {
        phase: ScriptPhase,
        kind: ScriptErrorKind,
        message: String,
    },

    #[error("HTTP execution error: {0}")]
    HttpExecution(#[from] reqwest::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("template error: {0}")]
    Template(#[from] tera::Error),
}

/// Flat tag carried on failed results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    VariableNotFound,
    DecryptError,
    EncryptError,
    AuthorizationError,
    SizeLimitExceeded,
    ScriptExecutionError,
    HttpExecutionError,
    InvalidRequest,
    EntityNotFound,
    Internal,
}

impl ReqflowError {
    /// Shorthand for a script failure
    pub fn script(phase: ScriptPhase, kind: ScriptErrorKind, message: impl Into<String>) -> Self {
        ReqflowError::Script {
            phase,
            kind,
            message: message.into(),
        }
    }

    /// Taxonomy tag for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReqflowError::VariableNotFound(_) => ErrorKind::VariableNotFound,
            ReqflowError::Decrypt(_) => ErrorKind::DecryptError,
            ReqflowError::Encrypt(_) => ErrorKind::EncryptError,
            ReqflowError::Authorization(_) => ErrorKind::AuthorizationError,
            ReqflowError::SizeLimitExceeded { .. } => ErrorKind::SizeLimitExceeded,
            ReqflowError::Script { .. } => ErrorKind::ScriptExecutionError,
            ReqflowError::HttpExecution(_) => ErrorKind::HttpExecutionError,
            ReqflowError::InvalidRequest(_) | ReqflowError::UrlParse(_) | ReqflowError::Template(_) => {
                ErrorKind::InvalidRequest
            }
            ReqflowError::EntityNotFound(_) => ErrorKind::EntityNotFound,
            ReqflowError::Config(_)
            | ReqflowError::Io(_)
            | ReqflowError::Json(_)
            | ReqflowError::Yaml(_) => ErrorKind::Internal,
        }
    }
}

/// Serializable error attached to an execution result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ReqflowError> for StepError {
    fn from(err: &ReqflowError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReqflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_not_found_lists_every_name() {
        let err = ReqflowError::VariableNotFound(vec!["ENV.a.b.c".into(), "ENV.x.y.z".into()]);
        assert_eq!(err.to_string(), "variables not found: ENV.a.b.c, ENV.x.y.z");
        assert_eq!(err.kind(), ErrorKind::VariableNotFound);
    }

    #[test]
    fn test_size_limit_message() {
        let err = ReqflowError::SizeLimitExceeded {
            kind: SizeLimitKind::Request,
            size: 2048,
            limit: 1024,
        };
        assert!(err.to_string().starts_with("request size 2048"));
        assert_eq!(StepError::from(&err).kind, ErrorKind::SizeLimitExceeded);
    }

    #[test]
    fn test_script_error_carries_phase() {
        let err = ReqflowError::script(ScriptPhase::Post, ScriptErrorKind::Runtime, "boom");
        assert_eq!(err.to_string(), "post-script error: boom");
        assert_eq!(err.kind(), ErrorKind::ScriptExecutionError);
    }
}
