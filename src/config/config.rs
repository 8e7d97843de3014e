//! Config file handling
//!
//! The engine reads a single TOML file. Every key is optional; missing keys
//! fall back to the defaults below. Durations are written the humantime way
//! (`"30s"`, `"10m"`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ReqflowError, Result};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Whether skipped leaves are recorded in the run ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LedgerPolicy {
    /// Only leaves that were actually executed are ledgered
    #[default]
    ExecutedOnly,
    /// Skipped leaves are ledgered too, in walk order
    IncludeSkipped,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Project tag attached to byte metrics
    pub project: String,
    /// Request ceiling in MB (serialized request minus post-script bytes)
    pub request_size_limit_mb: f64,
    /// Response ceiling in MB (serialized response plus post-script bytes)
    pub response_size_limit_mb: f64,
    /// Maximum executions of one request within one run
    pub max_request_executions: u32,
    /// Maximum number of full resolution passes over one string
    pub max_resolve_depth: usize,
    #[serde(with = "duration_str")]
    pub sse_timeout: Duration,
    #[serde(with = "duration_str")]
    pub keep_alive_interval: Duration,
    #[serde(with = "duration_str")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_str")]
    pub read_timeout: Duration,
    pub ledger_policy: LedgerPolicy,
    /// Secret used by the built-in encryptor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
    /// PEM file holding the client certificate (and key, unless `client_key` is set)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_cert: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_key: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            project: "default".to_string(),
            request_size_limit_mb: 50.0,
            response_size_limit_mb: 50.0,
            max_request_executions: 10,
            max_resolve_depth: 3,
            sse_timeout: Duration::from_secs(600),
            keep_alive_interval: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            ledger_policy: LedgerPolicy::default(),
            encryption_key: None,
            client_cert: None,
            client_key: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `<config dir>/reqflow/config.toml`
    /// is used when present and defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_file = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ReqflowError::Config(format!(
                        "config file not found: {}",
                        p.display()
                    )));
                }
                p.to_path_buf()
            }
            None => {
                let default = Self::default_config_dir().join("config.toml");
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = std::fs::read_to_string(&config_file)
            .map_err(|e| ReqflowError::Config(format!("Failed to read config: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ReqflowError::Config(format!("Invalid config TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the engine unusable
    pub fn validate(&self) -> Result<()> {
        if !(self.request_size_limit_mb > 0.0) {
            return Err(ReqflowError::Config("request_size_limit_mb must be positive".into()));
        }
        if !(self.response_size_limit_mb > 0.0) {
            return Err(ReqflowError::Config("response_size_limit_mb must be positive".into()));
        }
        if self.max_request_executions == 0 {
            return Err(ReqflowError::Config("max_request_executions must be at least 1".into()));
        }
        if self.keep_alive_interval.is_zero() {
            return Err(ReqflowError::Config("keep_alive_interval must be non-zero".into()));
        }
        Ok(())
    }

    pub fn request_size_limit_bytes(&self) -> u64 {
        (self.request_size_limit_mb * BYTES_PER_MB) as u64
    }

    pub fn response_size_limit_bytes(&self) -> u64 {
        (self.response_size_limit_mb * BYTES_PER_MB) as u64
    }

    /// Get the default config directory
    fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("reqflow"))
            .unwrap_or_else(|| PathBuf::from(".reqflow"))
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
