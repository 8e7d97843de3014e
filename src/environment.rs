//! Environment store
//!
//! An environment groups "systems", each with named "connections" holding
//! key/value parameters. `${ENV.System.Connection.param}` placeholders are
//! looked up here.

use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::{ReqflowError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub name: String,
    #[serde(default)]
    pub parameters: IndexMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct System {
    pub name: String,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl System {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connections: Vec::new(),
        }
    }

    pub fn with_connection<I, K, V>(mut self, name: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.connections.push(Connection {
            name: name.into(),
            parameters: params.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        });
        self
    }
}

/// Case-insensitive parameter lookup across systems
pub fn lookup_parameter<'a>(systems: &'a [System], system: &str, connection: &str, param: &str) -> Option<&'a str> {
    systems
        .iter()
        .filter(|s| s.name.eq_ignore_ascii_case(system))
        .flat_map(|s| s.connections.iter())
        .filter(|c| c.name.eq_ignore_ascii_case(connection))
        .flat_map(|c| c.parameters.iter())
        .find(|(k, _)| k.eq_ignore_ascii_case(param))
        .map(|(_, v)| v.as_str())
}

/// Environment store collaborator
#[async_trait]
pub trait EnvironmentStore: Send + Sync {
    async fn get_systems(&self, environment_id: &str) -> Result<Vec<System>>;
}

/// Environments kept in memory
#[derive(Debug, Default)]
pub struct InMemoryEnvironmentStore {
    environments: DashMap<String, Vec<System>>,
}

impl InMemoryEnvironmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, environment_id: impl Into<String>, systems: Vec<System>) {
        self.environments.insert(environment_id.into(), systems);
    }
}

#[async_trait]
impl EnvironmentStore for InMemoryEnvironmentStore {
    async fn get_systems(&self, environment_id: &str) -> Result<Vec<System>> {
        self.environments
            .get(environment_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| ReqflowError::EntityNotFound(format!("environment '{}'", environment_id)))
    }
}

/// On-disk environment description used by the CLI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentFile {
    #[serde(default = "default_environment_id")]
    pub id: String,
    /// Environment-scope variables
    #[serde(default)]
    pub variables: IndexMap<String, String>,
    #[serde(default)]
    pub globals: IndexMap<String, String>,
    #[serde(default)]
    pub systems: Vec<System>,
}

fn default_environment_id() -> String {
    "default".to_string()
}

impl EnvironmentFile {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let env: Self = serde_yaml::from_str(&content)?;
        Ok(env)
    }
}
