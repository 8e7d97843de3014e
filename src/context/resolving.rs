//! Resolving context
//!
//! Five named scopes merged into a single lookup table. Later scopes in
//! [`Scope::PRECEDENCE`] shadow earlier ones.

use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::ReqflowError;

/// A variable scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Globals,
    Collection,
    Environment,
    Iteration,
    Local,
}

impl Scope {
    /// Lowest to highest precedence
    pub const PRECEDENCE: [Scope; 5] = [
        Scope::Globals,
        Scope::Collection,
        Scope::Environment,
        Scope::Iteration,
        Scope::Local,
    ];
}

impl FromStr for Scope {
    type Err = ReqflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "globals" | "global" => Ok(Scope::Globals),
            "collection" | "collectionvariables" => Ok(Scope::Collection),
            "environment" | "env" => Ok(Scope::Environment),
            "iteration" | "iterationdata" | "data" => Ok(Scope::Iteration),
            "local" | "variables" => Ok(Scope::Local),
            other => Err(ReqflowError::InvalidRequest(format!("unknown variable scope '{}'", other))),
        }
    }
}

/// Variables available to a step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolvingContext {
    pub globals: IndexMap<String, String>,
    pub collection: IndexMap<String, String>,
    pub environment: IndexMap<String, String>,
    pub iteration: IndexMap<String, String>,
    pub local: IndexMap<String, String>,
    /// Environment whose systems back `${ENV.*}` placeholders
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<String>,
}

impl ResolvingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_environment_id(mut self, id: impl Into<String>) -> Self {
        self.environment_id = Some(id.into());
        self
    }

    pub fn scope(&self, scope: Scope) -> &IndexMap<String, String> {
        match scope {
            Scope::Globals => &self.globals,
            Scope::Collection => &self.collection,
            Scope::Environment => &self.environment,
            Scope::Iteration => &self.iteration,
            Scope::Local => &self.local,
        }
    }

    pub fn scope_mut(&mut self, scope: Scope) -> &mut IndexMap<String, String> {
        match scope {
            Scope::Globals => &mut self.globals,
            Scope::Collection => &mut self.collection,
            Scope::Environment => &mut self.environment,
            Scope::Iteration => &mut self.iteration,
            Scope::Local => &mut self.local,
        }
    }

    pub fn set(&mut self, scope: Scope, name: impl Into<String>, value: impl Into<String>) {
        self.scope_mut(scope).insert(name.into(), value.into());
    }

    /// Highest-precedence value for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        Scope::PRECEDENCE
            .iter()
            .rev()
            .find_map(|s| self.scope(*s).get(name))
            .map(String::as_str)
    }

    /// All scopes flattened into one table
    pub fn merged(&self) -> IndexMap<String, String> {
        let mut merged = IndexMap::new();
        for scope in Scope::PRECEDENCE {
            for (k, v) in self.scope(scope) {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        let mut ctx = ResolvingContext::new();
        ctx.set(Scope::Globals, "host", "global");
        ctx.set(Scope::Collection, "host", "collection");
        ctx.set(Scope::Environment, "host", "environment");
        assert_eq!(ctx.get("host"), Some("environment"));

        ctx.set(Scope::Iteration, "host", "iteration");
        assert_eq!(ctx.get("host"), Some("iteration"));

        ctx.set(Scope::Local, "host", "local");
        assert_eq!(ctx.get("host"), Some("local"));
        assert_eq!(ctx.merged().get("host").map(String::as_str), Some("local"));
    }

    #[test]
    fn test_merged_keeps_lower_scopes() {
        let mut ctx = ResolvingContext::new();
        ctx.set(Scope::Globals, "a", "1");
        ctx.set(Scope::Local, "b", "2");
        let merged = ctx.merged();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["a"], "1");
    }

    #[test]
    fn test_scope_from_str() {
        assert_eq!("ENV".parse::<Scope>().unwrap(), Scope::Environment);
        assert_eq!("collectionVariables".parse::<Scope>().unwrap(), Scope::Collection);
        assert!("nope".parse::<Scope>().is_err());
    }
}
