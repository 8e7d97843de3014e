//! Script evaluation
//!
//! Pre-scripts run after resolution and authorization, right before the
//! request is sent; they may change the live request and the context.
//! Post-scripts see the response, record test results and may name the
//! request the collection run should execute next.
//!
//! The engine only depends on [`ScriptEvaluator`]. [`LineScriptEvaluator`]
//! is a small built-in command language; [`NoopScriptEvaluator`] ignores
//! scripts entirely.

mod line;

pub use line::LineScriptEvaluator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::ResolvingContext;
use crate::errors::Result;
use crate::http::ResponseData;
use crate::models::request::Request;
use crate::models::result::TestResult;

/// What a script produced besides context changes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOutcome {
    pub test_results: Vec<TestResult>,
    pub console_logs: Vec<String>,
    /// Name or id of the request to run next
    pub next_request: Option<String>,
}

impl ScriptOutcome {
    pub fn merge(&mut self, other: ScriptOutcome) {
        self.test_results.extend(other.test_results);
        self.console_logs.extend(other.console_logs);
        if other.next_request.is_some() {
            self.next_request = other.next_request;
        }
    }
}

#[async_trait]
pub trait ScriptEvaluator: Send + Sync {
    async fn run_pre_script(
        &self,
        script: &str,
        request: &mut Request,
        context: &mut ResolvingContext,
    ) -> Result<ScriptOutcome>;

    async fn run_post_script(
        &self,
        script: &str,
        request: &Request,
        response: &ResponseData,
        context: &mut ResolvingContext,
    ) -> Result<ScriptOutcome>;
}

/// Evaluator that runs nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScriptEvaluator;

#[async_trait]
impl ScriptEvaluator for NoopScriptEvaluator {
    async fn run_pre_script(
        &self,
        _script: &str,
        _request: &mut Request,
        _context: &mut ResolvingContext,
    ) -> Result<ScriptOutcome> {
        Ok(ScriptOutcome::default())
    }

    async fn run_post_script(
        &self,
        _script: &str,
        _request: &Request,
        _response: &ResponseData,
        _context: &mut ResolvingContext,
    ) -> Result<ScriptOutcome> {
        Ok(ScriptOutcome::default())
    }
}
