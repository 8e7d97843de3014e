//! Single-request execution
//!
//! A step runs one request through the whole pipeline:
//!
//! 1. fetch the systems of the context's environment
//! 2. resolve every field once into live and history copies
//! 3. authorize both copies
//! 4. run the pre-script against the live copy
//! 5. build the entity, enforce size ceilings, send and capture the response
//! 6. run the post-script
//!
//! Every failure ends up on the returned [`ExecutionResult`]; nothing is
//! raised to the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::auth::{AuthorizationDispatcher, HttpTokenProvider, TokenProvider};
use crate::config::EngineConfig;
use crate::context::ResolvingContext;
use crate::crypto::{Encryptor, HmacEncryptor};
use crate::environment::{EnvironmentStore, InMemoryEnvironmentStore};
use crate::errors::Result;
use crate::http::HttpExecutor;
use crate::metrics::ByteMetrics;
use crate::models::request::Request;
use crate::models::result::{ExecutionResult, TestResult};
use crate::scripting::{LineScriptEvaluator, ScriptEvaluator};
use crate::template::{MacroEvaluator, MagicMacroEvaluator, TemplateRenderer, TeraRenderer, VariableResolver};

/// Executes one request against a context
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute_step(&self, request: &Request, context: &ResolvingContext) -> ExecutionResult;
}

/// The request execution engine and its collaborators
#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    environments: Arc<dyn EnvironmentStore>,
    evaluator: Arc<dyn MacroEvaluator>,
    encryptor: Arc<dyn Encryptor>,
    scripts: Arc<dyn ScriptEvaluator>,
    auth: Arc<AuthorizationDispatcher>,
    http: Arc<HttpExecutor>,
    metrics: Arc<ByteMetrics>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn encryptor(&self) -> Arc<dyn Encryptor> {
        self.encryptor.clone()
    }

    pub fn metrics(&self) -> Arc<ByteMetrics> {
        self.metrics.clone()
    }

    /// Same collaborators with an empty cookie jar, one per collection run
    pub fn session(&self) -> Engine {
        Engine {
            http: Arc::new(self.http.fresh()),
            ..self.clone()
        }
    }

    /// Variables handed to the body renderer, with secrets decrypted
    fn render_vars(&self, context: &ResolvingContext) -> Result<IndexMap<String, String>> {
        context
            .merged()
            .into_iter()
            .map(|(k, v)| Ok((k, self.encryptor.decrypt_all(&v)?)))
            .collect()
    }

    async fn run(&self, request: &Request, context: &mut ResolvingContext, result: &mut ExecutionResult) -> Result<()> {
        let systems = match &context.environment_id {
            Some(id) => self.environments.get_systems(id).await?,
            None => Vec::new(),
        };

        let resolver = VariableResolver::new(&systems, self.evaluator.as_ref(), self.encryptor.as_ref())
            .with_max_depth(self.config.max_resolve_depth);
        let resolved = resolver.resolve_request(request, context)?;
        let (mut live, mut history) = (resolved.live, resolved.history);

        self.auth.authorize(&mut live, &mut history).await?;
        result.history_request = Some(history);

        if let Some(script) = live.pre_script.clone().filter(|s| !s.trim().is_empty()) {
            let outcome = self.scripts.run_pre_script(&script, &mut live, context).await?;
            result.test_results.extend(outcome.test_results);
            result.console_logs.extend(outcome.console_logs);
        }

        let vars = self.render_vars(context)?;
        let exchange = self.http.execute(&live, &vars).await?;
        result.request_bytes = exchange.request_bytes;
        result.response_bytes = exchange.response_bytes;

        let response = exchange.response;
        result.status_code = Some(response.status_code);
        result.headers = response.headers.clone();
        result.body = response.body_text();
        result.body_type = response.body_type;
        result.cookies = response.cookies.clone();
        result.duration_ms = response.duration.as_millis() as u64;

        if let Some(script) = live.post_script.as_deref().filter(|s| !s.trim().is_empty()) {
            match self.scripts.run_post_script(script, &live, &response, context).await {
                Ok(outcome) => {
                    result.test_results.extend(outcome.test_results);
                    result.console_logs.extend(outcome.console_logs);
                    result.next_request = outcome.next_request;
                }
                Err(e) => {
                    warn!(request = %request.name, error = %e, "post-script failed");
                    result.test_results.push(TestResult::fail("post-script", e.to_string()));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StepExecutor for Engine {
    async fn execute_step(&self, request: &Request, context: &ResolvingContext) -> ExecutionResult {
        let started = Instant::now();
        let mut context = context.clone();
        let mut result = ExecutionResult::for_request(request, context.clone());

        let outcome = self.run(request, &mut context, &mut result).await;
        result.context = context;
        let mut result = match outcome {
            Ok(()) => result.settle(),
            Err(e) => {
                warn!(request = %request.name, kind = ?e.kind(), error = %e, "request failed");
                result.fail_with(&e)
            }
        };
        if result.duration_ms == 0 {
            result.duration_ms = started.elapsed().as_millis() as u64;
        }

        info!(
            request = %request.name,
            status = %result.status,
            code = ?result.status_code,
            duration_ms = result.duration_ms,
            "step finished"
        );
        result
    }
}

/// Assembles an [`Engine`], defaulting every collaborator not supplied
pub struct EngineBuilder {
    config: EngineConfig,
    environments: Option<Arc<dyn EnvironmentStore>>,
    evaluator: Option<Arc<dyn MacroEvaluator>>,
    encryptor: Option<Arc<dyn Encryptor>>,
    scripts: Option<Arc<dyn ScriptEvaluator>>,
    renderer: Option<Arc<dyn TemplateRenderer>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    metrics: Option<Arc<ByteMetrics>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            environments: None,
            evaluator: None,
            encryptor: None,
            scripts: None,
            renderer: None,
            token_provider: None,
            metrics: None,
        }
    }

    pub fn environments(mut self, store: Arc<dyn EnvironmentStore>) -> Self {
        self.environments = Some(store);
        self
    }

    pub fn macro_evaluator(mut self, evaluator: Arc<dyn MacroEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn encryptor(mut self, encryptor: Arc<dyn Encryptor>) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    pub fn script_evaluator(mut self, scripts: Arc<dyn ScriptEvaluator>) -> Self {
        self.scripts = Some(scripts);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn metrics(mut self, metrics: Arc<ByteMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;

        let encryptor: Arc<dyn Encryptor> = match (self.encryptor, &self.config.encryption_key) {
            (Some(e), _) => e,
            (None, Some(key)) => Arc::new(HmacEncryptor::new(key)),
            (None, None) => {
                debug!("no encryption key configured, using a process-local key");
                Arc::new(HmacEncryptor::random())
            }
        };
        let token_provider: Arc<dyn TokenProvider> = match self.token_provider {
            Some(p) => p,
            None => Arc::new(HttpTokenProvider::new(
                self.config.read_timeout.max(Duration::from_secs(1)),
            )?),
        };
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(ByteMetrics::new()));
        let renderer = self.renderer.unwrap_or_else(|| Arc::new(TeraRenderer));
        let http = HttpExecutor::new(&self.config, renderer, metrics.clone())?;

        Ok(Engine {
            environments: self
                .environments
                .unwrap_or_else(|| Arc::new(InMemoryEnvironmentStore::new())),
            evaluator: self.evaluator.unwrap_or_else(|| Arc::new(MagicMacroEvaluator)),
            encryptor,
            scripts: self.scripts.unwrap_or_else(|| Arc::new(LineScriptEvaluator)),
            auth: Arc::new(AuthorizationDispatcher::new(token_provider)),
            http: Arc::new(http),
            metrics,
            config: Arc::new(self.config),
        })
    }
}
