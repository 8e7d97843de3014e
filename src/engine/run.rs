//! Collection runs
//!
//! A run walks the request leaves of a collection depth-first on a single
//! task. Post-scripts can redirect the walk with a next-request directive:
//! a forward target skips every leaf until it is reached, a target already
//! in the ledger replays the ledger from that entry onward.
//!
//! The run's stripe lock is held only around reads and writes of its state,
//! never across an HTTP exchange.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::state::{LedgerEntry, RunStateStore};
use super::step::StepExecutor;
use crate::config::{EngineConfig, LedgerPolicy};
use crate::context::{ResolvingContext, Scope};
use crate::errors::Result;
use crate::locks::StripedLocks;
use crate::models::collection::{Collection, NodeId};
use crate::models::request::Request;
use crate::models::result::{ExecutionResult, StepStatus};

/// A finished (or skipped) leaf, as handed to listeners
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEvent {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub position: usize,
    pub result: ExecutionResult,
}

/// Receives every step result as soon as it is available
#[async_trait]
pub trait StepListener: Send + Sync {
    async fn on_step_complete(&self, event: StepEvent);
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub run_id: String,
    /// Delivery session the step events belong to
    pub session_id: Option<String>,
    /// Drop the run state once the walk finishes
    pub purge_state: bool,
}

impl RunOptions {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn purge_state(mut self, purge: bool) -> Self {
        self.purge_state = purge;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub position: usize,
    pub replay: bool,
    pub result: ExecutionResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: String,
    pub name: String,
    pub status: StepStatus,
}

/// Outcome of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: StepStatus,
    /// Every leaf invocation in chronological order
    pub steps: Vec<StepRecord>,
    /// Final status per request, depth-first
    pub requests: Vec<NodeStatus>,
    /// Aggregated status per folder, root first
    pub folders: Vec<NodeStatus>,
    pub ledger: Vec<LedgerEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_directive: Option<String>,
    pub context: ResolvingContext,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.status == StepStatus::Passed
    }

    pub fn request_status(&self, name_or_id: &str) -> Option<StepStatus> {
        self.requests
            .iter()
            .find(|n| n.name == name_or_id || n.id == name_or_id)
            .map(|n| n.status)
    }

    pub fn folder_status(&self, name: &str) -> Option<StepStatus> {
        self.folders.iter().find(|n| n.name == name).map(|n| n.status)
    }

    /// Names of the executed requests, in invocation order
    pub fn executed(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.result.status != StepStatus::Skipped)
            .map(|s| s.result.request_name.as_str())
            .collect()
    }

    /// (passed, failed, skipped) over final request statuses
    pub fn counts(&self) -> (usize, usize, usize) {
        self.requests.iter().fold((0, 0, 0), |(p, f, s), n| match n.status {
            StepStatus::Passed => (p + 1, f, s),
            StepStatus::Failed => (p, f + 1, s),
            _ => (p, f, s + 1),
        })
    }
}

/// Status of a leaf visited more than once
fn combine_visits(a: StepStatus, b: StepStatus) -> StepStatus {
    use StepStatus::*;
    match (a, b) {
        (Failed, _) | (_, Failed) => Failed,
        (Passed, _) | (_, Passed) => Passed,
        (Skipped, _) | (_, Skipped) => Skipped,
        _ => Pending,
    }
}

/// Scope-wise merge of a step's context into the run context
fn merge_context(into: &mut ResolvingContext, from: &ResolvingContext) {
    for scope in Scope::PRECEDENCE {
        let target = into.scope_mut(scope);
        for (k, v) in from.scope(scope) {
            target.insert(k.clone(), v.clone());
        }
    }
}

/// Mutable state of one walk
struct Walk<'a> {
    collection: &'a Collection,
    leaves: Vec<NodeId>,
    options: &'a RunOptions,
    context: ResolvingContext,
    steps: Vec<StepRecord>,
    statuses: HashMap<NodeId, StepStatus>,
}

pub struct CollectionRunner {
    executor: Arc<dyn StepExecutor>,
    state: Arc<dyn RunStateStore>,
    locks: Arc<StripedLocks>,
    listener: Option<Arc<dyn StepListener>>,
    max_executions: u32,
    ledger_policy: LedgerPolicy,
}

impl CollectionRunner {
    pub fn new(executor: Arc<dyn StepExecutor>, state: Arc<dyn RunStateStore>, config: &EngineConfig) -> Self {
        Self {
            executor,
            state,
            locks: Arc::new(StripedLocks::default()),
            listener: None,
            max_executions: config.max_request_executions,
            ledger_policy: config.ledger_policy,
        }
    }

    /// Share a lock pool with other runners
    pub fn with_locks(mut self, locks: Arc<StripedLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn StepListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Walk `collection` to completion.
    ///
    /// Leaf failures are recorded on the report; only run-state store
    /// failures end the walk early.
    pub async fn run(&self, collection: &Collection, options: RunOptions, context: ResolvingContext) -> Result<RunReport> {
        let run_id = options.run_id.as_str();
        let started = Instant::now();

        let mut context = context;
        for (k, v) in &collection.variables {
            context.collection.entry(k.clone()).or_insert_with(|| v.clone());
        }

        let mut walk = Walk {
            collection,
            leaves: collection.leaves(),
            options: &options,
            context,
            steps: Vec::new(),
            statuses: HashMap::new(),
        };
        info!(run_id, collection = %collection.name, leaves = walk.leaves.len(), "run started");

        for position in 0..walk.leaves.len() {
            let node = walk.leaves[position];
            self.visit(&mut walk, node, position, false).await?;

            while let Some(entry) = self.next_replay(run_id).await? {
                let Some(&node) = walk.leaves.get(entry.order) else {
                    warn!(run_id, request = %entry.name, "ledger entry outside the tree, skipping replay");
                    continue;
                };
                let matches = collection
                    .node(node)?
                    .as_request()
                    .is_some_and(|r| r.id == entry.request_id);
                if !matches {
                    warn!(run_id, request = %entry.name, "ledger entry no longer matches the tree, skipping replay");
                    continue;
                }
                self.visit(&mut walk, node, entry.order, true).await?;
            }
        }

        let ledger = self.state.ledger(run_id).await?;
        let pending_directive = self.state.directive(run_id).await?;
        if let Some(directive) = &pending_directive {
            warn!(run_id, directive = %directive, "next-request directive never matched");
        }
        if options.purge_state {
            let _guard = self.locks.acquire(run_id).await;
            self.state.purge(run_id).await?;
        }

        let report = self.report(walk, ledger, pending_directive, started)?;
        let (passed, failed, skipped) = report.counts();
        info!(run_id, status = %report.status, passed, failed, skipped, duration_ms = report.duration_ms, "run finished");
        Ok(report)
    }

    async fn visit(&self, walk: &mut Walk<'_>, node: NodeId, position: usize, replay: bool) -> Result<()> {
        let (collection, options) = (walk.collection, walk.options);
        let run_id = options.run_id.as_str();
        let Some(request) = collection.node(node)?.as_request() else {
            return Ok(());
        };

        if !self.admit(run_id, request).await? {
            return self.skip(walk, node, request, position, replay).await;
        }

        let result = match collection.effective_auth(node) {
            Ok(auth) => {
                let mut request = request.clone();
                request.auth = auth;
                self.executor.execute_step(&request, &walk.context).await
            }
            Err(e) => {
                warn!(run_id, request = %request.name, error = %e, "authorization inheritance failed");
                ExecutionResult::for_request(request, walk.context.clone()).fail_with(&e)
            }
        };

        self.settle(run_id, request, position, result.next_request.as_deref()).await?;
        merge_context(&mut walk.context, &result.context);

        self.record(walk, node, position, replay, result).await;
        Ok(())
    }

    async fn next_replay(&self, run_id: &str) -> Result<Option<LedgerEntry>> {
        let _guard = self.locks.acquire(run_id).await;
        self.state.pop_replay(run_id).await
    }

    /// Directive and execution-guard checks; false means the leaf is skipped
    async fn admit(&self, run_id: &str, request: &Request) -> Result<bool> {
        let _guard = self.locks.acquire(run_id).await;
        if let Some(directive) = self.state.directive(run_id).await? {
            if !request.matches(&directive) {
                debug!(run_id, request = %request.name, directive = %directive, "skipped by directive");
                return Ok(false);
            }
            self.state.clear_directive(run_id).await?;
            debug!(run_id, request = %request.name, "directive matched");
        }

        let count = self.state.execution_count(run_id, &request.id).await?;
        if count >= self.max_executions {
            warn!(run_id, request = %request.name, count, "execution limit reached");
            self.state.clear_directive(run_id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Ledger, counter and directive updates after an execution
    async fn settle(&self, run_id: &str, request: &Request, position: usize, next: Option<&str>) -> Result<()> {
        let _guard = self.locks.acquire(run_id).await;
        self.state.append_ledger(run_id, ledger_entry(request, position)).await?;
        self.state.increment_execution(run_id, &request.id).await?;

        if let Some(next) = next {
            self.state.set_directive(run_id, next).await?;
            if let Some(target) = self.state.find_ledger_entry(run_id, next).await? {
                if target.order <= position {
                    let queued = self.state.rebuild_replay_queue(run_id, target.order).await?;
                    info!(run_id, from = %target.name, queued, "replaying ledger");
                }
            }
        }
        Ok(())
    }

    async fn skip(&self, walk: &mut Walk<'_>, node: NodeId, request: &Request, position: usize, replay: bool) -> Result<()> {
        if self.ledger_policy == LedgerPolicy::IncludeSkipped {
            let run_id = walk.options.run_id.as_str();
            let _guard = self.locks.acquire(run_id).await;
            self.state.append_ledger(run_id, ledger_entry(request, position)).await?;
        }
        let result = ExecutionResult::skipped(request, walk.context.clone());
        self.record(walk, node, position, replay, result).await;
        Ok(())
    }

    async fn record(&self, walk: &mut Walk<'_>, node: NodeId, position: usize, replay: bool, result: ExecutionResult) {
        let status = walk
            .statuses
            .get(&node)
            .map_or(result.status, |prev| combine_visits(*prev, result.status));
        walk.statuses.insert(node, status);

        if let Some(listener) = &self.listener {
            listener
                .on_step_complete(StepEvent {
                    run_id: walk.options.run_id.clone(),
                    session_id: walk.options.session_id.clone(),
                    position,
                    result: result.clone(),
                })
                .await;
        }
        walk.steps.push(StepRecord { position, replay, result });
    }

    fn report(
        &self,
        walk: Walk<'_>,
        ledger: Vec<LedgerEntry>,
        pending_directive: Option<String>,
        started: Instant,
    ) -> Result<RunReport> {
        let collection = walk.collection;

        let mut requests = Vec::with_capacity(walk.leaves.len());
        for id in &walk.leaves {
            let node = collection.node(*id)?;
            requests.push(NodeStatus {
                id: node.id().to_string(),
                name: node.name().to_string(),
                status: walk.statuses.get(id).copied().unwrap_or_default(),
            });
        }

        // Folders in pre-order; aggregating in reverse sees children first
        let mut folder_ids = Vec::new();
        let mut stack = vec![collection.root()];
        while let Some(id) = stack.pop() {
            if collection.node(id)?.is_folder() {
                folder_ids.push(id);
                stack.extend(collection.children(id).iter().rev().copied());
            }
        }
        let mut statuses = walk.statuses;
        for id in folder_ids.iter().rev() {
            let status = StepStatus::aggregate(
                collection
                    .children(*id)
                    .iter()
                    .map(|c| statuses.get(c).copied().unwrap_or_default()),
            );
            statuses.insert(*id, status);
        }

        let mut folders = Vec::with_capacity(folder_ids.len());
        for id in &folder_ids {
            let node = collection.node(*id)?;
            folders.push(NodeStatus {
                id: node.id().to_string(),
                name: node.name().to_string(),
                status: statuses[id],
            });
        }

        Ok(RunReport {
            run_id: walk.options.run_id.clone(),
            status: statuses.get(&collection.root()).copied().unwrap_or(StepStatus::Passed),
            steps: walk.steps,
            requests,
            folders,
            ledger,
            pending_directive,
            context: walk.context,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn ledger_entry(request: &Request, position: usize) -> LedgerEntry {
    LedgerEntry {
        request_id: request.id.clone(),
        name: request.name.clone(),
        order: position,
    }
}
