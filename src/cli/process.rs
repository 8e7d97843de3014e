//! Execute parsed CLI commands

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, info};

use super::args::RunArgs;
use crate::config::EngineConfig;
use crate::context::{ResolvingContext, Scope};
use crate::engine::{CollectionRunner, Engine, InMemoryRunStateStore, RunOptions, RunReport};
use crate::environment::{EnvironmentFile, InMemoryEnvironmentStore};
use crate::errors::Result;
use crate::models::collection::Collection;
use crate::models::result::StepStatus;

/// Load everything `args` points at and run the collection once
pub async fn run_collection(args: &RunArgs) -> Result<RunReport> {
    let mut config = EngineConfig::load(args.config.as_deref())?;
    if let Some(key) = &args.encryption_key {
        config.encryption_key = Some(key.as_str().to_string());
    }

    let collection = Collection::load(&args.collection)?;
    debug!(collection = %collection.name, leaves = collection.leaves().len(), "collection loaded");

    let environments = Arc::new(InMemoryEnvironmentStore::new());
    let mut context = ResolvingContext::new();
    if let Some(path) = &args.env {
        let env = EnvironmentFile::load(path)?;
        info!(environment = %env.id, systems = env.systems.len(), "environment loaded");
        context.globals.extend(env.globals);
        context.environment.extend(env.variables);
        context.environment_id = Some(env.id.clone());
        environments.insert(env.id, env.systems);
    }
    if let Some(id) = &args.environment {
        context.environment_id = Some(id.clone());
    }
    for (name, value) in &args.vars {
        context.set(Scope::Iteration, name.clone(), value.clone());
    }

    let engine = Engine::builder(config.clone()).environments(environments).build()?;
    let runner = CollectionRunner::new(
        Arc::new(engine.session()),
        Arc::new(InMemoryRunStateStore::new()),
        &config,
    );

    let run_id = args
        .run_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
    runner
        .run(&collection, RunOptions::new(run_id).purge_state(true), context)
        .await
}

/// Human-readable run summary
pub fn format_report(report: &RunReport) -> String {
    let mut out = String::new();
    for step in &report.steps {
        let r = &step.result;
        let marker = match r.status {
            StepStatus::Passed => "PASS",
            StepStatus::Failed => "FAIL",
            StepStatus::Skipped => "SKIP",
            StepStatus::Pending => "....",
        };
        let code = r.status_code.map(|c| c.to_string()).unwrap_or_else(|| "-".into());
        let replay = if step.replay { " (replay)" } else { "" };
        let _ = writeln!(out, "  [{}] {} {} {}ms{}", marker, r.request_name, code, r.duration_ms, replay);

        for test in r.test_results.iter().filter(|t| !t.passed) {
            let _ = writeln!(
                out,
                "         x {}: {}",
                test.name,
                test.message.as_deref().unwrap_or("failed")
            );
        }
        if let Some(err) = &r.error {
            let _ = writeln!(out, "         ! {:?}: {}", err.kind, err.message);
        }
    }

    let (passed, failed, skipped) = report.counts();
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Run {}: {} ({} passed, {} failed, {} skipped, {}ms)",
        report.run_id, report.status, passed, failed, skipped, report.duration_ms
    );
    if let Some(directive) = &report.pending_directive {
        let _ = writeln!(out, "  next-request directive '{}' was never reached", directive);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{NodeStatus, StepRecord};
    use crate::models::request::Request;
    use crate::models::result::{ExecutionResult, TestResult};

    #[test]
    fn test_format_report() {
        let ok = Request::new("List users", "GET", "http://x");
        let bad = Request::new("Create user", "POST", "http://x");

        let mut passed = ExecutionResult::for_request(&ok, ResolvingContext::new());
        passed.status_code = Some(200);
        passed.duration_ms = 12;
        let mut failed = ExecutionResult::for_request(&bad, ResolvingContext::new());
        failed.status_code = Some(500);
        failed.test_results.push(TestResult::fail("status is 201", "got 500"));

        let node = |r: &ExecutionResult| NodeStatus {
            id: r.request_id.clone(),
            name: r.request_name.clone(),
            status: r.status,
        };
        let (passed, failed) = (passed.settle(), failed.settle());
        let report = RunReport {
            run_id: "r1".into(),
            status: StepStatus::Failed,
            requests: vec![node(&passed), node(&failed)],
            folders: Vec::new(),
            steps: vec![
                StepRecord {
                    position: 0,
                    replay: false,
                    result: passed,
                },
                StepRecord {
                    position: 1,
                    replay: true,
                    result: failed,
                },
            ],
            ledger: Vec::new(),
            pending_directive: Some("Cleanup".into()),
            context: ResolvingContext::new(),
            duration_ms: 40,
        };

        let text = format_report(&report);
        assert!(text.contains("[PASS] List users 200 12ms"));
        assert!(text.contains("[FAIL] Create user 500"));
        assert!(text.contains("(replay)"));
        assert!(text.contains("x status is 201: got 500"));
        assert!(text.contains("Run r1: FAILED (1 passed, 1 failed, 0 skipped, 40ms)"));
        assert!(text.contains("'Cleanup' was never reached"));
    }
}
