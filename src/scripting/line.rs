//! Line-oriented script language
//!
//! One command per line; blank lines and lines starting with `#` are
//! ignored.
//!
//! | Command | Phase | Effect |
//! |---------|-------|--------|
//! | `log <text>` | both | append to console logs |
//! | `set <scope> <name> <value>` | both | set a context variable |
//! | `fail <message>` | both | abort the script |
//! | `header <name> <value>` | pre | add or replace a live request header |
//! | `next <name-or-id>` | post | request to execute next |
//! | `expect status <code>` | post | test the status code |
//! | `expect header <name>` | post | test that a response header exists |
//! | `expect body contains <text>` | post | test the response body |
//! | `capture <scope> <name> <json-pointer>` | post | copy a JSON value into the context |

use async_trait::async_trait;
use tracing::debug;

use super::{ScriptEvaluator, ScriptOutcome};
use crate::context::{ResolvingContext, Scope};
use crate::errors::{ReqflowError, Result, ScriptErrorKind, ScriptPhase};
use crate::http::ResponseData;
use crate::models::request::{KeyValue, Request};
use crate::models::result::TestResult;

#[derive(Debug, Default, Clone, Copy)]
pub struct LineScriptEvaluator;

enum Target<'a> {
    Pre(&'a mut Request),
    Post(&'a ResponseData),
}

impl Target<'_> {
    fn phase(&self) -> ScriptPhase {
        match self {
            Target::Pre(_) => ScriptPhase::Pre,
            Target::Post(_) => ScriptPhase::Post,
        }
    }
}

fn runtime(phase: ScriptPhase, line_no: usize, message: impl std::fmt::Display) -> ReqflowError {
    ReqflowError::script(phase, ScriptErrorKind::Runtime, format!("line {}: {}", line_no, message))
}

/// Split off the first whitespace-delimited word
fn word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim_start()),
        None => (s, ""),
    }
}

fn run(script: &str, mut target: Target<'_>, context: &mut ResolvingContext) -> Result<ScriptOutcome> {
    let phase = target.phase();
    let mut outcome = ScriptOutcome::default();

    for (idx, raw) in script.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (command, rest) = word(line);
        match (command, &mut target) {
            ("log", _) => outcome.console_logs.push(rest.to_string()),
            ("fail", _) => return Err(runtime(phase, line_no, rest)),
            ("set", _) => {
                let (scope, rest) = word(rest);
                let (name, value) = word(rest);
                if name.is_empty() {
                    return Err(runtime(phase, line_no, "usage: set <scope> <name> <value>"));
                }
                let scope: Scope = scope.parse().map_err(|e| runtime(phase, line_no, e))?;
                context.set(scope, name, value);
            }
            ("header", Target::Pre(request)) => {
                let (name, value) = word(rest);
                if name.is_empty() {
                    return Err(runtime(phase, line_no, "usage: header <name> <value>"));
                }
                request.headers.retain(|h| !h.key.eq_ignore_ascii_case(name));
                request.headers.push(KeyValue::new(name, value));
            }
            ("next", Target::Post(_)) => {
                if rest.is_empty() {
                    return Err(runtime(phase, line_no, "usage: next <name-or-id>"));
                }
                outcome.next_request = Some(rest.to_string());
            }
            ("expect", Target::Post(response)) => {
                outcome.test_results.push(expect(rest, response).map_err(|e| runtime(phase, line_no, e))?);
            }
            ("capture", Target::Post(response)) => {
                let (scope, rest) = word(rest);
                let (name, pointer) = word(rest);
                let scope: Scope = scope.parse().map_err(|e| runtime(phase, line_no, e))?;
                let json = response
                    .json()
                    .ok_or_else(|| runtime(phase, line_no, "response body is not JSON"))?;
                let value = json
                    .pointer(pointer)
                    .ok_or_else(|| runtime(phase, line_no, format!("no value at '{}'", pointer)))?;
                let value = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                context.set(scope, name, value);
            }
            (other, _) => {
                return Err(runtime(
                    phase,
                    line_no,
                    format!("unknown command '{}' in {}", other, phase),
                ))
            }
        }
    }

    Ok(outcome)
}

fn expect(args: &str, response: &ResponseData) -> std::result::Result<TestResult, String> {
    let (what, rest) = word(args);
    match what {
        "status" => {
            let expected: u16 = rest
                .trim()
                .parse()
                .map_err(|_| format!("invalid status code '{}'", rest))?;
            let name = format!("status is {}", expected);
            Ok(if response.status_code == expected {
                TestResult::pass(name)
            } else {
                TestResult::fail(name, format!("got {}", response.status_code))
            })
        }
        "header" => {
            let name = format!("header {} present", rest);
            Ok(if response.header(rest).is_some() {
                TestResult::pass(name)
            } else {
                TestResult::fail(name, "header missing")
            })
        }
        "body" => {
            let (op, needle) = word(rest);
            if op != "contains" {
                return Err(format!("unknown body assertion '{}'", op));
            }
            let name = format!("body contains {}", needle);
            let body = String::from_utf8_lossy(&response.body);
            Ok(if body.contains(needle) {
                TestResult::pass(name)
            } else {
                TestResult::fail(name, "text not found")
            })
        }
        other => Err(format!("unknown expectation '{}'", other)),
    }
}

#[async_trait]
impl ScriptEvaluator for LineScriptEvaluator {
    async fn run_pre_script(
        &self,
        script: &str,
        request: &mut Request,
        context: &mut ResolvingContext,
    ) -> Result<ScriptOutcome> {
        debug!(request = %request.name, "running pre-script");
        run(script, Target::Pre(request), context)
    }

    async fn run_post_script(
        &self,
        script: &str,
        request: &Request,
        response: &ResponseData,
        context: &mut ResolvingContext,
    ) -> Result<ScriptOutcome> {
        debug!(request = %request.name, "running post-script");
        run(script, Target::Post(response), context)
    }
}
