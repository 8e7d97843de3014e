//! Execution results

use serde::{Deserialize, Serialize};

use crate::context::ResolvingContext;
use crate::errors::{ReqflowError, StepError};
use crate::models::request::{KeyValue, Request};

/// Outcome of one leaf invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    #[default]
    Pending,
    Skipped,
    Passed,
    Failed,
}

impl StepStatus {
    /// Folder aggregation: passed iff every child passed or was skipped
    pub fn aggregate<I: IntoIterator<Item = StepStatus>>(children: I) -> StepStatus {
        let all_ok = children
            .into_iter()
            .all(|s| matches!(s, StepStatus::Passed | StepStatus::Skipped));
        if all_ok {
            StepStatus::Passed
        } else {
            StepStatus::Failed
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Skipped => "SKIPPED",
            StepStatus::Passed => "PASSED",
            StepStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Detected response body type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyType {
    #[default]
    Empty,
    Json,
    Xml,
    Html,
    Text,
    Binary,
}

/// A single script assertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TestResult {
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: None,
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: Some(message.into()),
        }
    }
}

/// Cookie captured from a `Set-Cookie` header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

/// Result of executing (or skipping) one request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub request_id: String,
    pub request_name: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<KeyValue>,
    /// Text body; binary bodies are base64 encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub body_type: BodyType,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<CookieRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub test_results: Vec<TestResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub console_logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    /// Context after the step's scripts ran
    pub context: ResolvingContext,
    /// Redacted copy of the request as sent, for history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_request: Option<Request>,
    /// Next-request directive emitted by the post-script
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_request: Option<String>,
    pub request_bytes: u64,
    pub response_bytes: u64,
}

impl ExecutionResult {
    pub fn for_request(request: &Request, context: ResolvingContext) -> Self {
        Self {
            request_id: request.id.clone(),
            request_name: request.name.clone(),
            context,
            ..Default::default()
        }
    }

    pub fn skipped(request: &Request, context: ResolvingContext) -> Self {
        Self {
            status: StepStatus::Skipped,
            ..Self::for_request(request, context)
        }
    }

    /// Mark as failed with a tagged error
    pub fn fail_with(mut self, err: &ReqflowError) -> Self {
        self.status = StepStatus::Failed;
        self.error = Some(StepError::from(err));
        self
    }

    /// Final status from error state and test results
    pub fn settle(mut self) -> Self {
        let tests_ok = self.test_results.iter().all(|t| t.passed);
        self.status = if self.error.is_none() && tests_ok {
            StepStatus::Passed
        } else {
            StepStatus::Failed
        };
        self
    }

    pub fn passed(&self) -> bool {
        self.status == StepStatus::Passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorKind, SizeLimitKind};

    #[test]
    fn test_aggregate() {
        use StepStatus::*;
        assert_eq!(StepStatus::aggregate([Passed, Skipped]), Passed);
        assert_eq!(StepStatus::aggregate([Passed, Failed, Skipped]), Failed);
        assert_eq!(StepStatus::aggregate([]), Passed);
    }

    #[test]
    fn test_settle_with_failed_test() {
        let req = Request::new("r", "GET", "http://x");
        let mut result = ExecutionResult::for_request(&req, ResolvingContext::default());
        result.test_results.push(TestResult::pass("a"));
        result.test_results.push(TestResult::fail("b", "nope"));
        assert_eq!(result.settle().status, StepStatus::Failed);
    }

    #[test]
    fn test_fail_with_sets_tag() {
        let req = Request::new("r", "GET", "http://x");
        let err = ReqflowError::SizeLimitExceeded {
            kind: SizeLimitKind::Response,
            size: 10,
            limit: 5,
        };
        let result = ExecutionResult::for_request(&req, ResolvingContext::default()).fail_with(&err);
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error.unwrap().kind, ErrorKind::SizeLimitExceeded);
    }
}
