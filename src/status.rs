//! Exit status codes for the CLI
//!
//! - 0: the run passed
//! - 1: the run finished with at least one failed request
//! - 2: the run could not be started (bad config, unreadable collection, ...)

use std::process::{ExitCode, Termination};

use crate::models::result::StepStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    Success = 0,
    RunFailed = 1,
    Error = 2,
}

impl ExitStatus {
    pub fn from_run_status(status: StepStatus) -> Self {
        match status {
            StepStatus::Passed | StepStatus::Skipped => ExitStatus::Success,
            StepStatus::Failed | StepStatus::Pending => ExitStatus::RunFailed,
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status as u8)
    }
}

impl Termination for ExitStatus {
    fn report(self) -> ExitCode {
        ExitCode::from(self as u8)
    }
}
