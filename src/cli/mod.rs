//! CLI argument parsing and processing

pub mod args;
pub mod process;

pub use args::{Cli, Command, LogFormat, RunArgs, SecretString};
pub use process::{format_report, run_collection};
