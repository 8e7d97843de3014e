//! CLI argument definitions using clap

use std::fmt;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// A string that redacts its value in Debug output
#[derive(Clone, Default)]
pub struct SecretString(pub String);

impl SecretString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "SecretString(\"\")")
        } else {
            write!(f, "SecretString(\"[REDACTED]\")")
        }
    }
}

impl std::str::FromStr for SecretString {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(SecretString(s.to_string()))
    }
}

/// Log format for diagnostics on stderr
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    /// JSON lines
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "reqflow", version, about = "Run request collections with variable resolution, auth injection and script-driven flow")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Diagnostic log format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run every request of a collection
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Collection file (YAML or JSON)
    pub collection: PathBuf,

    /// Environment file (YAML) with variables, globals and systems
    #[arg(long)]
    pub env: Option<PathBuf>,

    /// Environment id backing ENV placeholders; defaults to the env file's id
    #[arg(long)]
    pub environment: Option<String>,

    /// Config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Run id; a random one is generated when omitted
    #[arg(long)]
    pub run_id: Option<String>,

    /// Iteration variable, repeatable
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    /// Secret for encrypted values, overrides the config file
    #[arg(long, env = "REQFLOW_ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: Option<SecretString>,

    /// Print the full run report as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_var(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim().to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{}'", s)),
    }
}
