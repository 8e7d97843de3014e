use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use reqflow::cli::{self, Cli, Command, LogFormat};
use reqflow::status::ExitStatus;

fn init_tracing(format: LogFormat, verbose: u8) {
    let default = match verbose {
        0 => "reqflow=info",
        1 => "reqflow=debug",
        _ => "reqflow=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn execute(cli: Cli) -> anyhow::Result<ExitStatus> {
    match cli.command {
        Command::Run(args) => {
            let report = cli::run_collection(&args)
                .await
                .with_context(|| format!("failed to run {}", args.collection.display()))?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", cli::format_report(&report));
            }
            Ok(ExitStatus::from_run_status(report.status))
        }
    }
}

#[tokio::main]
async fn main() -> ExitStatus {
    let cli = Cli::parse();
    init_tracing(cli.log_format, cli.verbose);

    match execute(cli).await {
        Ok(status) => status,
        Err(e) => {
            eprintln!("reqflow: {:#}", e);
            ExitStatus::Error
        }
    }
}
