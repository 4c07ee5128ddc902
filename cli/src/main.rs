//! spotdeploy - deploy compose projects onto per-workspace spot VMs

use std::process::ExitCode;

use clap::Parser;
use spotdeploy_cli::cli::Cli;
use spotdeploy_cli::commands::error_code;
use spotdeploy_cli::output::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = if cli.quiet { "warn" } else { "info" };
    // stderr, so --json output on stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let as_json = cli.json;
    match cli.run().await {
        Ok(code) => code,
        Err(e) => {
            let message = format!("{e:#}");
            match json::format_error(&message, error_code(&e)) {
                Ok(object) if as_json => println!("{object}"),
                _ => eprintln!("Error: {message}"),
            }
            ExitCode::FAILURE
        }
    }
}
