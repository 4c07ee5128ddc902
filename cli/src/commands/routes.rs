//! `spotdeploy routes` - publish and withdraw a deployment's routing file
//! without running the pipeline.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use spotdeploy_common::ServicePorts;

use super::{WorkspaceArgs, emit};
use crate::app::AppContext;
use crate::application::ports::WorkspaceStore;
use crate::application::services::deploy::resolve_ports;
use crate::application::services::routing::{PublishOutcome, Unpublished, publish, unpublish};

#[derive(Subcommand)]
pub enum RoutesCommand {
    /// Write the routing file for the workspace's deployment
    Generate(GenerateArgs),
    /// Delete the routing file for the workspace's deployment
    Remove(WorkspaceArgs),
}

#[derive(Args)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,
    /// Backend address (default: the recorded VM's private IP)
    #[arg(long)]
    pub ip: Option<String>,
    /// Exposed port as SERVICE=PORT; repeat for several
    #[arg(long = "port", value_name = "SERVICE=PORT", value_parser = parse_service_port)]
    pub ports: Vec<(String, u16)>,
    /// Read exposed ports from this project's compose file instead
    #[arg(long, conflicts_with = "ports")]
    pub project: Option<PathBuf>,
}

fn parse_service_port(s: &str) -> Result<(String, u16), String> {
    let (service, port) = s
        .split_once('=')
        .ok_or_else(|| format!("expected SERVICE=PORT, got {s:?}"))?;
    if service.is_empty() {
        return Err(format!("missing service name in {s:?}"));
    }
    let port = port
        .parse::<u16>()
        .map_err(|e| format!("invalid port in {s:?}: {e}"))?;
    Ok((service.to_string(), port))
}

fn collect_ports(pairs: &[(String, u16)]) -> ServicePorts {
    let mut ports = ServicePorts::new();
    for (service, port) in pairs {
        let list = ports.entry(service.clone()).or_default();
        if !list.contains(port) {
            list.push(*port);
        }
    }
    ports
}

/// Run a `spotdeploy routes` subcommand. A routing file owned by another
/// workspace is left alone and the command exits non-zero.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded, no ports or address
/// can be determined, or the routing file cannot be written.
pub async fn run(app: &AppContext, cmd: RoutesCommand) -> Result<ExitCode> {
    let a = app.adapters()?;
    let outcome_ok = match cmd {
        RoutesCommand::Generate(args) => {
            let id = args.workspace.identity();
            let ports = match &args.project {
                Some(project) => resolve_ports(&a.files, &a.ports, project).await?.2,
                None => collect_ports(&args.ports),
            };
            anyhow::ensure!(!ports.is_empty(), "no ports given; pass --port SERVICE=PORT or --project");
            let ip = match args.ip {
                Some(ip) => ip,
                None => {
                    a.store
                        .vm_record(&id)
                        .await?
                        .with_context(|| format!("no VM recorded for {id}; pass --ip"))?
                        .private_ip
                }
            };
            let outcome = publish(&a.routes, &a.config.base_domain, &id, &ip, &ports).await?;
            emit(app, &outcome, |r| match &outcome {
                PublishOutcome::Published { entries, removed } => r.render_routes(entries, removed),
                PublishOutcome::Refused { owner } => {
                    app.output.error(&format!("routing file belongs to {owner}, not replaced"));
                }
            })?;
            matches!(outcome, PublishOutcome::Published { .. })
        }
        RoutesCommand::Remove(args) => {
            let outcome = unpublish(&a.routes, &args.identity()).await?;
            emit(app, &outcome, |_| match &outcome {
                Unpublished::Removed => app.output.success("routes removed"),
                Unpublished::Absent => app.output.info("No routes to remove."),
                Unpublished::Refused { owner } => {
                    app.output.error(&format!("routing file belongs to {owner}, not removed"));
                }
            })?;
            !matches!(outcome, Unpublished::Refused { .. })
        }
    };
    Ok(if outcome_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
