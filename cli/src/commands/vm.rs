//! `spotdeploy vm` - workspace VM lifecycle.

use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;

use super::{WorkspaceArgs, emit};
use crate::app::AppContext;
use crate::application::services::vm::lifecycle::{self, AllocateOptions};
use crate::domain::error::VmError;

#[derive(Subcommand)]
pub enum VmCommand {
    /// Return a running VM for the workspace, creating or starting one
    Allocate(AllocateArgs),
    /// Show the workspace's VM
    Info(WorkspaceArgs),
    /// Check whether the VM has finished bootstrapping
    Ready(ReadyArgs),
    /// Deallocate the VM (preserves its disk)
    Stop(WorkspaceArgs),
    /// Delete the VM and its disk and NIC
    Delete(WorkspaceArgs),
    /// Restart a VM found stopped or evicted
    Recover(WorkspaceArgs),
}

#[derive(Args)]
pub struct AllocateArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,
    /// VM size for a new VM (default: configured size)
    #[arg(long)]
    pub size: Option<String>,
    /// Delete any existing VM and create a fresh one
    #[arg(long)]
    pub force_recreate: bool,
    /// Also wait until the VM is ready for deployments
    #[arg(long)]
    pub wait: bool,
}

#[derive(Args)]
pub struct ReadyArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,
    /// Poll until ready or the configured attempts run out
    #[arg(long)]
    pub wait: bool,
}

#[derive(Serialize)]
struct Readiness<'a> {
    vm_name: &'a str,
    ready: bool,
}

#[derive(Serialize)]
struct Removal<'a> {
    vm_name: &'a str,
    changed: bool,
}

/// Run a `spotdeploy vm` subcommand.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded or the cloud call
/// fails.
pub async fn run(app: &AppContext, cmd: VmCommand) -> Result<ExitCode> {
    let a = app.adapters()?;
    match cmd {
        VmCommand::Allocate(args) => {
            let id = args.workspace.identity();
            let _guard = a.locks.lock(&id, &app.cancel).await?;
            let reporter = app.reporter();
            let vm = lifecycle::allocate_or_reuse(
                &a.cloud,
                &a.secrets,
                &a.store,
                AllocateOptions {
                    config: &a.config,
                    id: &id,
                    size: args.size.as_deref(),
                    ssh_key: None,
                    force_recreate: args.force_recreate,
                    cancel: &app.cancel,
                    reporter: &reporter,
                },
            )
            .await?;
            if args.wait {
                lifecycle::wait_ready(&a.cloud, &a.config, &id, &app.cancel).await?;
            }
            emit(app, &vm, |r| r.render_allocation(&vm))?;
        }
        VmCommand::Info(args) => {
            let info = lifecycle::info(&a.cloud, &a.config, &args.identity()).await?;
            emit(app, &info, |r| r.render_vm_info(&info))?;
        }
        VmCommand::Ready(args) => {
            let id = args.workspace.identity();
            let vm_name = id.vm_name();
            let ready = if args.wait {
                match lifecycle::wait_ready(&a.cloud, &a.config, &id, &app.cancel).await {
                    Ok(()) => true,
                    Err(VmError::NotReady { .. }) => false,
                    Err(e) => return Err(e.into()),
                }
            } else {
                lifecycle::is_ready(&a.cloud, &vm_name).await?
            };
            let view = Readiness {
                vm_name: &vm_name,
                ready,
            };
            emit(app, &view, |r| r.render_ready(&vm_name, ready))?;
            if !ready {
                return Ok(ExitCode::FAILURE);
            }
        }
        VmCommand::Stop(args) => {
            let id = args.identity();
            let _guard = a.locks.lock(&id, &app.cancel).await?;
            let vm_name = id.vm_name();
            let stopped = lifecycle::stop(&a.cloud, &a.store, &id).await?;
            let view = Removal {
                vm_name: &vm_name,
                changed: stopped,
            };
            emit(app, &view, |_| {
                if stopped {
                    app.output.success(&format!("{vm_name} deallocated. Its disk is preserved."));
                } else {
                    app.output.info(&format!("No VM to stop ({vm_name})."));
                }
            })?;
        }
        VmCommand::Delete(args) => {
            let id = args.identity();
            let _guard = a.locks.lock(&id, &app.cancel).await?;
            let vm_name = id.vm_name();
            let deleted = lifecycle::delete(&a.cloud, &a.store, &a.config, &id).await?;
            let view = Removal {
                vm_name: &vm_name,
                changed: deleted,
            };
            emit(app, &view, |_| {
                if deleted {
                    app.output.success(&format!("{vm_name} deleted"));
                } else {
                    app.output.info(&format!("No VM to delete ({vm_name})."));
                }
            })?;
        }
        VmCommand::Recover(args) => {
            let id = args.identity();
            let _guard = a.locks.lock(&id, &app.cancel).await?;
            let outcome = lifecycle::recover(&a.cloud, &a.store, &a.config, &id, &app.cancel).await?;
            emit(app, &outcome, |r| r.render_recovery(&id.vm_name(), &outcome))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
