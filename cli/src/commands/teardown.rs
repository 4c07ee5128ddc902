//! `spotdeploy teardown` - stop a deployment and release what it holds.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use super::{WorkspaceArgs, emit};
use crate::app::AppContext;
use crate::application::services::teardown::teardown;

#[derive(Args)]
pub struct TeardownArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,
    /// Also delete the VM and forget its record
    #[arg(long)]
    pub delete_vm: bool,
}

/// Run `spotdeploy teardown`.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded or the VM cannot be
/// deleted. Other steps only produce warnings.
pub async fn run(app: &AppContext, args: &TeardownArgs) -> Result<ExitCode> {
    let a = app.adapters()?;
    let id = args.workspace.identity();
    let _guard = a.locks.lock(&id, &app.cancel).await?;
    let report = teardown(
        &a.cloud,
        &a.store,
        &a.runtime,
        &a.routes,
        &a.config,
        &id,
        args.delete_vm,
    )
    .await?;
    emit(app, &report, |r| r.render_teardown(&report))?;
    Ok(ExitCode::SUCCESS)
}
