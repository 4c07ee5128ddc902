//! `spotdeploy context` - remote execution contexts.

use std::process::ExitCode;

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;

use super::{WorkspaceArgs, emit};
use crate::app::AppContext;
use crate::application::services::context::{ensure_context, remove_context};

#[derive(Subcommand)]
pub enum ContextCommand {
    /// Point the workspace's context at its VM
    Ensure(WorkspaceArgs),
    /// Remove the workspace's context
    Remove(WorkspaceArgs),
}

#[derive(Serialize)]
struct Removal<'a> {
    context_name: &'a str,
    removed: bool,
}

/// Run a `spotdeploy context` subcommand.
///
/// # Errors
///
/// Returns an error if no VM is recorded for the workspace or the context
/// cannot be created.
pub async fn run(app: &AppContext, cmd: ContextCommand) -> Result<ExitCode> {
    let a = app.adapters()?;
    match cmd {
        ContextCommand::Ensure(args) => {
            let bound = ensure_context(
                &a.store,
                &a.runtime,
                &a.known_hosts,
                &a.config.admin_username,
                &args.identity(),
            )
            .await?;
            emit(app, &bound, |r| r.render_context(&bound))?;
        }
        ContextCommand::Remove(args) => {
            let id = args.identity();
            let context_name = id.context_name();
            let removed = remove_context(&a.runtime, &id).await?;
            let view = Removal {
                context_name: &context_name,
                removed,
            };
            emit(app, &view, |_| {
                if removed {
                    app.output.success(&format!("context {context_name} removed"));
                } else {
                    app.output.info(&format!("No context to remove ({context_name})."));
                }
            })?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
