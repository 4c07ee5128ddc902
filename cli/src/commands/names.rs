//! `spotdeploy names` - print the names derived for a workspace.

use std::process::ExitCode;

use anyhow::Result;

use super::{WorkspaceArgs, emit};
use crate::app::AppContext;

/// Run `spotdeploy names`. Needs no configuration.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn run(app: &AppContext, args: &WorkspaceArgs) -> Result<ExitCode> {
    let names = args.identity().names();
    emit(app, &names, |r| r.render_names(&names))?;
    Ok(ExitCode::SUCCESS)
}
