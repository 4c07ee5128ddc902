//! Command implementations

pub mod context;
pub mod deploy;
pub mod names;
pub mod routes;
pub mod teardown;
pub mod vm;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use spotdeploy_common::ConfigError;

use crate::app::AppContext;
use crate::domain::error::{ContextError, DeployError, VmError};
use crate::domain::identity::WorkspaceIdentity;
use crate::output::{HumanRenderer, json};

/// The workspace a command acts on.
#[derive(Args, Debug, Clone)]
pub struct WorkspaceArgs {
    /// Tenant (user) identifier
    pub tenant: String,
    /// Workspace name within the tenant
    pub workspace: String,
}

impl WorkspaceArgs {
    #[must_use]
    pub fn identity(&self) -> WorkspaceIdentity {
        WorkspaceIdentity::new(&self.tenant, &self.workspace)
    }
}

/// Print `value` as JSON in `--json` mode, otherwise hand it to `human`.
fn emit<T: Serialize>(app: &AppContext, value: &T, human: impl FnOnce(&HumanRenderer<'_>)) -> Result<()> {
    if app.is_json() {
        json::print(value)
    } else {
        human(&app.renderer());
        Ok(())
    }
}

/// Machine-readable code for the JSON error object.
#[must_use]
pub fn error_code(error: &anyhow::Error) -> &'static str {
    if error.downcast_ref::<ConfigError>().is_some() {
        return "config";
    }
    if let Some(e) = error.downcast_ref::<VmError>() {
        return match e {
            VmError::NotFound(_) => "not_found",
            VmError::Cancelled => "cancelled",
            _ => "vm",
        };
    }
    if error.downcast_ref::<ContextError>().is_some() {
        return "context";
    }
    if error.downcast_ref::<DeployError>().is_some() {
        return "deploy";
    }
    "error"
}
