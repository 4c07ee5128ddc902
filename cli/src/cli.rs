//! CLI argument parsing with clap derive

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::app::{AppContext, AppFlags, OutputFlags};
use crate::commands;

/// Deploy compose projects onto per-workspace spot VMs
#[derive(Parser)]
#[command(
    name = "spotdeploy",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Configuration file (default: $SPOTDEPLOY_CONFIG, then SPOTDEPLOY_* variables)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the VM, context and project names derived for a workspace
    Names(commands::WorkspaceArgs),

    /// Manage the workspace VM
    #[command(subcommand)]
    Vm(commands::vm::VmCommand),

    /// Manage the workspace's remote execution context
    #[command(subcommand)]
    Context(commands::context::ContextCommand),

    /// Allocate a VM if needed, then build and run a compose project on it
    Deploy(commands::deploy::DeployArgs),

    /// Manage the deployment's routing file
    #[command(subcommand)]
    Routes(commands::routes::RoutesCommand),

    /// Stop the deployment, remove its routes and context
    Teardown(commands::teardown::TeardownArgs),
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn run(self) -> Result<ExitCode> {
        let Cli {
            json,
            quiet,
            no_color,
            config,
            command,
        } = self;
        let app = AppContext::new(AppFlags {
            output: OutputFlags {
                no_color,
                quiet,
                json,
            },
            config,
        });
        app.cancel_on_ctrl_c();

        match command {
            Command::Names(args) => commands::names::run(&app, &args),
            Command::Vm(cmd) => commands::vm::run(&app, cmd).await,
            Command::Context(cmd) => commands::context::run(&app, cmd).await,
            Command::Deploy(args) => commands::deploy::run(&app, &args).await,
            Command::Routes(cmd) => commands::routes::run(&app, cmd).await,
            Command::Teardown(args) => commands::teardown::run(&app, &args).await,
        }
    }
}
