//! `spotdeploy deploy` - the full deployment job.
//!
//! allocate → readiness → cleanup → context → ports → logging → build →
//! deploy → routing, run as one tracked job under the workspace lock.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use spotdeploy_common::{JobMetadata, Stage, StageResult};
use tracing::Instrument;

use super::WorkspaceArgs;
use crate::app::{Adapters, AppContext};
use crate::application::ports::{JobStatusSink, StageObserver};
use crate::application::services::deploy::{self, DeployOptions};
use crate::application::services::job::{JobStageObserver, run_job};
use crate::application::services::vm::lifecycle::{self, AllocateOptions};
use crate::domain::identity::WorkspaceIdentity;
use crate::output::json;

#[derive(Args)]
pub struct DeployArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,
    /// Project directory containing the compose file
    #[arg(long, default_value = ".")]
    pub project: PathBuf,
    /// Env file forwarded to compose build and up
    #[arg(long)]
    pub env_file: Option<PathBuf>,
    /// VM size if a new VM is created
    #[arg(long)]
    pub size: Option<String>,
    /// Delete any existing VM and create a fresh one first
    #[arg(long)]
    pub force_recreate: bool,
    /// Job id reported to the job log (default: derived from the project and time)
    #[arg(long)]
    pub job_id: Option<String>,
}

/// Prints each stage in human mode and forwards it to the job log.
struct ProgressObserver<'a, S: JobStatusSink> {
    app: &'a AppContext,
    job: JobStageObserver<'a, S>,
}

impl<S: JobStatusSink> StageObserver for ProgressObserver<'_, S> {
    async fn stage(&self, result: &StageResult) {
        if !self.app.is_json() {
            self.app.renderer().render_stage(result);
        }
        self.job.stage(result).await;
    }
}

fn default_job_id(id: &WorkspaceIdentity) -> String {
    format!(
        "{}-{}",
        id.project_name(),
        chrono::Utc::now().format("%Y%m%d%H%M%S")
    )
}

/// Run `spotdeploy deploy`. Exits non-zero when the job fails.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded or the result cannot
/// be printed. Job failures are reported, not returned.
pub async fn run(app: &AppContext, args: &DeployArgs) -> Result<ExitCode> {
    let a = app.adapters()?;
    let id = args.workspace.identity();
    let job_id = args.job_id.clone().unwrap_or_else(|| default_job_id(&id));

    let _guard = a.locks.lock(&id, &app.cancel).await?;
    let observer = ProgressObserver {
        app,
        job: JobStageObserver {
            sink: &a.jobs,
            job_id: &job_id,
        },
    };
    let span = tracing::info_span!("job", job = %job_id, tenant = %id.tenant, workspace = %id.workspace);
    let metadata = run_job(&a.jobs, &job_id, deploy_job(app, a, &id, args, &observer))
        .instrument(span)
        .await;

    if app.is_json() {
        json::print(&metadata)?;
    } else {
        app.renderer().render_job(&metadata);
    }
    Ok(if metadata.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn deploy_job(
    app: &AppContext,
    a: &Adapters,
    id: &WorkspaceIdentity,
    args: &DeployArgs,
    observer: &impl StageObserver,
) -> Result<JobMetadata> {
    let reporter = app.reporter();
    let allocated = lifecycle::allocate_or_reuse(
        &a.cloud,
        &a.secrets,
        &a.store,
        AllocateOptions {
            config: &a.config,
            id,
            size: args.size.as_deref(),
            ssh_key: None,
            force_recreate: args.force_recreate,
            cancel: &app.cancel,
            reporter: &reporter,
        },
    )
    .await;
    let vm = match allocated {
        Ok(vm) => vm,
        Err(e) => {
            observer
                .stage(&StageResult::failed(Stage::Allocate, "failed to allocate VM", format!("{e:#}")))
                .await;
            return Err(e);
        }
    };
    observer
        .stage(
            &StageResult::succeeded(Stage::Allocate, format!("{} at {}", vm.vm_name, vm.private_ip))
                .with_metadata("vm_name", vm.vm_name.clone()),
        )
        .await;

    if let Err(e) = lifecycle::wait_ready(&a.cloud, &a.config, id, &app.cancel).await {
        observer
            .stage(&StageResult::failed(Stage::Readiness, "VM not ready", e.to_string()))
            .await;
        return Err(e.into());
    }
    observer
        .stage(&StageResult::succeeded(Stage::Readiness, "VM ready"))
        .await;

    let outcome = deploy::deploy(
        &a.store,
        &a.runtime,
        &a.known_hosts,
        &a.ports,
        &a.builds,
        &a.files,
        &a.routes,
        DeployOptions {
            config: &a.config,
            id,
            project_path: &args.project,
            env_file: args.env_file.as_deref(),
            cancel: &app.cancel,
            observer,
        },
    )
    .await?;
    Ok(JobMetadata::Deployed {
        project_name: outcome.project_name,
        private_ip: outcome.private_ip,
        urls: outcome.urls,
    })
}
