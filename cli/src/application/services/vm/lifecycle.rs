//! Workspace VM lifecycle: allocate-or-reuse, readiness, eviction
//! recovery, stop and delete.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use anyhow::{Context, Result};
use serde::Serialize;
use spotdeploy_common::{OrchestratorConfig, VmAllocation, VmRecord, VmStatus};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{pause, provisioner};
use crate::application::ports::{
    CloudProvisioner, CloudRunCommand, CloudVm, ProgressReporter, SecretsResolver, WorkspaceStore,
};
use crate::domain::bootstrap;
use crate::domain::error::VmError;
use crate::domain::identity::WorkspaceIdentity;

/// Inputs to [`allocate_or_reuse`].
pub struct AllocateOptions<'a, P: ProgressReporter> {
    pub config: &'a OrchestratorConfig,
    pub id: &'a WorkspaceIdentity,
    /// VM size for a new VM (default: configured size).
    pub size: Option<&'a str>,
    /// Public key for a new VM (default: secrets store).
    pub ssh_key: Option<&'a str>,
    /// Delete any existing VM and create a fresh one.
    pub force_recreate: bool,
    pub cancel: &'a CancellationToken,
    pub reporter: &'a P,
}

/// Return a running VM for the workspace, creating or starting one as needed.
///
/// - absent: create
/// - running: reuse, clean runtime state
/// - stopped/deallocated/evicted: start, clean runtime state
/// - existing with `force_recreate`: delete, wait the grace period, create
///
/// If starting an existing VM fails, it is deleted and recreated. This
/// fallback happens at most once per call. The persisted VM record is
/// refreshed on every successful call.
///
/// # Errors
///
/// Returns a [`VmError`] (wrapped) for cloud failures, or a persistence error.
pub async fn allocate_or_reuse(
    cloud: &impl CloudProvisioner,
    secrets: &impl SecretsResolver,
    store: &impl WorkspaceStore,
    opts: AllocateOptions<'_, impl ProgressReporter>,
) -> Result<VmAllocation> {
    let span = tracing::info_span!(
        "allocate",
        tenant = %opts.id.tenant,
        workspace = %opts.id.workspace,
        vm = %opts.id.vm_name()
    );
    allocate(cloud, secrets, store, opts).instrument(span).await
}

async fn allocate(
    cloud: &impl CloudProvisioner,
    secrets: &impl SecretsResolver,
    store: &impl WorkspaceStore,
    opts: AllocateOptions<'_, impl ProgressReporter>,
) -> Result<VmAllocation> {
    let AllocateOptions {
        config,
        id,
        size,
        ssh_key,
        force_recreate,
        cancel,
        reporter,
    } = opts;
    let name = id.vm_name();

    if let Some(existing) = provisioner::get_details(cloud, config, &name).await? {
        if force_recreate {
            tracing::info!(status = %existing.status, "force recreating VM");
            reporter.step(&format!("Recreating {name}..."));
            delete_then_grace(cloud, config, &name, cancel).await?;
        } else if let Some(record) = reuse(cloud, config, &name, existing, cancel, reporter).await? {
            store
                .save_vm_record(id, &record)
                .await
                .context("persisting VM record")?;
            cleanup_runtime_state(cloud, &name).await;
            reporter.success(&format!("{name} ready at {}", record.private_ip));
            return Ok(VmAllocation::from(&record));
        } else {
            delete_then_grace(cloud, config, &name, cancel).await?;
        }
    }

    reporter.step(&format!("Creating {name}..."));
    let size = size.unwrap_or(&config.default_vm_size);
    let record = provisioner::create(cloud, secrets, config, &name, size, ssh_key, cancel).await?;
    store
        .save_vm_record(id, &record)
        .await
        .context("persisting VM record")?;
    reporter.success(&format!("{name} created at {}", record.private_ip));
    Ok(VmAllocation::from(&record))
}

/// Bring an existing VM to `running`. `None` means it could not be started
/// and must be recreated.
async fn reuse(
    cloud: &impl CloudProvisioner,
    config: &OrchestratorConfig,
    name: &str,
    existing: VmRecord,
    cancel: &CancellationToken,
    reporter: &impl ProgressReporter,
) -> Result<Option<VmRecord>, VmError> {
    match existing.status {
        VmStatus::Running => {
            tracing::info!("reusing running VM");
            return Ok(Some(existing));
        }
        VmStatus::Provisioning => {
            tracing::info!("VM is still provisioning, waiting");
            provisioner::wait_for_running(cloud, config, name, cancel).await?;
        }
        status => {
            tracing::info!(%status, "VM exists but is not running, starting");
            reporter.step(&format!("Starting {name}..."));
            match provisioner::start(cloud, config, name, cancel).await {
                Ok(()) => {}
                Err(VmError::Cancelled) => return Err(VmError::Cancelled),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to start existing VM, recreating");
                    reporter.warn(&format!("Could not start {name}, recreating it"));
                    return Ok(None);
                }
            }
        }
    }
    provisioner::get_details(cloud, config, name)
        .await?
        .map(Some)
        .ok_or_else(|| VmError::NotFound(name.to_string()))
}

async fn delete_then_grace(
    cloud: &impl CloudProvisioner,
    config: &OrchestratorConfig,
    name: &str,
    cancel: &CancellationToken,
) -> Result<(), VmError> {
    provisioner::delete(cloud, config, name).await?;
    tracing::info!(secs = config.recreate_grace_secs, "waiting for deletion to settle");
    pause(config.recreate_grace(), cancel).await
}

/// Remove all containers and unused runtime data from a reused VM.
/// Best-effort.
async fn cleanup_runtime_state(cloud: &impl CloudRunCommand, name: &str) {
    tracing::info!("cleaning runtime state on reused VM");
    if provisioner::run_command(cloud, name, bootstrap::REUSE_CLEANUP_SCRIPT)
        .await
        .is_none()
    {
        tracing::warn!("runtime cleanup did not complete, continuing");
    }
}

/// Whether first boot has finished and the container runtime answers.
///
/// # Errors
///
/// Returns [`VmError::NotFound`] when the VM does not exist.
pub async fn is_ready(cloud: &(impl CloudVm + CloudRunCommand), name: &str) -> Result<bool, VmError> {
    match provisioner::get_status(cloud, name).await? {
        None => return Err(VmError::NotFound(name.to_string())),
        Some(VmStatus::Running) => {}
        Some(status) => {
            tracing::debug!(vm = %name, %status, "VM not running");
            return Ok(false);
        }
    }
    let init = provisioner::run_command(cloud, name, bootstrap::CLOUD_INIT_STATUS).await;
    if !init.as_deref().is_some_and(bootstrap::cloud_init_done) {
        tracing::debug!(vm = %name, output = ?init, "cloud-init not finished");
        return Ok(false);
    }
    let docker = provisioner::run_command(cloud, name, bootstrap::DOCKER_VERSION).await;
    if !docker.as_deref().is_some_and(bootstrap::docker_available) {
        tracing::warn!(vm = %name, output = ?docker, "cloud-init done but runtime not available");
        return Ok(false);
    }
    Ok(true)
}

/// Poll [`is_ready`] with the configured attempts and interval. A failed
/// status lookup counts as "not ready yet".
///
/// # Errors
///
/// Returns [`VmError::NotReady`] once attempts are exhausted. The VM is left
/// as-is.
pub async fn wait_ready(
    cloud: &(impl CloudVm + CloudRunCommand),
    config: &OrchestratorConfig,
    id: &WorkspaceIdentity,
    cancel: &CancellationToken,
) -> Result<(), VmError> {
    let name = id.vm_name();
    for attempt in 1..=config.readiness_attempts {
        match is_ready(cloud, &name).await {
            Ok(true) => {
                tracing::info!(vm = %name, attempt, "VM ready");
                return Ok(());
            }
            Ok(false) => {}
            Err(VmError::InfoUnavailable { reason, .. }) => {
                tracing::warn!(vm = %name, attempt, %reason, "VM status unavailable, retrying");
            }
            Err(e) => return Err(e),
        }
        tracing::info!(vm = %name, attempt, max = config.readiness_attempts, "VM not ready yet");
        if attempt < config.readiness_attempts {
            pause(config.readiness_interval(), cancel).await?;
        }
    }
    Err(VmError::NotReady {
        name,
        attempts: config.readiness_attempts,
    })
}

/// Result of [`recover`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// Running; nothing to do.
    Healthy,
    /// Was stopped or evicted and has been restarted.
    Recovered { private_ip: String },
    /// Restart failed; the VM needs recreating.
    RestartFailed { reason: String },
    NotAllocated,
    /// A state recovery does not handle, e.g. still provisioning.
    Unknown { status: VmStatus },
}

/// Restart a VM found stopped or evicted.
///
/// # Errors
///
/// Returns an error if the cloud cannot be inspected or the record cannot be
/// saved.
pub async fn recover(
    cloud: &impl CloudProvisioner,
    store: &impl WorkspaceStore,
    config: &OrchestratorConfig,
    id: &WorkspaceIdentity,
    cancel: &CancellationToken,
) -> Result<RecoveryOutcome> {
    let name = id.vm_name();
    let Some(record) = provisioner::get_details(cloud, config, &name).await? else {
        return Ok(RecoveryOutcome::NotAllocated);
    };
    match record.status {
        VmStatus::Running => Ok(RecoveryOutcome::Healthy),
        status if status.is_startable() => {
            tracing::warn!(vm = %name, %status, "VM appears evicted or stopped, restarting");
            match provisioner::start(cloud, config, &name, cancel).await {
                Ok(()) => {
                    let refreshed = provisioner::get_details(cloud, config, &name)
                        .await?
                        .ok_or_else(|| VmError::NotFound(name.clone()))?;
                    store
                        .save_vm_record(id, &refreshed)
                        .await
                        .context("persisting VM record")?;
                    Ok(RecoveryOutcome::Recovered {
                        private_ip: refreshed.private_ip,
                    })
                }
                Err(VmError::Cancelled) => Err(VmError::Cancelled.into()),
                Err(e) => {
                    tracing::warn!(vm = %name, error = %e, "restart failed, VM needs recreating");
                    Ok(RecoveryOutcome::RestartFailed {
                        reason: e.to_string(),
                    })
                }
            }
        }
        status => Ok(RecoveryOutcome::Unknown { status }),
    }
}

/// Allocation summary for a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmInfo {
    pub allocated: bool,
    pub vm_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<VmStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// # Errors
///
/// Returns [`VmError::InfoUnavailable`] if the cloud cannot be queried.
pub async fn info(
    cloud: &impl CloudProvisioner,
    config: &OrchestratorConfig,
    id: &WorkspaceIdentity,
) -> Result<VmInfo, VmError> {
    let vm_name = id.vm_name();
    Ok(match provisioner::get_details(cloud, config, &vm_name).await? {
        None => VmInfo {
            allocated: false,
            vm_name,
            status: None,
            private_ip: None,
            size: None,
            location: None,
        },
        Some(record) => VmInfo {
            allocated: true,
            vm_name,
            status: Some(record.status),
            private_ip: Some(record.private_ip),
            size: Some(record.size),
            location: Some(record.location),
        },
    })
}

/// Deallocate the workspace VM. Returns `false` when there is none.
///
/// # Errors
///
/// Returns an error if the cloud call fails.
pub async fn stop(
    cloud: &impl CloudProvisioner,
    store: &impl WorkspaceStore,
    id: &WorkspaceIdentity,
) -> Result<bool> {
    let stopped = provisioner::stop(cloud, &id.vm_name()).await?;
    if stopped {
        if let Some(mut record) = store.vm_record(id).await? {
            record.status = VmStatus::Deallocated;
            store
                .save_vm_record(id, &record)
                .await
                .context("persisting VM record")?;
        }
    }
    Ok(stopped)
}

/// Delete the workspace VM and forget its record. Returns `false` when
/// there was no VM.
///
/// # Errors
///
/// Returns an error if the VM cannot be deleted.
pub async fn delete(
    cloud: &impl CloudProvisioner,
    store: &impl WorkspaceStore,
    config: &OrchestratorConfig,
    id: &WorkspaceIdentity,
) -> Result<bool> {
    let deleted = provisioner::delete(cloud, config, &id.vm_name()).await?;
    store
        .clear_vm_record(id)
        .await
        .context("clearing VM record")?;
    Ok(deleted)
}
