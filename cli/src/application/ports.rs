//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain` and the shared types crate,
//! never from `crate::infra`, `crate::commands`, or `crate::output`.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use anyhow::Result;
use spotdeploy_common::{JobUpdate, ServicePorts, StageResult, VmRecord};

use crate::domain::error::FailureClass;
use crate::domain::identity::WorkspaceIdentity;

// ── Value Types ───────────────────────────────────────────────────────────────

/// Parameters for creating a spot VM.
pub struct VmSpec<'a> {
    pub name: &'a str,
    pub size: &'a str,
    pub admin_username: &'a str,
    pub ssh_public_key: &'a str,
    /// NIC the VM is attached to.
    pub nic_name: &'a str,
    /// Cloud-init user data.
    pub custom_data: &'a str,
}

/// A compose project on a remote context.
pub struct ComposeProject<'a> {
    pub context: &'a str,
    /// Omitted for commands that only need the project name (e.g. `down`).
    pub file: Option<&'a Path>,
    pub name: &'a str,
    pub env_file: Option<&'a Path>,
}

// ── Cloud Port Traits ─────────────────────────────────────────────────────────

/// VM control-plane calls. Outputs carry the cloud CLI's JSON on stdout.
#[allow(async_fn_in_trait)]
pub trait CloudVm {
    /// Full VM resource document.
    async fn show(&self, name: &str) -> Result<Output>;
    /// Instance view including power-state statuses.
    async fn instance_view(&self, name: &str) -> Result<Output>;
    async fn create(&self, spec: &VmSpec<'_>) -> Result<Output>;
    async fn start(&self, name: &str) -> Result<Output>;
    /// Stop and release compute (deallocate).
    async fn deallocate(&self, name: &str) -> Result<Output>;
    async fn delete(&self, name: &str) -> Result<Output>;
}

/// Network and disk calls.
#[allow(async_fn_in_trait)]
pub trait CloudNetwork {
    /// The configured subnet, including its address prefix.
    async fn subnet(&self) -> Result<Output>;
    async fn create_nic(&self, nic_name: &str, subnet_id: &str, private_ip: &str) -> Result<Output>;
    async fn show_nic(&self, nic_name: &str) -> Result<Output>;
    async fn delete_nic(&self, nic_name: &str) -> Result<Output>;
    async fn delete_disk(&self, disk_name: &str) -> Result<Output>;
}

/// Out-of-band command execution through the cloud agent.
#[allow(async_fn_in_trait)]
pub trait CloudRunCommand {
    async fn run_shell(&self, name: &str, script: &str) -> Result<Output>;
}

/// Composite trait: any type implementing the three cloud sub-traits.
pub trait CloudProvisioner: CloudVm + CloudNetwork + CloudRunCommand {}

impl<T> CloudProvisioner for T where T: CloudVm + CloudNetwork + CloudRunCommand {}

/// Resolves secrets that are not part of the configuration file.
#[allow(async_fn_in_trait)]
pub trait SecretsResolver {
    /// Public key installed for the admin user on new VMs.
    async fn ssh_public_key(&self) -> Result<String>;
}

// ── Container Runtime Ports ───────────────────────────────────────────────────

/// Named remote runtime endpoints.
#[allow(async_fn_in_trait)]
pub trait ContextStore {
    async fn inspect_context(&self, name: &str) -> Result<Output>;
    async fn create_context(&self, name: &str, host: &str, description: &str) -> Result<Output>;
    async fn remove_context(&self, name: &str) -> Result<Output>;
}

/// Compose and plain runtime commands against a context.
#[allow(async_fn_in_trait)]
pub trait ComposeRunner {
    /// `compose [-f <file>] -p <name> [--env-file <path>] <args>` on the project's context.
    async fn compose(
        &self,
        project: &ComposeProject<'_>,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Output>;
    /// A plain runtime command on `context`.
    async fn docker(&self, context: &str, args: &[&str]) -> Result<Output>;
}

/// Composite trait: contexts plus compose.
pub trait ContainerRuntime: ContextStore + ComposeRunner {}

impl<T> ContainerRuntime for T where T: ContextStore + ComposeRunner {}

/// SSH host-key store.
#[allow(async_fn_in_trait)]
pub trait KnownHosts {
    /// Drop every entry for `host`. Returns how many were removed.
    async fn purge(&self, host: &str) -> Result<usize>;
}

// ── Classification Ports ──────────────────────────────────────────────────────

/// Decides which compose services and ports are reachable from outside.
#[allow(async_fn_in_trait)]
pub trait PortClassifier {
    async fn classify(&self, compose: &serde_yaml::Value) -> Result<ServicePorts>;
}

/// Attributes a build failure to the platform or to the project.
#[allow(async_fn_in_trait)]
pub trait BuildFailureClassifier {
    async fn classify(&self, build_output: &str) -> Result<FailureClass>;
}

// ── Persistence Ports ─────────────────────────────────────────────────────────

/// Workspace persistence. Lookups are case-insensitive on the workspace.
#[allow(async_fn_in_trait)]
pub trait WorkspaceStore {
    async fn vm_record(&self, id: &WorkspaceIdentity) -> Result<Option<VmRecord>>;
    async fn save_vm_record(&self, id: &WorkspaceIdentity, record: &VmRecord) -> Result<()>;
    async fn clear_vm_record(&self, id: &WorkspaceIdentity) -> Result<()>;
}

/// Receives job progress.
#[allow(async_fn_in_trait)]
pub trait JobStatusSink {
    async fn update(&self, update: &JobUpdate) -> Result<()>;
}

/// Routing files, one per deployment.
#[allow(async_fn_in_trait)]
pub trait RouteStore {
    async fn read(&self, deployment: &str) -> Result<Option<String>>;
    /// Replace the deployment's file atomically.
    async fn write(&self, deployment: &str, contents: &str) -> Result<()>;
    /// Returns `false` when there was nothing to remove.
    async fn remove(&self, deployment: &str) -> Result<bool>;
}

/// Project directory access.
#[allow(async_fn_in_trait)]
pub trait ProjectFiles {
    async fn locate_compose(&self, project: &Path) -> Result<Option<PathBuf>>;
    async fn read(&self, path: &Path) -> Result<String>;
    async fn write(&self, path: &Path, contents: &str) -> Result<()>;
}

// ── Progress Reporting Ports ──────────────────────────────────────────────────

/// Receives each pipeline stage result as it is produced.
#[allow(async_fn_in_trait)]
pub trait StageObserver {
    async fn stage(&self, result: &StageResult);
}

/// Abstracts progress reporting so services can emit events without
/// depending on the Presentation layer. Sync trait, no async needed.
pub trait ProgressReporter {
    /// Emit an in-progress step message.
    fn step(&self, message: &str);
    /// Emit a success message.
    fn success(&self, message: &str);
    /// Emit a warning message.
    fn warn(&self, message: &str);
}

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Abstracts process execution so infrastructure can be swapped or mocked.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run a program and capture its output.
    ///
    /// Implementations should delegate to `run_with_timeout` using the
    /// instance's configured default timeout.
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output>;
    /// Run a program with a custom timeout override.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or exceeds `timeout`.
    /// On timeout, the child process must be killed (not left orphaned).
    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Output>;
}
