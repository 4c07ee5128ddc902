//! Shared test doubles for application service tests.
//!
//! `FakeCloud` answers the cloud port traits with the same JSON shapes the
//! `az` CLI produces and records every call. The remaining fakes cover the
//! persistence, runtime and classification ports.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Result;
use spotdeploy_common::{
    JobUpdate, OrchestratorConfig, ServicePorts, StageResult, VmRecord,
};

use crate::application::ports::{
    BuildFailureClassifier, CloudNetwork, CloudRunCommand, CloudVm, ComposeProject, ComposeRunner,
    ContextStore, JobStatusSink, KnownHosts, PortClassifier, ProgressReporter, ProjectFiles,
    RouteStore, SecretsResolver, StageObserver, VmSpec, WorkspaceStore,
};
use crate::domain::error::FailureClass;
use crate::domain::identity::WorkspaceIdentity;

/// Build an `ExitStatus` from a logical exit code.
#[cfg(unix)]
pub fn exit_status(code: i32) -> std::process::ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    std::process::ExitStatus::from_raw(code << 8)
}

#[cfg(windows)]
pub fn exit_status(code: i32) -> std::process::ExitStatus {
    use std::os::windows::process::ExitStatusExt;
    #[allow(clippy::cast_sign_loss)]
    std::process::ExitStatus::from_raw(code as u32)
}

pub fn ok_output(stdout: &[u8]) -> Output {
    Output {
        status: exit_status(0),
        stdout: stdout.to_vec(),
        stderr: Vec::new(),
    }
}

pub fn fail_output(stderr: &str) -> Output {
    Output {
        status: exit_status(1),
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

pub const NOT_FOUND_STDERR: &str =
    "ERROR: (ResourceNotFound) The Resource 'Microsoft.Compute/virtualMachines/x' was not found.";

/// Config with zero waits so polling loops finish immediately.
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        subscription_id: "sub".into(),
        resource_group: "rg".into(),
        vnet_name: "vnet".into(),
        subnet_name: "default".into(),
        base_domain: "apps.example.com".into(),
        poll_interval_secs: 0,
        running_timeout_secs: 0,
        recreate_grace_secs: 0,
        readiness_interval_secs: 0,
        readiness_attempts: 3,
        ..OrchestratorConfig::default()
    }
}

// ── Cloud ─────────────────────────────────────────────────────────────────────

pub struct FakeVm {
    pub power: String,
    pub nic: String,
    pub size: String,
    pub created: String,
}

pub struct FakeCloud {
    pub vms: Mutex<HashMap<String, FakeVm>>,
    pub nics: Mutex<HashMap<String, String>>,
    pub calls: Mutex<Vec<String>>,
    pub subnet_prefix: Mutex<String>,
    /// Stdout returned per script by `run_shell`.
    pub scripts: Mutex<HashMap<String, String>>,
    pub fail_start: AtomicBool,
    pub fail_info: AtomicBool,
    /// Number of upcoming status lookups that fail transiently.
    pub fail_info_polls: AtomicU32,
    pub fail_create: AtomicBool,
    pub fail_delete_disk: AtomicBool,
    pub fail_delete_nic: AtomicBool,
    /// Power state a VM reports right after `create` / `start`.
    pub power_after_boot: Mutex<String>,
    created_counter: AtomicU32,
}

impl Default for FakeCloud {
    fn default() -> Self {
        let scripts = HashMap::from([
            ("cloud-init status".to_string(), "status: done".to_string()),
            (
                "docker --version".to_string(),
                "Docker version 27.0.3, build 7d4bcd8".to_string(),
            ),
        ]);
        Self {
            vms: Mutex::new(HashMap::new()),
            nics: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            subnet_prefix: Mutex::new("10.0.0.0/24".to_string()),
            scripts: Mutex::new(scripts),
            fail_start: AtomicBool::new(false),
            fail_info: AtomicBool::new(false),
            fail_info_polls: AtomicU32::new(0),
            fail_create: AtomicBool::new(false),
            fail_delete_disk: AtomicBool::new(false),
            fail_delete_nic: AtomicBool::new(false),
            power_after_boot: Mutex::new("running".to_string()),
            created_counter: AtomicU32::new(0),
        }
    }
}

impl FakeCloud {
    /// A VM that already exists with the given power state and address.
    pub fn with_vm(self, name: &str, power: &str, ip: &str) -> Self {
        let nic = format!("{name}-nic");
        self.nics.lock().unwrap().insert(nic.clone(), ip.to_string());
        self.vms.lock().unwrap().insert(
            name.to_string(),
            FakeVm {
                power: power.to_string(),
                nic,
                size: "Standard_B2s".to_string(),
                created: "2023-06-01T00:00:00Z".to_string(),
            },
        );
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that change cloud state.
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| {
                ["create", "create_nic", "start", "deallocate", "delete", "delete_nic", "delete_disk"]
                    .iter()
                    .any(|m| c.split(' ').next() == Some(*m))
            })
            .collect()
    }

    pub fn power(&self, name: &str) -> Option<String> {
        self.vms.lock().unwrap().get(name).map(|v| v.power.clone())
    }

    pub fn set_power(&self, name: &str, power: &str) {
        if let Some(vm) = self.vms.lock().unwrap().get_mut(name) {
            vm.power = power.to_string();
        }
    }

    pub fn set_script(&self, script: &str, stdout: &str) {
        self.scripts
            .lock()
            .unwrap()
            .insert(script.to_string(), stdout.to_string());
    }

    fn info_fails(&self) -> bool {
        self.fail_info.load(Ordering::SeqCst)
            || self
                .fail_info_polls
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn json(value: &serde_json::Value) -> Output {
        ok_output(value.to_string().as_bytes())
    }
}

impl CloudVm for FakeCloud {
    async fn show(&self, name: &str) -> Result<Output> {
        self.record(format!("show {name}"));
        if self.info_fails() {
            return Ok(fail_output("ERROR: (TooManyRequests) throttled"));
        }
        let vms = self.vms.lock().unwrap();
        let Some(vm) = vms.get(name) else {
            return Ok(fail_output(NOT_FOUND_STDERR));
        };
        Ok(Self::json(&serde_json::json!({
            "id": format!("/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/{name}"),
            "location": "eastus",
            "hardwareProfile": { "vmSize": vm.size },
            "priority": "Spot",
            "timeCreated": vm.created,
            "networkProfile": { "networkInterfaces": [
                { "id": format!("/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/networkInterfaces/{}", vm.nic) }
            ]},
            "storageProfile": { "osDisk": { "name": format!("{name}_OsDisk") } },
        })))
    }

    async fn instance_view(&self, name: &str) -> Result<Output> {
        self.record(format!("instance_view {name}"));
        if self.info_fails() {
            return Ok(fail_output("ERROR: (TooManyRequests) throttled"));
        }
        let vms = self.vms.lock().unwrap();
        let Some(vm) = vms.get(name) else {
            return Ok(fail_output(NOT_FOUND_STDERR));
        };
        Ok(Self::json(&serde_json::json!({
            "instanceView": { "statuses": [
                { "code": "ProvisioningState/succeeded" },
                { "code": format!("PowerState/{}", vm.power) },
            ]}
        })))
    }

    async fn create(&self, spec: &VmSpec<'_>) -> Result<Output> {
        self.record(format!("create {}", spec.name));
        if self.fail_create.load(Ordering::SeqCst) {
            return Ok(fail_output("ERROR: (SkuNotAvailable) no spot capacity in eastus"));
        }
        let n = self.created_counter.fetch_add(1, Ordering::SeqCst);
        self.vms.lock().unwrap().insert(
            spec.name.to_string(),
            FakeVm {
                power: self.power_after_boot.lock().unwrap().clone(),
                nic: spec.nic_name.to_string(),
                size: spec.size.to_string(),
                created: format!("2024-01-01T00:00:{:02}Z", n + 1),
            },
        );
        Ok(ok_output(b"{}"))
    }

    async fn start(&self, name: &str) -> Result<Output> {
        self.record(format!("start {name}"));
        if self.fail_start.load(Ordering::SeqCst) {
            return Ok(fail_output("ERROR: (AllocationFailed) no spot capacity"));
        }
        let power = self.power_after_boot.lock().unwrap().clone();
        self.set_power(name, &power);
        Ok(ok_output(b""))
    }

    async fn deallocate(&self, name: &str) -> Result<Output> {
        self.record(format!("deallocate {name}"));
        self.set_power(name, "deallocated");
        Ok(ok_output(b""))
    }

    async fn delete(&self, name: &str) -> Result<Output> {
        self.record(format!("delete {name}"));
        self.vms.lock().unwrap().remove(name);
        Ok(ok_output(b""))
    }
}

impl CloudNetwork for FakeCloud {
    async fn subnet(&self) -> Result<Output> {
        self.record("subnet".to_string());
        Ok(Self::json(&serde_json::json!({
            "id": "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet/subnets/default",
            "addressPrefix": *self.subnet_prefix.lock().unwrap(),
        })))
    }

    async fn create_nic(&self, nic_name: &str, _subnet_id: &str, private_ip: &str) -> Result<Output> {
        self.record(format!("create_nic {nic_name} {private_ip}"));
        self.nics
            .lock()
            .unwrap()
            .insert(nic_name.to_string(), private_ip.to_string());
        Ok(ok_output(b"{}"))
    }

    async fn show_nic(&self, nic_name: &str) -> Result<Output> {
        self.record(format!("show_nic {nic_name}"));
        let nics = self.nics.lock().unwrap();
        let Some(ip) = nics.get(nic_name) else {
            return Ok(fail_output(NOT_FOUND_STDERR));
        };
        Ok(Self::json(&serde_json::json!({
            "ipConfigurations": [ { "privateIPAddress": ip } ]
        })))
    }

    async fn delete_nic(&self, nic_name: &str) -> Result<Output> {
        self.record(format!("delete_nic {nic_name}"));
        if self.fail_delete_nic.load(Ordering::SeqCst) {
            return Ok(fail_output("ERROR: (NicInUse) network interface is in use"));
        }
        self.nics.lock().unwrap().remove(nic_name);
        Ok(ok_output(b""))
    }

    async fn delete_disk(&self, disk_name: &str) -> Result<Output> {
        self.record(format!("delete_disk {disk_name}"));
        if self.fail_delete_disk.load(Ordering::SeqCst) {
            return Ok(fail_output("ERROR: (OperationNotAllowed) disk is attached"));
        }
        Ok(ok_output(b""))
    }
}

impl CloudRunCommand for FakeCloud {
    async fn run_shell(&self, name: &str, script: &str) -> Result<Output> {
        self.record(format!("run_shell {name} {script}"));
        let stdout = self
            .scripts
            .lock()
            .unwrap()
            .get(script)
            .cloned()
            .unwrap_or_default();
        Ok(Self::json(&serde_json::json!({
            "value": [ {
                "code": "ProvisioningState/succeeded",
                "message": format!("Enable succeeded: \n[stdout]\n{stdout}\n\n[stderr]\n"),
            } ]
        })))
    }
}

pub struct StaticSecrets(pub &'static str);

impl SecretsResolver for StaticSecrets {
    async fn ssh_public_key(&self) -> Result<String> {
        Ok(self.0.to_string())
    }
}

// ── Persistence ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    pub records: Mutex<HashMap<String, VmRecord>>,
    pub saves: AtomicU32,
}

impl MemoryStore {
    pub fn get(&self, id: &WorkspaceIdentity) -> Option<VmRecord> {
        self.records.lock().unwrap().get(&id.key()).cloned()
    }

    pub fn insert(&self, id: &WorkspaceIdentity, record: VmRecord) {
        self.records.lock().unwrap().insert(id.key(), record);
    }
}

impl WorkspaceStore for MemoryStore {
    async fn vm_record(&self, id: &WorkspaceIdentity) -> Result<Option<VmRecord>> {
        Ok(self.get(id))
    }

    async fn save_vm_record(&self, id: &WorkspaceIdentity, record: &VmRecord) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.insert(id, record.clone());
        Ok(())
    }

    async fn clear_vm_record(&self, id: &WorkspaceIdentity) -> Result<()> {
        self.records.lock().unwrap().remove(&id.key());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryRoutes {
    pub files: Mutex<BTreeMap<String, String>>,
    pub fail_write: AtomicBool,
}

impl RouteStore for MemoryRoutes {
    async fn read(&self, deployment: &str) -> Result<Option<String>> {
        Ok(self.files.lock().unwrap().get(deployment).cloned())
    }

    async fn write(&self, deployment: &str, contents: &str) -> Result<()> {
        if self.fail_write.load(Ordering::SeqCst) {
            anyhow::bail!("read-only file system");
        }
        self.files
            .lock()
            .unwrap()
            .insert(deployment.to_string(), contents.to_string());
        Ok(())
    }

    async fn remove(&self, deployment: &str) -> Result<bool> {
        Ok(self.files.lock().unwrap().remove(deployment).is_some())
    }
}

#[derive(Default)]
pub struct MemoryJobs {
    pub updates: Mutex<Vec<JobUpdate>>,
}

impl JobStatusSink for MemoryJobs {
    async fn update(&self, update: &JobUpdate) -> Result<()> {
        self.updates.lock().unwrap().push(update.clone());
        Ok(())
    }
}

/// In-memory project directory keyed by path.
#[derive(Default)]
pub struct MemoryFiles {
    pub files: Mutex<HashMap<PathBuf, String>>,
    pub fail_write: AtomicBool,
}

impl MemoryFiles {
    pub fn with_file(self, path: &str, contents: &str) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), contents.to_string());
        self
    }

    pub fn contents(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(Path::new(path)).cloned()
    }
}

impl ProjectFiles for MemoryFiles {
    async fn locate_compose(&self, project: &Path) -> Result<Option<PathBuf>> {
        let files = self.files.lock().unwrap();
        Ok(crate::domain::compose::COMPOSE_FILE_NAMES
            .iter()
            .map(|name| project.join(name))
            .find(|p| files.contains_key(p)))
    }

    async fn read(&self, path: &Path) -> Result<String> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such file: {}", path.display()))
    }

    async fn write(&self, path: &Path, contents: &str) -> Result<()> {
        if self.fail_write.load(Ordering::SeqCst) {
            anyhow::bail!("permission denied: {}", path.display());
        }
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }
}

// ── Runtime ───────────────────────────────────────────────────────────────────

/// Records runtime calls as joined argument strings.
#[derive(Default)]
pub struct FakeRuntime {
    pub contexts: Mutex<HashMap<String, String>>,
    pub calls: Mutex<Vec<String>>,
    pub fail_create_context: AtomicBool,
    /// Compose subcommands (`build`, `up`, `down`) that exit non-zero.
    pub failing: Mutex<HashMap<String, String>>,
}

impl FakeRuntime {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail(&self, subcommand: &str, stderr: &str) {
        self.failing
            .lock()
            .unwrap()
            .insert(subcommand.to_string(), stderr.to_string());
    }
}

impl ContextStore for FakeRuntime {
    async fn inspect_context(&self, name: &str) -> Result<Output> {
        self.calls.lock().unwrap().push(format!("context inspect {name}"));
        if let Some(host) = self.contexts.lock().unwrap().get(name) {
            let inspected = serde_json::json!([
                { "Name": name, "Endpoints": { "docker": { "Host": host } } }
            ]);
            Ok(ok_output(inspected.to_string().as_bytes()))
        } else {
            Ok(fail_output("context not found"))
        }
    }

    async fn create_context(&self, name: &str, host: &str, _description: &str) -> Result<Output> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("context create {name} {host}"));
        if self.fail_create_context.load(Ordering::SeqCst) {
            return Ok(fail_output("permission denied"));
        }
        self.contexts
            .lock()
            .unwrap()
            .insert(name.to_string(), host.to_string());
        Ok(ok_output(b""))
    }

    async fn remove_context(&self, name: &str) -> Result<Output> {
        self.calls.lock().unwrap().push(format!("context rm {name}"));
        if self.contexts.lock().unwrap().remove(name).is_some() {
            Ok(ok_output(b""))
        } else {
            Ok(fail_output("context not found"))
        }
    }
}

impl ComposeRunner for FakeRuntime {
    async fn compose(
        &self,
        project: &ComposeProject<'_>,
        args: &[&str],
        _timeout: Duration,
    ) -> Result<Output> {
        self.calls.lock().unwrap().push(format!(
            "compose {} {} {}",
            project.context,
            project.name,
            args.join(" ")
        ));
        if let Some(stderr) = args
            .first()
            .and_then(|sub| self.failing.lock().unwrap().get(*sub).cloned())
        {
            return Ok(fail_output(&stderr));
        }
        Ok(ok_output(b""))
    }

    async fn docker(&self, context: &str, args: &[&str]) -> Result<Output> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("docker {context} {}", args.join(" ")));
        if args.first() == Some(&"images") {
            return Ok(ok_output(b"sha256:aaa\nsha256:bbb\n"));
        }
        Ok(ok_output(b""))
    }
}

#[derive(Default)]
pub struct FakeKnownHosts {
    pub purged: Mutex<Vec<String>>,
}

impl KnownHosts for FakeKnownHosts {
    async fn purge(&self, host: &str) -> Result<usize> {
        self.purged.lock().unwrap().push(host.to_string());
        Ok(1)
    }
}

// ── Classifiers ───────────────────────────────────────────────────────────────

pub struct FixedPorts(pub ServicePorts);

impl PortClassifier for FixedPorts {
    async fn classify(&self, _compose: &serde_yaml::Value) -> Result<ServicePorts> {
        Ok(self.0.clone())
    }
}

pub struct FixedClass(pub FailureClass);

impl BuildFailureClassifier for FixedClass {
    async fn classify(&self, _build_output: &str) -> Result<FailureClass> {
        Ok(self.0)
    }
}

// ── Progress ──────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct StageLog {
    pub stages: Mutex<Vec<StageResult>>,
}

impl StageLog {
    pub fn snapshot(&self) -> Vec<StageResult> {
        self.stages.lock().unwrap().clone()
    }
}

impl StageObserver for StageLog {
    async fn stage(&self, result: &StageResult) {
        self.stages.lock().unwrap().push(result.clone());
    }
}

pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn step(&self, _: &str) {}
    fn success(&self, _: &str) {}
    fn warn(&self, _: &str) {}
}
