//! Application service - workspace teardown.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use spotdeploy_common::OrchestratorConfig;

use super::context::remove_context;
use super::routing::{Unpublished, unpublish};
use super::vm::lifecycle;
use crate::application::ports::{
    CloudProvisioner, ComposeProject, ContainerRuntime, RouteStore, WorkspaceStore,
};
use crate::domain::identity::WorkspaceIdentity;

/// What teardown removed.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub services_stopped: bool,
    pub routes_removed: bool,
    pub context_removed: bool,
    pub vm_deleted: bool,
    /// Best-effort steps that failed.
    pub warnings: Vec<String>,
}

/// Stop the deployment, withdraw its routes and unbind its context.
/// With `delete_vm`, also delete the VM and forget its record.
///
/// Every step but VM deletion is best-effort.
///
/// # Errors
///
/// Returns an error only if the VM cannot be deleted.
pub async fn teardown(
    cloud: &impl CloudProvisioner,
    store: &impl WorkspaceStore,
    runtime: &impl ContainerRuntime,
    routes: &impl RouteStore,
    config: &OrchestratorConfig,
    id: &WorkspaceIdentity,
    delete_vm: bool,
) -> Result<TeardownReport> {
    let mut report = TeardownReport::default();
    tracing::info!(workspace = %id, delete_vm, "tearing down");

    match store.vm_record(id).await {
        Ok(Some(_)) => {
            let context = id.context_name();
            let project_name = id.project_name();
            let project = ComposeProject {
                context: &context,
                file: None,
                name: &project_name,
                env_file: None,
            };
            match runtime
                .compose(&project, &["down", "--volumes", "--remove-orphans"], Duration::from_secs(300))
                .await
            {
                Ok(o) if o.status.success() => report.services_stopped = true,
                Ok(o) => report.warn(format!(
                    "compose down: {}",
                    String::from_utf8_lossy(&o.stderr).trim()
                )),
                Err(e) => report.warn(format!("compose down: {e:#}")),
            }
        }
        Ok(None) => tracing::debug!(workspace = %id, "no VM recorded, skipping compose down"),
        Err(e) => report.warn(format!("reading VM record: {e:#}")),
    }

    match unpublish(routes, id).await {
        Ok(Unpublished::Removed) => report.routes_removed = true,
        Ok(Unpublished::Absent) => {}
        Ok(Unpublished::Refused { owner }) => {
            report.warn(format!("routes belong to {owner}, left in place"));
        }
        Err(e) => report.warn(format!("removing routes: {e:#}")),
    }

    match remove_context(runtime, id).await {
        Ok(removed) => report.context_removed = removed,
        Err(e) => report.warn(format!("removing context: {e:#}")),
    }

    if delete_vm {
        report.vm_deleted = lifecycle::delete(cloud, store, config, id).await?;
    }
    Ok(report)
}

impl TeardownReport {
    fn warn(&mut self, message: String) {
        tracing::warn!(error = %message, "teardown step failed, continuing");
        self.warnings.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::routing::publish;
    use crate::application::services::test_support::{
        FakeCloud, FakeRuntime, MemoryRoutes, MemoryStore, NullReporter, StaticSecrets, test_config,
    };
    use crate::application::services::vm::lifecycle::{AllocateOptions, allocate_or_reuse};
    use spotdeploy_common::ServicePorts;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn full_teardown_removes_everything() {
        let cloud = FakeCloud::default();
        let store = MemoryStore::default();
        let runtime = FakeRuntime::default();
        let routes = MemoryRoutes::default();
        let config = test_config();
        let id = WorkspaceIdentity::new("alice", "blog");
        let cancel = CancellationToken::new();
        allocate_or_reuse(
            &cloud,
            &StaticSecrets("k"),
            &store,
            AllocateOptions {
                config: &config,
                id: &id,
                size: None,
                ssh_key: None,
                force_recreate: false,
                cancel: &cancel,
                reporter: &NullReporter,
            },
        )
        .await
        .unwrap();
        runtime
            .contexts
            .lock()
            .unwrap()
            .insert(id.context_name(), "ssh://azureuser@10.0.0.95".into());
        let ports = ServicePorts::from([("web".to_string(), vec![8080])]);
        publish(&routes, &config.base_domain, &id, "10.0.0.95", &ports)
            .await
            .unwrap();

        let report = teardown(&cloud, &store, &runtime, &routes, &config, &id, true)
            .await
            .unwrap();
        assert_eq!(
            report,
            TeardownReport {
                services_stopped: true,
                routes_removed: true,
                context_removed: true,
                vm_deleted: true,
                warnings: vec![],
            }
        );
        assert!(routes.files.lock().unwrap().is_empty());
        assert!(store.get(&id).is_none());
        assert!(cloud.power("vm-alice-blog").is_none());
    }

    #[tokio::test]
    async fn teardown_of_unknown_workspace_is_a_no_op() {
        let cloud = FakeCloud::default();
        let runtime = FakeRuntime::default();
        let report = teardown(
            &cloud,
            &MemoryStore::default(),
            &runtime,
            &MemoryRoutes::default(),
            &test_config(),
            &WorkspaceIdentity::new("alice", "blog"),
            false,
        )
        .await
        .unwrap();
        assert_eq!(report, TeardownReport::default());
        assert!(!runtime.calls().iter().any(|c| c.starts_with("compose")));
        assert!(cloud.mutations().is_empty());
    }
}
