//! Application service - deployment pipeline.
//!
//! cleanup → context → ports → logging → build → deploy → routing.
//! Cleanup, logging and routing are best-effort; context, build and deploy
//! are fatal and short-circuit with a typed [`DeployError`]. Every stage
//! reports a [`StageResult`] to the observer.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use spotdeploy_common::{OrchestratorConfig, RoutingEntry, ServicePorts, Stage, StageResult};
use tokio_util::sync::CancellationToken;

use super::context::{BoundContext, ensure_context};
use super::routing::{PublishOutcome, publish};
use crate::application::ports::{
    BuildFailureClassifier, ComposeProject, ContainerRuntime, KnownHosts, PortClassifier,
    ProjectFiles, RouteStore, StageObserver, WorkspaceStore,
};
use crate::domain::compose;
use crate::domain::error::{ContextError, DeployError, FailureClass};
use crate::domain::identity::WorkspaceIdentity;

/// Label compose puts on everything it creates for a project.
const PROJECT_LABEL: &str = "com.docker.compose.project";

/// Housekeeping run on the context before every build. Only removes what no
/// container references.
const SAFE_PRUNE: &[&[&str]] = &[
    &["image", "prune", "-f"],
    &["builder", "prune", "-f"],
    &["volume", "prune", "-f"],
];

pub struct DeployOptions<'a, O: StageObserver> {
    pub config: &'a OrchestratorConfig,
    pub id: &'a WorkspaceIdentity,
    /// Directory containing the compose file.
    pub project_path: &'a Path,
    /// Forwarded to compose build and up.
    pub env_file: Option<&'a Path>,
    pub cancel: &'a CancellationToken,
    pub observer: &'a O,
}

/// A successful deployment.
#[derive(Debug, Clone, Serialize)]
pub struct DeployOutcome {
    pub project_name: String,
    pub private_ip: String,
    pub entries: Vec<RoutingEntry>,
    /// Public URLs. Empty when routes could not be published.
    pub urls: Vec<String>,
}

fn combined_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{}\n{}", stdout.trim(), stderr.trim())
        .trim()
        .to_string()
}

/// Build and run the workspace's compose project on its VM, then publish
/// its routes.
///
/// # Errors
///
/// Returns a [`DeployError`] (wrapped) for fatal stage failures, or an
/// untyped error for unexpected I/O failures.
#[allow(clippy::too_many_arguments)]
pub async fn deploy(
    store: &impl WorkspaceStore,
    runtime: &impl ContainerRuntime,
    known_hosts: &impl KnownHosts,
    port_classifier: &impl PortClassifier,
    build_classifier: &impl BuildFailureClassifier,
    files: &impl ProjectFiles,
    routes: &impl RouteStore,
    opts: DeployOptions<'_, impl StageObserver>,
) -> Result<DeployOutcome> {
    let DeployOptions {
        config,
        id,
        project_path,
        env_file,
        cancel,
        observer,
    } = opts;
    let project_name = id.project_name();
    tracing::info!(workspace = %id, project = %project_name, path = %project_path.display(), "deploying");

    // 1. cleanup. The context is bound first so cleanup reaches the VM
    // even on a first deploy or right after a recreate.
    let binding = ensure_context(store, runtime, known_hosts, &config.admin_username, id).await;
    let warnings = match &binding {
        Ok(bound) => cleanup(runtime, &bound.context_name, &project_name).await,
        Err(e) => {
            tracing::warn!(workspace = %id, error = %e, "no context, skipping cleanup");
            vec![format!("cleanup skipped: {e:#}")]
        }
    };
    let cleanup_result = if warnings.is_empty() {
        StageResult::succeeded(Stage::Cleanup, "previous deployment cleaned up")
    } else {
        StageResult::succeeded(Stage::Cleanup, "cleanup finished with warnings")
            .with_metadata("warnings", warnings)
    };
    observer.stage(&cleanup_result).await;
    check_cancelled(cancel)?;

    // 2. context
    let bound = match binding {
        Ok(bound) => bound,
        Err(e) => {
            let e = match e.downcast::<ContextError>() {
                Ok(typed) => DeployError::Context(typed).into(),
                Err(other) => other,
            };
            return fail(observer, Stage::Context, "failed to bind context", e).await;
        }
    };
    observer
        .stage(
            &StageResult::succeeded(Stage::Context, "context ready")
                .with_metadata("context", bound.context_name.clone()),
        )
        .await;

    // 3. ports
    let (compose_path, mut doc, ports) =
        match resolve_ports(files, port_classifier, project_path).await {
            Ok(resolved) => resolved,
            Err(e) => return fail(observer, Stage::Ports, "failed to resolve ports", e).await,
        };
    observer
        .stage(
            &StageResult::succeeded(Stage::Ports, "ports resolved")
                .with_metadata("ports", serde_json::to_value(&ports).unwrap_or_default()),
        )
        .await;

    // 4. logging
    let tag = compose::fluentd_tag(&id.tenant, &id.workspace);
    let logging = attach_logging(files, &compose_path, &mut doc, &config.fluentd_address, &tag).await;
    let logging_result = match logging {
        Ok(n) => StageResult::succeeded(Stage::Logging, format!("log shipping attached to {n} services")),
        Err(e) => {
            tracing::warn!(workspace = %id, error = %e, "failed to attach log shipping, continuing");
            StageResult::failed(Stage::Logging, "log shipping not attached", format!("{e:#}"))
        }
    };
    observer.stage(&logging_result).await;
    check_cancelled(cancel)?;

    let project = ComposeProject {
        context: &bound.context_name,
        file: Some(&compose_path),
        name: &project_name,
        env_file,
    };

    // 5. build
    if let Err(e) = build(runtime, build_classifier, &project, config.build_timeout(), cancel).await {
        return fail(observer, Stage::Build, "build failed", e.into()).await;
    }
    observer
        .stage(&StageResult::succeeded(Stage::Build, "images built"))
        .await;
    check_cancelled(cancel)?;

    // 6. deploy
    if let Err(e) = up(runtime, &project, config.command_timeout()).await {
        return fail(observer, Stage::Deploy, "failed to start services", e.into()).await;
    }
    observer
        .stage(&StageResult::succeeded(Stage::Deploy, "services started"))
        .await;

    // 7. routing
    let outcome = route(routes, config, id, &bound, &ports, observer).await;
    tracing::info!(workspace = %id, project = %project_name, urls = outcome.urls.len(), "deployed");
    Ok(DeployOutcome {
        project_name,
        ..outcome
    })
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), DeployError> {
    if cancel.is_cancelled() {
        Err(DeployError::Cancelled)
    } else {
        Ok(())
    }
}

async fn fail<T>(
    observer: &impl StageObserver,
    stage: Stage,
    message: &str,
    error: anyhow::Error,
) -> Result<T> {
    tracing::error!(%stage, error = %format!("{error:#}"), "{message}");
    observer
        .stage(&StageResult::failed(stage, message, format!("{error:#}")))
        .await;
    Err(error)
}

/// Remove the project's containers, volumes and images, then prune what
/// nothing references. Returns the failures, which are never fatal.
async fn cleanup(runtime: &impl ContainerRuntime, context: &str, project_name: &str) -> Vec<String> {
    let mut warnings = Vec::new();
    let mut warn = |e: DeployError| {
        tracing::warn!(context, project = project_name, error = %e, "continuing");
        warnings.push(e.to_string());
    };

    let down = ComposeProject {
        context,
        file: None,
        name: project_name,
        env_file: None,
    };
    match runtime
        .compose(&down, &["down", "--volumes", "--remove-orphans"], Duration::from_secs(300))
        .await
    {
        Ok(o) if o.status.success() => tracing::info!(project = project_name, "previous containers removed"),
        Ok(o) => warn(DeployError::CleanupFailed(format!("compose down: {}", combined_output(&o)))),
        Err(e) => warn(DeployError::CleanupFailed(format!("compose down: {e:#}"))),
    }

    let filter = format!("label={PROJECT_LABEL}={project_name}");
    match runtime
        .docker(context, &["images", "-q", "--filter", &filter])
        .await
    {
        Ok(o) if o.status.success() => {
            let listed = String::from_utf8_lossy(&o.stdout).to_string();
            let mut ids: Vec<&str> = listed.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
            ids.dedup();
            if !ids.is_empty() {
                let mut args = vec!["rmi", "-f"];
                args.extend(ids);
                match runtime.docker(context, &args).await {
                    Ok(o) if o.status.success() => {}
                    Ok(o) => warn(DeployError::CleanupFailed(format!("rmi: {}", combined_output(&o)))),
                    Err(e) => warn(DeployError::CleanupFailed(format!("rmi: {e:#}"))),
                }
            }
        }
        Ok(o) => warn(DeployError::CleanupFailed(format!("images: {}", combined_output(&o)))),
        Err(e) => warn(DeployError::CleanupFailed(format!("images: {e:#}"))),
    }

    for args in SAFE_PRUNE {
        match runtime.docker(context, args).await {
            Ok(o) if o.status.success() => {}
            Ok(o) => warn(DeployError::CleanupFailed(format!("{}: {}", args.join(" "), combined_output(&o)))),
            Err(e) => warn(DeployError::CleanupFailed(format!("{}: {e:#}", args.join(" ")))),
        }
    }
    warnings
}

/// Locate and parse the project's compose file and classify its ports.
///
/// # Errors
///
/// Returns a [`DeployError`] (wrapped) when the file is missing or invalid
/// or exposes nothing.
pub async fn resolve_ports(
    files: &impl ProjectFiles,
    classifier: &impl PortClassifier,
    project_path: &Path,
) -> Result<(PathBuf, serde_yaml::Value, ServicePorts)> {
    let compose_path = files
        .locate_compose(project_path)
        .await?
        .ok_or_else(|| DeployError::ComposeFileMissing(project_path.display().to_string()))?;
    let text = files.read(&compose_path).await?;
    let doc = compose::parse(&text).map_err(|e| DeployError::InvalidCompose(e.to_string()))?;
    let mut ports = classifier.classify(&doc).await?;
    ports.retain(|_, p| !p.is_empty());
    if ports.is_empty() {
        return Err(DeployError::NoExposedPorts.into());
    }
    Ok((compose_path, doc, ports))
}

async fn attach_logging(
    files: &impl ProjectFiles,
    compose_path: &Path,
    doc: &mut serde_yaml::Value,
    address: &str,
    tag: &str,
) -> Result<usize> {
    let count = compose::inject_fluentd(doc, address, tag)?;
    files.write(compose_path, &compose::render(doc)?).await?;
    Ok(count)
}

async fn build(
    runtime: &impl ContainerRuntime,
    classifier: &impl BuildFailureClassifier,
    project: &ComposeProject<'_>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), DeployError> {
    tracing::info!(project = project.name, "building images");
    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(DeployError::Cancelled),
        r = runtime.compose(project, &["build"], timeout) => r,
    };
    let output = match result {
        Ok(o) if o.status.success() => return Ok(()),
        Ok(o) => combined_output(&o),
        Err(e) => format!("{e:#}"),
    };
    let class = match classifier.classify(&output).await {
        Ok(class) => class,
        Err(e) => {
            tracing::warn!(error = %e, "build failure classification failed, assuming project error");
            FailureClass::Project
        }
    };
    Err(DeployError::BuildFailed { output, class })
}

async fn up(
    runtime: &impl ContainerRuntime,
    project: &ComposeProject<'_>,
    timeout: Duration,
) -> Result<(), DeployError> {
    tracing::info!(project = project.name, "starting services");
    match runtime.compose(project, &["up", "-d"], timeout).await {
        Ok(o) if o.status.success() => Ok(()),
        Ok(o) => Err(DeployError::DeployFailed(combined_output(&o))),
        Err(e) => Err(DeployError::DeployFailed(format!("{e:#}"))),
    }
}

/// Publish routes for the started services. Never fails the deployment:
/// a refused or unwritable routing file leaves the services running
/// without public URLs.
async fn route(
    routes: &impl RouteStore,
    config: &OrchestratorConfig,
    id: &WorkspaceIdentity,
    bound: &BoundContext,
    ports: &ServicePorts,
    observer: &impl StageObserver,
) -> DeployOutcome {
    let (entries, result) = match publish(routes, &config.base_domain, id, &bound.ip, ports).await {
        Ok(PublishOutcome::Published { entries, removed }) => {
            let urls: Vec<String> = entries.iter().map(RoutingEntry::external_url).collect();
            let result = StageResult::succeeded(Stage::Routing, format!("{} routes published", entries.len()))
                .with_metadata("urls", urls)
                .with_metadata("removed", removed);
            (entries, result)
        }
        Ok(PublishOutcome::Refused { owner }) => {
            let result = StageResult::failed(
                Stage::Routing,
                "routes not published",
                format!("deployment name is owned by {owner}"),
            );
            (Vec::new(), result)
        }
        Err(e) => {
            tracing::warn!(workspace = %id, error = %format!("{e:#}"), "failed to publish routes, continuing");
            let result = StageResult::failed(Stage::Routing, "routes not published", format!("{e:#}"));
            (Vec::new(), result)
        }
    };
    observer.stage(&result).await;
    DeployOutcome {
        project_name: String::new(),
        private_ip: bound.ip.clone(),
        urls: entries.iter().map(RoutingEntry::external_url).collect(),
        entries,
    }
}
