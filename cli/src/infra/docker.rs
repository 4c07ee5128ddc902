//! Infrastructure implementation of the container runtime ports.
//!
//! `DockerCli<R>` drives the `docker` CLI through a `CommandRunner`. Every
//! command is pinned to a context with `--context`, so no global default
//! context is ever switched.

use std::process::Output;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::application::ports::{CommandRunner, ComposeProject, ComposeRunner, ContextStore};

pub struct DockerCli<R: CommandRunner> {
    runner: R,
}

impl<R: CommandRunner> DockerCli<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

/// Arguments for `docker --context <ctx> compose ...`.
fn compose_args<'a>(
    project: &ComposeProject<'a>,
    file: Option<&'a str>,
    env_file: Option<&'a str>,
    args: &[&'a str],
) -> Vec<&'a str> {
    let mut full = vec!["--context", project.context, "compose"];
    if let Some(file) = file {
        full.extend(["-f", file]);
    }
    full.extend(["-p", project.name]);
    if let Some(env_file) = env_file {
        full.extend(["--env-file", env_file]);
    }
    full.extend_from_slice(args);
    full
}

impl<R: CommandRunner> ContextStore for DockerCli<R> {
    async fn inspect_context(&self, name: &str) -> Result<Output> {
        self.runner
            .run("docker", &["context", "inspect", name])
            .await
            .context("docker context inspect")
    }

    async fn create_context(&self, name: &str, host: &str, description: &str) -> Result<Output> {
        let endpoint = format!("host={host}");
        self.runner
            .run(
                "docker",
                &[
                    "context",
                    "create",
                    name,
                    "--description",
                    description,
                    "--docker",
                    endpoint.as_str(),
                ],
            )
            .await
            .context("docker context create")
    }

    async fn remove_context(&self, name: &str) -> Result<Output> {
        self.runner
            .run("docker", &["context", "rm", "-f", name])
            .await
            .context("docker context rm")
    }
}

impl<R: CommandRunner> ComposeRunner for DockerCli<R> {
    async fn compose(
        &self,
        project: &ComposeProject<'_>,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Output> {
        let file = project.file.map(|p| p.to_string_lossy().into_owned());
        let env_file = project.env_file.map(|p| p.to_string_lossy().into_owned());
        let full = compose_args(project, file.as_deref(), env_file.as_deref(), args);
        tracing::debug!(context = project.context, project = project.name, ?args, "docker compose");
        self.runner
            .run_with_timeout("docker", &full, timeout)
            .await
            .with_context(|| format!("docker compose {}", args.first().unwrap_or(&"")))
    }

    async fn docker(&self, context: &str, args: &[&str]) -> Result<Output> {
        let mut full = vec!["--context", context];
        full.extend_from_slice(args);
        self.runner
            .run("docker", &full)
            .await
            .with_context(|| format!("docker {}", args.first().unwrap_or(&"")))
    }
}
