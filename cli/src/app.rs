//! Application context - unified state passed to every command handler.
//!
//! `AppContext` owns the output settings, the cancellation token and, once
//! a command needs them, the infrastructure adapters and workspace locks
//! built from the loaded configuration. Nothing is process-global.

use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::Result;
use spotdeploy_common::OrchestratorConfig;
use tokio_util::sync::CancellationToken;

use crate::application::services::locks::KeyedLocks;
use crate::infra::azure::AzCliProvisioner;
use crate::infra::classifier::{ComposePortClassifier, KeywordFailureClassifier};
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::config;
use crate::infra::docker::DockerCli;
use crate::infra::fs::LocalProjectFiles;
use crate::infra::jobs::JsonlJobSink;
use crate::infra::routes::FileRouteStore;
use crate::infra::secrets::AzSecretsResolver;
use crate::infra::ssh::KnownHostsManager;
use crate::infra::state::JsonWorkspaceStore;
use crate::output::{HumanRenderer, OutputContext, TerminalReporter};

/// Output rendering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-readable terminal output (default).
    Human,
    /// Machine-readable JSON output.
    Json,
}

/// Output rendering flags.
pub struct OutputFlags {
    /// Disable ANSI color output.
    pub no_color: bool,
    /// Suppress non-error output.
    pub quiet: bool,
    /// Enable JSON output mode.
    pub json: bool,
}

/// Flags passed from the top-level CLI to `AppContext::new`.
pub struct AppFlags {
    /// Output rendering options.
    pub output: OutputFlags,
    /// Configuration file given with `--config`.
    pub config: Option<PathBuf>,
}

/// Every infrastructure adapter, built from one configuration.
pub struct Adapters {
    pub config: OrchestratorConfig,
    pub cloud: AzCliProvisioner<TokioCommandRunner>,
    pub secrets: AzSecretsResolver<TokioCommandRunner>,
    pub store: JsonWorkspaceStore,
    pub runtime: DockerCli<TokioCommandRunner>,
    pub known_hosts: KnownHostsManager<TokioCommandRunner>,
    pub ports: ComposePortClassifier,
    pub builds: KeywordFailureClassifier,
    pub files: LocalProjectFiles,
    pub routes: FileRouteStore,
    pub jobs: JsonlJobSink,
    /// Serializes work on the same workspace across processes.
    pub locks: KeyedLocks,
}

impl Adapters {
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        let runner = || TokioCommandRunner::new(config.command_timeout());
        Ok(Self {
            cloud: AzCliProvisioner::new(runner(), (&config).into()),
            secrets: AzSecretsResolver::new(runner(), &config),
            store: JsonWorkspaceStore::in_dir(&config.state_dir),
            runtime: DockerCli::new(runner()),
            known_hosts: KnownHostsManager::new(runner())?,
            ports: ComposePortClassifier,
            builds: KeywordFailureClassifier,
            files: LocalProjectFiles,
            routes: FileRouteStore::new(config.routes_dir.clone()),
            jobs: JsonlJobSink::in_dir(&config.state_dir),
            locks: KeyedLocks::in_dir(config.state_dir.join("locks")),
            config,
        })
    }
}

/// Unified application context passed to every command handler.
///
/// Constructed once in `Cli::run()` and passed as `&AppContext` to all
/// command handlers.
pub struct AppContext {
    /// Terminal output context (colors, quiet mode).
    pub output: OutputContext,
    /// Output rendering mode (human vs JSON).
    pub mode: OutputMode,
    /// Cancelled on Ctrl-C. Polling loops and builds observe it.
    pub cancel: CancellationToken,
    config_path: Option<PathBuf>,
    adapters: OnceLock<Adapters>,
}

impl AppContext {
    /// Construct an `AppContext` from top-level CLI flags.
    #[must_use]
    pub fn new(flags: AppFlags) -> Self {
        let mode = if flags.output.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        };
        Self {
            output: OutputContext::new(flags.output.no_color, flags.output.quiet),
            mode,
            cancel: CancellationToken::new(),
            config_path: flags.config,
            adapters: OnceLock::new(),
        }
    }

    /// Cancel [`Self::cancel`] when the process receives Ctrl-C.
    pub fn cancel_on_ctrl_c(&self) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    /// Adapters for the loaded configuration. Loaded on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is missing or invalid.
    pub fn adapters(&self) -> Result<&Adapters> {
        if let Some(adapters) = self.adapters.get() {
            return Ok(adapters);
        }
        let adapters = Adapters::new(config::load(self.config_path.as_deref())?)?;
        Ok(self.adapters.get_or_init(|| adapters))
    }

    /// Returns `true` when JSON output mode is active.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.mode == OutputMode::Json
    }

    #[must_use]
    pub fn renderer(&self) -> HumanRenderer<'_> {
        HumanRenderer::new(&self.output)
    }

    #[must_use]
    pub fn reporter(&self) -> TerminalReporter<'_> {
        TerminalReporter::new(&self.output)
    }
}
