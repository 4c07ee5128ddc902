//! Configuration loading.
//!
//! A YAML file named by `--config` or `SPOTDEPLOY_CONFIG` takes precedence.
//! Without one, every field is read from `SPOTDEPLOY_<FIELD>` environment
//! variables.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use spotdeploy_common::OrchestratorConfig;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "SPOTDEPLOY_CONFIG";
/// Prefix of per-field environment variables.
pub const ENV_PREFIX: &str = "SPOTDEPLOY_";

/// Load and validate configuration from the process environment.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if required
/// keys are missing.
pub fn load(path: Option<&Path>) -> Result<OrchestratorConfig> {
    load_from(path, std::env::vars())
}

/// Load and validate configuration from an explicit set of variables.
///
/// # Errors
///
/// See [`load`].
pub fn load_from(
    path: Option<&Path>,
    vars: impl IntoIterator<Item = (String, String)>,
) -> Result<OrchestratorConfig> {
    let vars: Vec<(String, String)> = vars.into_iter().collect();
    let file = path.map(Path::to_path_buf).or_else(|| {
        vars.iter()
            .find(|(k, v)| k == CONFIG_ENV && !v.is_empty())
            .map(|(_, v)| PathBuf::from(v))
    });

    let config = match file {
        Some(file) => {
            tracing::debug!(path = %file.display(), "loading configuration file");
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            serde_yaml::from_str::<OrchestratorConfig>(&content)
                .with_context(|| format!("cannot parse {}", file.display()))?
        }
        None => envy::prefixed(ENV_PREFIX)
            .from_iter::<_, OrchestratorConfig>(
                vars.into_iter().filter(|(k, _)| k != CONFIG_ENV),
            )
            .context("cannot read configuration from environment")?,
    };
    config.validate()?;
    Ok(config)
}
