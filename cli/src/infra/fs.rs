//! Filesystem infrastructure - implements `ProjectFiles` for a local project
//! directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::application::ports::ProjectFiles;
use crate::domain::compose::COMPOSE_FILE_NAMES;

/// Production filesystem implementation of `ProjectFiles`.
pub struct LocalProjectFiles;

impl ProjectFiles for LocalProjectFiles {
    async fn locate_compose(&self, project: &Path) -> Result<Option<PathBuf>> {
        let project = project.to_path_buf();
        tokio::task::spawn_blocking(move || {
            COMPOSE_FILE_NAMES
                .iter()
                .map(|name| project.join(name))
                .find(|path| path.is_file())
        })
        .await
        .context("spawn_blocking for locate_compose")
    }

    async fn read(&self, path: &Path) -> Result<String> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))
        })
        .await
        .context("spawn_blocking for read")?
    }

    async fn write(&self, path: &Path, contents: &str) -> Result<()> {
        let path = path.to_path_buf();
        let contents = contents.to_string();
        tokio::task::spawn_blocking(move || {
            std::fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))
        })
        .await
        .context("spawn_blocking for write")?
    }
}
