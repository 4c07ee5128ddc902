//! Infrastructure implementation of the `RouteStore` port.
//!
//! One `<deployment>.toml` per deployment in the reverse proxy's dynamic
//! configuration directory. Writes go to a temp file in the same directory
//! and are renamed into place, so the proxy never reloads a partial file.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::application::ports::RouteStore;

pub struct FileRouteStore {
    dir: PathBuf,
}

impl FileRouteStore {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path(&self, deployment: &str) -> Result<PathBuf> {
        anyhow::ensure!(
            !deployment.is_empty()
                && deployment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-'),
            "invalid deployment name: {deployment:?}"
        );
        Ok(self.dir.join(format!("{deployment}.toml")))
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().context("routing file has no parent directory")?;
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    // dot-prefixed so the proxy's *.toml watcher ignores it
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut temp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;
    temp.write_all(contents.as_bytes())
        .with_context(|| format!("writing {}", temp.path().display()))?;
    // the proxy usually runs as another user
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(0o644))
            .with_context(|| format!("setting permissions on {}", temp.path().display()))?;
    }
    temp.persist(path)
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

impl RouteStore for FileRouteStore {
    async fn read(&self, deployment: &str) -> Result<Option<String>> {
        let path = self.path(deployment)?;
        tokio::task::spawn_blocking(move || {
            if !path.exists() {
                return Ok(None);
            }
            std::fs::read_to_string(&path)
                .map(Some)
                .with_context(|| format!("reading {}", path.display()))
        })
        .await
        .context("route read task panicked")?
    }

    async fn write(&self, deployment: &str, contents: &str) -> Result<()> {
        let path = self.path(deployment)?;
        let contents = contents.to_string();
        tokio::task::spawn_blocking(move || write_atomic(&path, &contents))
            .await
            .context("route write task panicked")?
    }

    async fn remove(&self, deployment: &str) -> Result<bool> {
        let path = self.path(deployment)?;
        tokio::task::spawn_blocking(move || {
            if !path.exists() {
                return Ok(false);
            }
            std::fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
            Ok(true)
        })
        .await
        .context("route remove task panicked")?
    }
}
