//! Infrastructure implementation of the `WorkspaceStore` port.
//!
//! `JsonWorkspaceStore` keeps every workspace's VM record in one JSON map
//! keyed by the case-insensitive workspace key. Loads and saves run under
//! `tokio::task::spawn_blocking` with atomic write (unique temp file +
//! rename). Every load-modify-save holds an exclusive lock on a sibling
//! `.lock` file, so concurrent processes never drop each other's records.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use spotdeploy_common::VmRecord;

use crate::application::ports::WorkspaceStore;
use crate::domain::identity::WorkspaceIdentity;

type Records = BTreeMap<String, VmRecord>;

/// File name of the record map inside the state directory.
pub const STATE_FILE: &str = "workspaces.json";

/// State file manager - implements `WorkspaceStore` for the infra layer.
pub struct JsonWorkspaceStore {
    path: PathBuf,
}

impl JsonWorkspaceStore {
    /// Store records in `<state_dir>/workspaces.json`.
    #[must_use]
    pub fn in_dir(state_dir: &Path) -> Self {
        Self::with_path(state_dir.join(STATE_FILE))
    }

    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    fn load_sync(path: &Path) -> Result<Records> {
        if !path.exists() {
            return Ok(Records::new());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading state file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing state file {}", path.display()))
    }

    fn save_sync(path: &Path, records: &Records) -> Result<()> {
        let dir = parent_dir(path);
        let content = serde_json::to_string_pretty(records).context("serializing state")?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("creating temp file in {}", dir.display()))?;
        temp.write_all(content.as_bytes())
            .with_context(|| format!("writing temp file {}", temp.path().display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("setting permissions on {}", temp.path().display()))?;
        }

        temp.persist(path)
            .with_context(|| format!("finalizing state file {}", path.display()))?;
        Ok(())
    }

    /// Exclusive lock guarding load-modify-save of `path`. Released when
    /// the returned file is dropped.
    fn lock_sync(path: &Path) -> Result<File> {
        let dir = parent_dir(path);
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating directory {}", dir.display()))?;
        let lock_path = path.with_extension("json.lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("opening {}", lock_path.display()))?;
        file.lock()
            .with_context(|| format!("locking {}", lock_path.display()))?;
        Ok(file)
    }

    /// Load, apply `change`, save, all under the state lock.
    async fn update(&self, change: impl FnOnce(&mut Records) + Send + 'static) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let _lock = Self::lock_sync(&path)?;
            let mut records = Self::load_sync(&path)?;
            change(&mut records);
            Self::save_sync(&path, &records)
        })
        .await
        .context("state save task panicked")?
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

impl WorkspaceStore for JsonWorkspaceStore {
    async fn vm_record(&self, id: &WorkspaceIdentity) -> Result<Option<VmRecord>> {
        let path = self.path.clone();
        let key = id.key();
        tokio::task::spawn_blocking(move || Ok(Self::load_sync(&path)?.remove(&key)))
            .await
            .context("state load task panicked")?
    }

    async fn save_vm_record(&self, id: &WorkspaceIdentity, record: &VmRecord) -> Result<()> {
        let key = id.key();
        let record = record.clone();
        self.update(move |records| {
            records.insert(key, record);
        })
        .await
    }

    async fn clear_vm_record(&self, id: &WorkspaceIdentity) -> Result<()> {
        let key = id.key();
        self.update(move |records| {
            records.remove(&key);
        })
        .await
    }
}
