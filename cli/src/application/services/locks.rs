//! Per-workspace single-flight locking.
//!
//! Every `spotdeploy` invocation is its own process, so the lock that
//! matters is an advisory file lock on `<dir>/<vm name>.lock`. Workspaces
//! that derive the same VM name share its lock. An in-process async mutex
//! in front of it keeps tasks of one process from polling the file against
//! each other.

use std::collections::HashMap;
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;

use crate::domain::error::VmError;
use crate::domain::identity::WorkspaceIdentity;

/// How often a held lock file is retried.
const RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// Exclusive access to one workspace. Released on drop.
pub struct WorkspaceGuard {
    _file: Option<File>,
    _task: OwnedMutexGuard<()>,
}

/// One lock per lower-cased (tenant, workspace) key.
///
/// Allocation, deploy and teardown for the same workspace hold the guard
/// for their whole duration. Different workspaces never block each other.
#[derive(Default)]
pub struct KeyedLocks {
    dir: Option<PathBuf>,
    tasks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    /// Locks that only serialize tasks of this process.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks shared with every process using `dir`.
    #[must_use]
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            tasks: Mutex::default(),
        }
    }

    /// Wait for exclusive access to the workspace.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::Cancelled`] if `cancel` fires while waiting, or an
    /// I/O error if the lock file cannot be opened.
    pub async fn lock(&self, id: &WorkspaceIdentity, cancel: &CancellationToken) -> Result<WorkspaceGuard> {
        let key = id.key();
        let task_lock = {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            // drop entries nobody holds or waits on
            tasks.retain(|k, l| k == &key || Arc::strong_count(l) > 1);
            Arc::clone(tasks.entry(key.clone()).or_default())
        };
        tracing::debug!(workspace = %id, "waiting for workspace lock");
        let task = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(VmError::Cancelled.into()),
            guard = task_lock.lock_owned() => guard,
        };

        let file = match &self.dir {
            Some(dir) => Some(lock_file(&dir.join(format!("{}.lock", id.vm_name())), id, cancel).await?),
            None => None,
        };
        Ok(WorkspaceGuard {
            _file: file,
            _task: task,
        })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Open `path` and poll for its exclusive lock.
async fn lock_file(path: &Path, id: &WorkspaceIdentity, cancel: &CancellationToken) -> Result<File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating lock directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("opening lock file {}", path.display()))?;
    let mut logged = false;
    loop {
        match file.try_lock() {
            Ok(()) => return Ok(file),
            Err(TryLockError::WouldBlock) => {
                if !logged {
                    tracing::info!(workspace = %id, "workspace busy in another process, waiting");
                    logged = true;
                }
            }
            Err(TryLockError::Error(e)) => {
                return Err(e).with_context(|| format!("locking {}", path.display()));
            }
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(VmError::Cancelled.into()),
            () = tokio::time::sleep(RETRY_INTERVAL) => {}
        }
    }
}
