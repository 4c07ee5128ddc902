//! SSH known-hosts maintenance (`KnownHostsManager`).
//!
//! Recreated VMs come back on the same private address with a new host key,
//! so stale entries for that address are removed before a context connects.
//! Plain entries are filtered in place. Hashed entries (`HashKnownHosts yes`,
//! the Debian and Ubuntu default) can only be matched by `ssh-keygen -R`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::application::ports::{CommandRunner, KnownHosts};

/// Prefix of a hashed host field.
const HASHED_PREFIX: &str = "|1|";

/// Manages the user's `~/.ssh/known_hosts`.
pub struct KnownHostsManager<R: CommandRunner> {
    runner: R,
    path: PathBuf,
}

impl<R: CommandRunner> KnownHostsManager<R> {
    /// Creates a manager pointing at `~/.ssh/known_hosts`.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new(runner: R) -> Result<Self> {
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(Self::with_path(runner, home.join(".ssh").join("known_hosts")))
    }

    /// Creates a manager pointing at an arbitrary path (for testing).
    #[must_use]
    pub fn with_path(runner: R, path: PathBuf) -> Self {
        Self { runner, path }
    }

    async fn purge_hashed(&self, host: &str) -> Result<usize> {
        let path = self.path.to_string_lossy();
        let output = self
            .runner
            .run("ssh-keygen", &["-R", host, "-f", &path])
            .await
            .context("running ssh-keygen -R")?;
        anyhow::ensure!(
            output.status.success(),
            "ssh-keygen -R {host} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
        // One "# Host <host> found: line N" per removed entry.
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| l.starts_with("# Host ") && l.contains(" found: "))
            .count())
    }
}

impl<R: CommandRunner> KnownHosts for KnownHostsManager<R> {
    async fn purge(&self, host: &str) -> Result<usize> {
        let path = self.path.clone();
        let plain_host = host.to_string();
        let plain = tokio::task::spawn_blocking(move || purge_plain(&path, &plain_host))
            .await
            .context("known_hosts purge task panicked")??;
        if !plain.hashed_remaining {
            return Ok(plain.removed);
        }
        Ok(plain.removed + self.purge_hashed(host).await?)
    }
}

/// Result of filtering plain entries out of the file.
#[derive(Debug, PartialEq, Eq)]
struct PlainPurge {
    removed: usize,
    hashed_remaining: bool,
}

/// Remove every plain entry for `host`, rewriting the file at mode 0600.
fn purge_plain(path: &Path, host: &str) -> Result<PlainPurge> {
    if !path.exists() {
        return Ok(PlainPurge {
            removed: 0,
            hashed_remaining: false,
        });
    }
    let content =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let (kept, removed) = without_host(&content, host);
    let hashed_remaining = kept.lines().any(|l| l.starts_with(HASHED_PREFIX));
    if removed > 0 {
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, kept)
            .with_context(|| format!("write {}", temp_path.display()))?;
        set_permissions(&temp_path, 0o600)?;
        std::fs::rename(&temp_path, path)
            .with_context(|| format!("replace {}", path.display()))?;
    }
    Ok(PlainPurge {
        removed,
        hashed_remaining,
    })
}

/// Whether the plain host field of a known_hosts line names `host`.
fn names_host(line: &str, host: &str) -> bool {
    let Some(field) = line.split_whitespace().next() else {
        return false;
    };
    field.split(',').any(|pattern| {
        pattern == host
            || pattern
                .strip_prefix('[')
                .and_then(|p| p.split_once("]:"))
                .is_some_and(|(h, _port)| h == host)
    })
}

fn without_host(content: &str, host: &str) -> (String, usize) {
    let mut kept = String::with_capacity(content.len());
    let mut removed = 0;
    for line in content.lines() {
        if names_host(line, host) {
            removed += 1;
        } else {
            kept.push_str(line);
            kept.push('\n');
        }
    }
    (kept, removed)
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
