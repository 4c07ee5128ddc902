//! VM bootstrap payload and the shell probes run through the cloud
//! command API.

/// Probe whose output contains `status: done` once first boot finished.
pub const CLOUD_INIT_STATUS: &str = "cloud-init status";

/// Probe whose output starts with `Docker version` once the runtime is installed.
pub const DOCKER_VERSION: &str = "docker --version";

/// Run on a reused VM before it is handed out. Removes every container and
/// all unused images, networks and volumes.
pub const REUSE_CLEANUP_SCRIPT: &str =
    "docker ps -aq | xargs -r docker rm -f; docker system prune -af --volumes";

/// Cloud-init user data installing the container runtime and granting
/// `admin_username` access to its socket.
#[must_use]
pub fn cloud_init(admin_username: &str) -> String {
    format!(
        "#cloud-config
package_update: true
packages:
  - ca-certificates
  - curl
runcmd:
  - curl -fsSL https://get.docker.com -o /tmp/get-docker.sh
  - sh /tmp/get-docker.sh
  - usermod -aG docker {admin_username}
  - systemctl enable --now docker
"
    )
}

#[must_use]
pub fn cloud_init_done(output: &str) -> bool {
    output.contains("status: done")
}

#[must_use]
pub fn docker_available(output: &str) -> bool {
    output.contains("Docker version")
}
