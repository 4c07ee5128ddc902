//! Infrastructure implementation of the `SecretsResolver` port.
//!
//! The admin SSH public key comes from configuration when set, otherwise
//! from the cloud's SSH key resource.

use anyhow::{Context, Result};
use spotdeploy_common::OrchestratorConfig;

use crate::application::ports::{CommandRunner, SecretsResolver};

pub struct AzSecretsResolver<R: CommandRunner> {
    runner: R,
    configured_key: Option<String>,
    subscription_id: String,
    resource_group: String,
    key_resource: String,
}

impl<R: CommandRunner> AzSecretsResolver<R> {
    pub fn new(runner: R, config: &OrchestratorConfig) -> Self {
        Self {
            runner,
            configured_key: config
                .ssh_public_key
                .clone()
                .filter(|k| !k.trim().is_empty()),
            subscription_id: config.subscription_id.clone(),
            resource_group: config.resource_group.clone(),
            key_resource: config.ssh_key_resource.clone(),
        }
    }
}

impl<R: CommandRunner> SecretsResolver for AzSecretsResolver<R> {
    async fn ssh_public_key(&self) -> Result<String> {
        if let Some(key) = &self.configured_key {
            return Ok(key.trim().to_string());
        }
        tracing::debug!(resource = %self.key_resource, "reading SSH public key from cloud");
        let output = self
            .runner
            .run(
                "az",
                &[
                    "sshkey",
                    "show",
                    "-g",
                    self.resource_group.as_str(),
                    "-n",
                    self.key_resource.as_str(),
                    "--subscription",
                    self.subscription_id.as_str(),
                    "--query",
                    "publicKey",
                    "-o",
                    "tsv",
                ],
            )
            .await
            .context("az sshkey show")?;
        anyhow::ensure!(
            output.status.success(),
            "cannot read SSH key {}: {}",
            self.key_resource,
            String::from_utf8_lossy(&output.stderr).trim()
        );
        let key = String::from_utf8_lossy(&output.stdout).trim().to_string();
        anyhow::ensure!(!key.is_empty(), "SSH key {} has no public key", self.key_resource);
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use std::process::Output;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::application::services::test_support::{ok_output, test_config};

    struct OneShot {
        stdout: &'static str,
        calls: Mutex<u32>,
    }

    impl CommandRunner for OneShot {
        async fn run(&self, _program: &str, _args: &[&str]) -> Result<Output> {
            *self.calls.lock().unwrap() += 1;
            Ok(ok_output(self.stdout.as_bytes()))
        }

        async fn run_with_timeout(&self, program: &str, args: &[&str], _: Duration) -> Result<Output> {
            self.run(program, args).await
        }
    }

    #[tokio::test]
    async fn configured_key_short_circuits_the_cloud() {
        let config = OrchestratorConfig {
            ssh_public_key: Some("ssh-ed25519 AAAAconf\n".into()),
            ..test_config()
        };
        let resolver = AzSecretsResolver::new(
            OneShot {
                stdout: "unused",
                calls: Mutex::new(0),
            },
            &config,
        );
        assert_eq!(resolver.ssh_public_key().await.unwrap(), "ssh-ed25519 AAAAconf");
        assert_eq!(*resolver.runner.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn key_resource_is_read_otherwise() {
        let resolver = AzSecretsResolver::new(
            OneShot {
                stdout: "ssh-rsa AAAAcloud\n",
                calls: Mutex::new(0),
            },
            &test_config(),
        );
        assert_eq!(resolver.ssh_public_key().await.unwrap(), "ssh-rsa AAAAcloud");
    }

    #[tokio::test]
    async fn empty_key_is_an_error() {
        let resolver = AzSecretsResolver::new(
            OneShot {
                stdout: "\n",
                calls: Mutex::new(0),
            },
            &test_config(),
        );
        assert!(resolver.ssh_public_key().await.is_err());
    }
}
