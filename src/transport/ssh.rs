//! SSH Transport
//!
//! Runs commands on storage hosts through the system `ssh` client in batch
//! mode, so a missing key fails instead of prompting.

use crate::domain::ports::{CommandOutput, CommandTransport, ProvisionerConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// `ssh` exits 255 when the connection itself failed
const SSH_CONNECTION_FAILURE: i32 = 255;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the SSH transport
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Remote user (defaults to the ssh client's choice)
    pub user: Option<String>,
    pub port: u16,
    /// Private key passed with `-i`
    pub identity_file: Option<PathBuf>,
    /// Seconds allowed for connection setup
    pub connect_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: None,
            port: 22,
            identity_file: None,
            connect_timeout_secs: 10,
        }
    }
}

// =============================================================================
// SSH Transport
// =============================================================================

/// Transport that runs commands over `ssh`
pub struct SshTransport {
    config: SshConfig,
}

impl SshTransport {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Arguments passed to `ssh` for one command
    fn args(&self, host: &str, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
            "-p".to_string(),
            self.config.port.to_string(),
        ];
        if let Some(key) = &self.config.identity_file {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args.push(match &self.config.user {
            Some(user) => format!("{}@{}", user, host),
            None => host.to_string(),
        });
        args.push("--".to_string());
        args.push(command.to_string());
        args
    }
}

#[async_trait]
impl CommandTransport for SshTransport {
    async fn run(&self, host: &str, command: &str, _config: &ProvisionerConfig) -> Result<CommandOutput> {
        debug!("ssh {}: {}", host, command);

        let output = Command::new("ssh")
            .args(self.args(host, command))
            .kill_on_drop(true)
            .output()
            .await?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.code() == Some(SSH_CONNECTION_FAILURE) {
            return Err(Error::Transport(format!(
                "ssh to {} failed: {}",
                host,
                stderr.trim()
            )));
        }

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }

    fn name(&self) -> &str {
        "ssh"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let transport = SshTransport::new(SshConfig::default());
        assert_eq!(
            transport.args("h1", "mkdir -p /data/ns1"),
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=10",
                "-p",
                "22",
                "h1",
                "--",
                "mkdir -p /data/ns1",
            ]
        );
    }

    #[test]
    fn test_user_and_key() {
        let transport = SshTransport::new(SshConfig {
            user: Some("root".into()),
            port: 2222,
            identity_file: Some(PathBuf::from("/etc/provisioner/id_ed25519")),
            connect_timeout_secs: 5,
        });
        let args = transport.args("h2", "rm -rf /data/ns1/pvc-1");

        assert!(args.windows(2).any(|w| w[0] == "-i" && w[1] == "/etc/provisioner/id_ed25519"));
        assert!(args.windows(2).any(|w| w[0] == "-p" && w[1] == "2222"));
        assert_eq!(args[args.len() - 3], "root@h2");
        assert_eq!(args.last().map(String::as_str), Some("rm -rf /data/ns1/pvc-1"));
    }
}
