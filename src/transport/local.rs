//! Local Shell Transport
//!
//! Runs every command through `sh -c` on the local machine, whatever host it
//! is addressed to. Useful for single-node setups and tests.

use crate::domain::ports::{CommandOutput, CommandTransport, ProvisionerConfig};
use crate::error::Result;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Transport that executes commands on the local machine
#[derive(Debug, Default)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandTransport for LocalTransport {
    async fn run(&self, host: &str, command: &str, _config: &ProvisionerConfig) -> Result<CommandOutput> {
        debug!("Running locally for {}: {}", host, command);

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn name(&self) -> &str {
        "local"
    }
}
