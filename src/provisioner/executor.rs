//! Remote Command Executor
//!
//! Runs an ordered list of commands on one host and stops at the first
//! failure. Later commands in the list are never sent. Nothing is undone
//! here; callers own compensation.

use crate::domain::ports::{CommandOutput, CommandTransportRef, ProvisionerConfig};
use crate::error::{Error, Result};
use std::time::Duration;
use tracing::{debug, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Execution policy applied to every command
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound on a single command, enforced at the transport boundary
    pub command_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(60),
        }
    }
}

// =============================================================================
// Remote Executor
// =============================================================================

/// Ordered, fail-fast, single-host command runner
#[derive(Clone)]
pub struct RemoteExecutor {
    transport: CommandTransportRef,
    config: ExecutorConfig,
}

impl RemoteExecutor {
    pub fn new(transport: CommandTransportRef, config: ExecutorConfig) -> Self {
        Self { transport, config }
    }

    /// Run `commands` on `host` in order
    pub async fn execute<S: AsRef<str>>(
        &self,
        host: &str,
        commands: &[S],
        cfg: &ProvisionerConfig,
    ) -> Result<()> {
        for command in commands {
            self.run_one(host, command.as_ref(), cfg).await?;
        }
        Ok(())
    }

    async fn run_one(&self, host: &str, command: &str, cfg: &ProvisionerConfig) -> Result<CommandOutput> {
        debug!(host, command, transport = self.transport.name(), "Executing remote command");

        let output = tokio::time::timeout(
            self.config.command_timeout,
            self.transport.run(host, command, cfg),
        )
        .await
        .map_err(|_| {
            warn!(host, command, "Remote command timed out");
            Error::ExecTimeout {
                host: host.to_string(),
                command: command.to_string(),
                timeout_secs: self.config.command_timeout.as_secs(),
            }
        })?
        .map_err(|e| Error::Exec {
            host: host.to_string(),
            command: command.to_string(),
            exit_code: None,
            reason: e.to_string(),
        })?;

        if output.is_success() {
            return Ok(output);
        }

        let reason = failure_reason(&output);
        debug!(host, command, exit_code = ?output.exit_code, %reason, "Remote command failed");
        Err(Error::Exec {
            host: host.to_string(),
            command: command.to_string(),
            exit_code: output.exit_code,
            reason,
        })
    }
}

fn failure_reason(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    let stdout = output.stdout.trim();
    if !stdout.is_empty() {
        return stdout.to_string();
    }
    match output.exit_code {
        Some(code) => format!("exit status {}", code),
        None => "terminated without exit status".to_string(),
    }
}
