//! Command Transports
//!
//! Provides the ways a command can reach a storage host:
//! - Pod exec: inside the storage-node pod on the host (default)
//! - SSH: through the system ssh client
//! - Local: `sh -c` on this machine

pub mod local;
pub mod pod_exec;
pub mod ssh;

#[cfg(test)]
pub(crate) mod fake;

pub use local::*;
pub use pod_exec::*;
pub use ssh::*;

use crate::domain::ports::CommandTransportRef;
use crate::error::{Error, Result};
use kube::Client;
use std::sync::Arc;

/// Factory for creating command transports
pub struct TransportFactory;

impl TransportFactory {
    /// Create a transport by name
    ///
    /// `pod-exec` needs a Kubernetes client.
    pub fn create(name: &str, ssh: SshConfig, client: Option<Client>) -> Result<CommandTransportRef> {
        match name.to_lowercase().as_str() {
            "pod-exec" | "exec" => {
                let client = client.ok_or_else(|| {
                    Error::Configuration("pod-exec transport needs a Kubernetes client".into())
                })?;
                Ok(Arc::new(PodExecTransport::new(client)))
            }
            "ssh" => Ok(Arc::new(SshTransport::new(ssh))),
            "local" => Ok(Arc::new(LocalTransport::new())),
            _ => Err(Error::Configuration(format!("unknown transport: {}", name))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    impl std::fmt::Debug for dyn crate::domain::ports::CommandTransport {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("CommandTransport").field("name", &self.name()).finish()
        }
    }

    #[test]
    fn test_create_by_name() {
        let local = TransportFactory::create("LOCAL", SshConfig::default(), None).unwrap();
        assert_eq!(local.name(), "local");

        let ssh = TransportFactory::create("ssh", SshConfig::default(), None).unwrap();
        assert_eq!(ssh.name(), "ssh");
    }

    #[test]
    fn test_pod_exec_needs_client() {
        assert_matches!(
            TransportFactory::create("pod-exec", SshConfig::default(), None),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            TransportFactory::create("telnet", SshConfig::default(), None),
            Err(Error::Configuration(_))
        );
    }
}
