//! Domain Ports - Core types and trait definitions for the provisioner
//!
//! These traits define the boundaries between the provisioning logic and
//! external systems: the remote command transport, the cluster registry
//! that holds endpoint services, and the storage class lookup.

use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolume;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

// =============================================================================
// Provisioner Configuration
// =============================================================================

/// A host and the base directory under which bricks are created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrickRoot {
    pub host: String,
    pub path: PathBuf,
}

impl BrickRoot {
    pub fn new(host: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
        }
    }
}

impl std::fmt::Display for BrickRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.path.display())
    }
}

/// Validated per-request configuration resolved from storage class parameters
///
/// Only [`crate::provisioner::ConfigResolver`] builds one, so `brick_roots`
/// is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionerConfig {
    pub(crate) brick_roots: Vec<BrickRoot>,
    pub(crate) volume_type: String,
    pub(crate) namespace: String,
    pub(crate) label_selector: String,
}

impl ProvisionerConfig {
    /// Brick roots in parameter order
    pub fn brick_roots(&self) -> &[BrickRoot] {
        &self.brick_roots
    }

    /// Volume type passed to `gluster volume create` (empty for distribute)
    pub fn volume_type(&self) -> &str {
        &self.volume_type
    }

    /// Namespace of the storage-node pods
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Label selector matching the storage-node pods
    pub fn label_selector(&self) -> &str {
        &self.label_selector
    }

    /// Host that receives volume management commands
    pub fn coordinator(&self) -> &BrickRoot {
        &self.brick_roots[0]
    }
}

// =============================================================================
// Bricks, Requests and Handles
// =============================================================================

/// Where one host's brick for a request lives
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrickTarget {
    pub host: String,
    pub parent_dir: PathBuf,
    pub brick_dir: PathBuf,
}

impl BrickTarget {
    /// Derive `<root>/<namespace>/<name>` for a brick root
    pub fn for_root(root: &BrickRoot, namespace: &str, name: &str) -> Self {
        let parent_dir = root.path.join(namespace);
        let brick_dir = parent_dir.join(name);
        Self {
            host: root.host.clone(),
            parent_dir,
            brick_dir,
        }
    }

    /// Brick address as gluster expects it (`host:/path`)
    pub fn brick_spec(&self) -> String {
        format!("{}:{}", self.host, self.brick_dir.display())
    }
}

/// One provisioning or deprovisioning operation
#[derive(Debug, Clone)]
pub struct VolumeRequest {
    pub namespace: String,
    pub name: String,
    pub config: ProvisionerConfig,
}

impl VolumeRequest {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, config: ProvisionerConfig) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            config,
        }
    }

    /// Brick targets for every configured host, in parameter order
    pub fn brick_targets(&self) -> Vec<BrickTarget> {
        self.config
            .brick_roots()
            .iter()
            .map(|root| BrickTarget::for_root(root, &self.namespace, &self.name))
            .collect()
    }
}

/// Result of a successful provision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeHandle {
    /// Gluster volume name
    pub volume_name: String,
    /// Endpoints/Service name exposing the volume
    pub endpoint_name: String,
    /// Namespace holding the endpoint service
    pub namespace: String,
    /// Bricks in `host:/path` form
    pub bricks: Vec<String>,
    /// Identity of the provisioner instance that created it
    pub provisioner_identity: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// =============================================================================
// Command Transport Port
// =============================================================================

/// Captured result of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Port for running a single shell command on a named host
///
/// Returns `Ok` with the command's exit status whenever the command ran; `Err`
/// is reserved for the transport itself failing.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn run(&self, host: &str, command: &str, config: &ProvisionerConfig) -> Result<CommandOutput>;

    /// Transport name for logging
    fn name(&self) -> &str;
}

// =============================================================================
// Endpoint Registry Port
// =============================================================================

/// Port for the cluster resources that let workloads reach a volume
#[async_trait]
pub trait EndpointRegistry: Send + Sync {
    /// Create the endpoint service `name` in `namespace` pointing at `hosts`
    async fn create_endpoint(
        &self,
        namespace: &str,
        name: &str,
        claim_name: &str,
        hosts: &[String],
    ) -> Result<()>;

    /// Delete the endpoint service; a missing service is not an error
    async fn delete_endpoint(&self, namespace: &str, name: &str) -> Result<()>;
}

// =============================================================================
// Class Resolver Port
// =============================================================================

/// Port for recovering the parameters a volume was provisioned with
#[async_trait]
pub trait ClassResolver: Send + Sync {
    async fn parameters_for_volume(&self, volume: &PersistentVolume) -> Result<BTreeMap<String, String>>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type CommandTransportRef = Arc<dyn CommandTransport>;
pub type EndpointRegistryRef = Arc<dyn EndpointRegistry>;
pub type ClassResolverRef = Arc<dyn ClassResolver>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brick_target_paths() {
        let root = BrickRoot::new("h1", "/data");
        let target = BrickTarget::for_root(&root, "ns1", "pvc-123");

        assert_eq!(target.host, "h1");
        assert_eq!(target.parent_dir, PathBuf::from("/data/ns1"));
        assert_eq!(target.brick_dir, PathBuf::from("/data/ns1/pvc-123"));
        assert_eq!(target.brick_spec(), "h1:/data/ns1/pvc-123");
    }

    #[test]
    fn test_brick_root_display() {
        assert_eq!(BrickRoot::new("h2", "/srv/bricks").to_string(), "h2:/srv/bricks");
    }

    #[test]
    fn test_command_output_status() {
        assert!(CommandOutput::success().is_success());
        assert!(!CommandOutput::failure(1, "File exists").is_success());
        assert!(!CommandOutput::default().is_success());
    }
}
