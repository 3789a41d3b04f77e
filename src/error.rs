//! Error types for the GlusterFS simple provisioner
//!
//! Provides structured error types for parameter resolution, remote command
//! execution, brick management and the provision/delete workflows.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the provisioner
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("Parameter is invalid: {0}")]
    InvalidParameter(String),

    #[error("Claim {claim} uses a selector, which is not supported")]
    UnsupportedSelector { claim: String },

    // =========================================================================
    // Remote Execution Errors
    // =========================================================================
    #[error("Command `{command}` failed on host {host}: {reason}")]
    Exec {
        host: String,
        command: String,
        exit_code: Option<i32>,
        reason: String,
    },

    #[error("Command `{command}` on host {host} timed out after {timeout_secs}s")]
    ExecTimeout {
        host: String,
        command: String,
        timeout_secs: u64,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    // =========================================================================
    // Workflow Errors
    // =========================================================================
    #[error("Provisioning volume {volume} failed: {source}")]
    ProvisioningFailed {
        volume: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Volume {volume} has no claim reference")]
    MissingClaimReference { volume: String },

    #[error("Claim reference of volume {volume} has no namespace")]
    MissingNamespace { volume: String },

    #[error("Deleting volume {volume} failed at {step}: {source}")]
    DeleteFailed {
        volume: String,
        step: String,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Bad input or unsupported requests - don't retry automatically
            Error::InvalidParameter(_)
            | Error::UnsupportedSelector { .. }
            | Error::MissingClaimReference { .. }
            | Error::MissingNamespace { .. }
            | Error::Configuration(_) => ErrorAction::NoRequeue,

            // Slow hosts get a longer pause before the next attempt
            Error::ExecTimeout { .. } => ErrorAction::RequeueAfter(Duration::from_secs(60)),

            Error::ProvisioningFailed { source, .. } | Error::DeleteFailed { source, .. } => {
                source.action()
            }

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error came from a remote command
    pub fn is_exec_error(&self) -> bool {
        matches!(self, Error::Exec { .. } | Error::ExecTimeout { .. })
    }

    /// Check if this error means the target is already gone
    ///
    /// Delete paths treat these as success.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ResourceNotFound { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            Error::Exec { reason, .. } => {
                reason.contains("does not exist") || reason.contains("No such file or directory")
            }
            Error::DeleteFailed { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Check if gluster refused to stop a volume that is not running
    pub fn is_not_started(&self) -> bool {
        matches!(self, Error::Exec { reason, .. } if reason.contains("is not in the started state"))
    }
}

/// Result type alias for the provisioner
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn exec_error(reason: &str) -> Error {
        Error::Exec {
            host: "h1".into(),
            command: "gluster --mode=script volume stop pvc-1 force".into(),
            exit_code: Some(1),
            reason: reason.into(),
        }
    }

    #[test]
    fn test_error_actions() {
        let err = Error::InvalidParameter("brickRootPaths are not specified".into());
        assert_eq!(err.action(), ErrorAction::NoRequeue);

        let err = Error::ExecTimeout {
            host: "h1".into(),
            command: "mkdir /data/ns1/pvc-1".into(),
            timeout_secs: 5,
        };
        assert_eq!(
            err.action(),
            ErrorAction::RequeueAfter(Duration::from_secs(60))
        );

        let err = Error::ProvisioningFailed {
            volume: "pvc-1".into(),
            source: Box::new(exec_error("File exists")),
        };
        assert_eq!(err.action(), ErrorAction::RequeueWithBackoff);
    }

    #[test]
    fn test_error_retryable() {
        assert!(exec_error("connection reset").is_retryable());
        assert!(!Error::MissingClaimReference {
            volume: "pvc-1".into()
        }
        .is_retryable());
        assert!(!Error::UnsupportedSelector {
            claim: "ns1/claim".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_not_found_detection() {
        assert!(exec_error("volume stop: pvc-1: failed: Volume pvc-1 does not exist").is_not_found());
        assert!(exec_error("rmdir: failed to remove '/data/ns1': No such file or directory")
            .is_not_found());
        assert!(!exec_error("Permission denied").is_not_found());
        assert!(Error::ResourceNotFound {
            kind: "StorageClass".into(),
            name: "gluster".into(),
        }
        .is_not_found());
    }

    #[test]
    fn test_not_started_detection() {
        let err = exec_error("volume stop: pvc-1: failed: Volume pvc-1 is not in the started state");
        assert!(err.is_not_started());
        assert!(!err.is_not_found());
        assert!(!exec_error("Another transaction is in progress").is_not_started());
    }

    #[test]
    fn test_message_embeds_host_and_command() {
        let msg = exec_error("File exists").to_string();
        assert!(msg.contains("h1"));
        assert!(msg.contains("volume stop pvc-1"));
    }
}
