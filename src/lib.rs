//! GlusterFS Simple Provisioner
//!
//! Provisions GlusterFS volumes on demand for Kubernetes claims by creating
//! directory bricks on a fixed set of storage hosts, assembling them into a
//! volume and exposing it through an Endpoints/Service pair.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Provision Controller                             │
//! │             (claim / volume watches, retries, metrics)                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                        Volume Orchestrator                              │
//! │   ┌──────────────┐  ┌──────────────┐  ┌──────────────────────────────┐  │
//! │   │    Config    │  │    Brick     │  │        Compensations         │  │
//! │   │   Resolver   │  │   Manager    │  │   (undo journal, rollback)   │  │
//! │   └──────────────┘  └──────┬───────┘  └──────────────────────────────┘  │
//! │                            │                                            │
//! │                   ┌────────┴────────┐                                   │
//! │                   │ Remote Executor │                                   │
//! │                   │ (ordered, fail- │                                   │
//! │                   │  fast, timeout) │                                   │
//! │                   └────────┬────────┘                                   │
//! ├────────────────────────────┼────────────────────────────────────────────┤
//! │   Transports               │              Cluster Registry              │
//! │   ┌──────────┐ ┌─────┐ ┌───┴───┐      ┌─────────────────────────────┐   │
//! │   │ pod exec │ │ ssh │ │ local │      │ Endpoints / Service /       │   │
//! │   └──────────┘ └─────┘ └───────┘      │ StorageClass lookup         │   │
//! │                                       └─────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`provisioner`]: parameter resolution, bricks, orchestration
//! - [`transport`]: ways of running commands on storage hosts
//! - [`registry`]: Kubernetes-backed endpoint registry and class lookup
//! - [`controller`]: claim/volume watch loop
//! - [`domain`]: data model and ports
//! - [`error`]: Error types and handling

pub mod controller;
pub mod domain;
pub mod error;
pub mod provisioner;
pub mod registry;
pub mod transport;

// Re-export commonly used types
pub use controller::{ControllerConfig, Metrics, ProvisionController};

pub use domain::ports::{
    BrickRoot, BrickTarget, ClassResolver, CommandOutput, CommandTransport, EndpointRegistry,
    ProvisionerConfig, VolumeHandle, VolumeRequest,
};

pub use error::{Error, ErrorAction, Result};

pub use provisioner::{
    BrickManager, Compensations, ConfigResolver, ExecutorConfig, ProvisionOptions,
    RemoteExecutor, VolumeOrchestrator,
};

pub use registry::KubeRegistry;

pub use transport::{LocalTransport, PodExecTransport, SshConfig, SshTransport, TransportFactory};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
