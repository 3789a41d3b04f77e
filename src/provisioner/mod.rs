//! Provisioning Engine
//!
//! The multi-host provision/deprovision workflow, leaves first:
//! parameter resolution, the fail-fast remote executor, brick management,
//! compensation and the orchestrator that ties them together.

pub mod bricks;
pub mod commands;
pub mod compensation;
pub mod config;
pub mod executor;
pub mod orchestrator;

pub use bricks::BrickManager;
pub use compensation::{Compensations, Compensator, UndoAction};
pub use config::ConfigResolver;
pub use executor::{ExecutorConfig, RemoteExecutor};
pub use orchestrator::*;
