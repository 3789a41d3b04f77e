//! Cluster Registry Adapters
//!
//! Implements the endpoint registry and storage class lookup ports on top
//! of the Kubernetes API.

pub mod kubernetes;

pub use kubernetes::*;
