//! Provisioner metrics

use crate::error::{Error, Result};
use prometheus::{IntCounterVec, Opts, Registry};

/// Outcome counters for provision and delete operations
#[derive(Clone)]
pub struct Metrics {
    provisions: IntCounterVec,
    deletes: IntCounterVec,
}

impl Metrics {
    /// Create the counters and register them with `registry`
    pub fn register(registry: &Registry) -> Result<Self> {
        let provisions = IntCounterVec::new(
            Opts::new("glusterfs_provision_total", "Provision attempts by result"),
            &["result"],
        )
        .map_err(metrics_error)?;
        let deletes = IntCounterVec::new(
            Opts::new("glusterfs_delete_total", "Delete attempts by result"),
            &["result"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(provisions.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(deletes.clone()))
            .map_err(metrics_error)?;

        Ok(Self { provisions, deletes })
    }

    pub fn record_provision(&self, ok: bool) {
        self.provisions.with_label_values(&[outcome(ok)]).inc();
    }

    pub fn record_delete(&self, ok: bool) {
        self.deletes.with_label_values(&[outcome(ok)]).inc();
    }

    pub fn provisions(&self, ok: bool) -> u64 {
        self.provisions.with_label_values(&[outcome(ok)]).get()
    }

    pub fn deletes(&self, ok: bool) -> u64 {
        self.deletes.with_label_values(&[outcome(ok)]).get()
    }
}

fn outcome(ok: bool) -> &'static str {
    if ok {
        "success"
    } else {
        "failure"
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registration failed: {}", e))
}
