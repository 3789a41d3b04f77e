//! Compensating actions for partially completed provisioning
//!
//! Each successful step records how to undo itself. On a later failure the
//! recorded actions run newest first; an action that fails is logged and
//! the rest still run.

use crate::domain::ports::{BrickTarget, ProvisionerConfig};
use crate::error::Result;
use async_trait::async_trait;
use tracing::{info, warn};

/// One step that has to be reversed on rollback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoAction {
    /// Remove a brick directory this request created
    RemoveBrick(BrickTarget),
    /// Remove a brick directory only if it is empty
    ///
    /// Recorded when `mkdir <brickDir>` timed out: the directory may be ours
    /// or may have been there before, and only an empty one is safe to drop.
    ReleaseBrick(BrickTarget),
    /// Stop and delete an assembled volume
    DeleteVolume { host: String, name: String },
}

impl std::fmt::Display for UndoAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UndoAction::RemoveBrick(target) => write!(f, "remove brick {}", target.brick_spec()),
            UndoAction::ReleaseBrick(target) => write!(f, "release brick {}", target.brick_spec()),
            UndoAction::DeleteVolume { host, name } => write!(f, "delete volume {} via {}", name, host),
        }
    }
}

/// Something that knows how to perform an [`UndoAction`]
#[async_trait]
pub trait Compensator: Send + Sync {
    async fn undo(&self, action: &UndoAction, cfg: &ProvisionerConfig) -> Result<()>;
}

/// Ordered journal of undo actions for one request
#[derive(Debug, Default)]
pub struct Compensations {
    actions: Vec<UndoAction>,
}

impl Compensations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, action: UndoAction) {
        self.actions.push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[UndoAction] {
        &self.actions
    }

    /// Forget the journal once the request succeeded
    pub fn commit(mut self) {
        self.actions.clear();
    }

    /// Run every recorded action in reverse order
    ///
    /// Returns how many actions failed.
    pub async fn rollback(mut self, compensator: &dyn Compensator, cfg: &ProvisionerConfig) -> usize {
        let mut failed = 0;
        while let Some(action) = self.actions.pop() {
            match compensator.undo(&action, cfg).await {
                Ok(()) => info!("Rolled back: {}", action),
                Err(e) => {
                    failed += 1;
                    warn!("Rollback step failed ({}): {}", action, e);
                }
            }
        }
        failed
    }
}
