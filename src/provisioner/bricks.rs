//! Brick Manager
//!
//! Creates and removes the per-host brick directories of a volume. Hosts are
//! visited in configuration order and the first failing host stops the walk.

use crate::domain::ports::{BrickTarget, ProvisionerConfig};
use crate::error::{Error, Result};
use crate::provisioner::commands;
use crate::provisioner::compensation::{Compensations, UndoAction};
use crate::provisioner::executor::RemoteExecutor;
use tracing::{debug, error, info};

/// Creates and removes brick directories across all configured hosts
#[derive(Clone)]
pub struct BrickManager {
    executor: RemoteExecutor,
}

impl BrickManager {
    pub fn new(executor: RemoteExecutor) -> Self {
        Self { executor }
    }

    /// Create `<root>/<namespace>/<name>` on every host
    ///
    /// `mkdir <brickDir>` fails on an existing directory, so a name clash
    /// with another volume surfaces as an error instead of a shared brick.
    /// Every brick created here is recorded in `journal`; the host that
    /// failed is not, since its directory may belong to someone else. A
    /// timed out `mkdir <brickDir>` may still complete on the host, so it is
    /// recorded as a release that only removes an empty directory.
    pub async fn create_bricks(
        &self,
        namespace: &str,
        name: &str,
        cfg: &ProvisionerConfig,
        journal: &mut Compensations,
    ) -> Result<Vec<BrickTarget>> {
        let mut created = Vec::with_capacity(cfg.brick_roots().len());

        for root in cfg.brick_roots() {
            let target = BrickTarget::for_root(root, namespace, name);
            let cmds = [commands::make_parent_dir(&target), commands::make_brick_dir(&target)];

            if let Err(e) = self.executor.execute(&target.host, &cmds, cfg).await {
                error!("Failed to create brick {}: {}", target.brick_spec(), e);
                if matches!(&e, Error::ExecTimeout { command, .. } if *command == cmds[1]) {
                    journal.record(UndoAction::ReleaseBrick(target));
                }
                return Err(e);
            }

            debug!("Created brick {}", target.brick_spec());
            journal.record(UndoAction::RemoveBrick(target.clone()));
            created.push(target);
        }

        info!("Created {} bricks for {}/{}", created.len(), namespace, name);
        Ok(created)
    }

    /// Remove the brick of `<namespace>/<name>` from every host
    ///
    /// Missing bricks are not an error, so repeating a delete succeeds.
    pub async fn delete_bricks(&self, namespace: &str, name: &str, cfg: &ProvisionerConfig) -> Result<()> {
        for root in cfg.brick_roots() {
            let target = BrickTarget::for_root(root, namespace, name);
            self.remove_brick(&target, cfg).await?;
        }

        info!("Removed bricks for {}/{}", namespace, name);
        Ok(())
    }

    /// Remove one brick, then its namespace directory if that is now empty
    pub async fn remove_brick(&self, target: &BrickTarget, cfg: &ProvisionerConfig) -> Result<()> {
        self.executor
            .execute(&target.host, &[commands::remove_brick_dir(target)], cfg)
            .await
            .map_err(|e| {
                error!("Failed to remove brick {}: {}", target.brick_spec(), e);
                e
            })?;

        // rmdir refuses non-empty directories; other volumes keep the parent alive
        if let Err(e) = self
            .executor
            .execute(&target.host, &[commands::remove_parent_dir(target)], cfg)
            .await
        {
            debug!("Kept {}:{}: {}", target.host, target.parent_dir.display(), e);
        }

        debug!("Removed brick {}", target.brick_spec());
        Ok(())
    }

    /// Remove a brick only if it is still empty, then its namespace directory
    pub async fn release_brick(&self, target: &BrickTarget, cfg: &ProvisionerConfig) -> Result<()> {
        match self
            .executor
            .execute(&target.host, &[commands::remove_empty_brick_dir(target)], cfg)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => {
                error!("Failed to release brick {}: {}", target.brick_spec(), e);
                return Err(e);
            }
        }

        if let Err(e) = self
            .executor
            .execute(&target.host, &[commands::remove_parent_dir(target)], cfg)
            .await
        {
            debug!("Kept {}:{}: {}", target.host, target.parent_dir.display(), e);
        }

        debug!("Released brick {}", target.brick_spec());
        Ok(())
    }
}
