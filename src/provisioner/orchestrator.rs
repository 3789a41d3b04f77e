//! Volume Orchestrator
//!
//! Drives the full provision and delete workflows:
//! - resolves storage class parameters
//! - creates bricks on every host
//! - assembles and starts the gluster volume on the coordinating host
//! - registers the endpoint service that exposes it
//!
//! A failure after any side effect rolls back everything this request
//! created before the error is returned.

use crate::domain::ports::{
    BrickTarget, ClassResolverRef, EndpointRegistryRef, ProvisionerConfig, VolumeHandle,
    VolumeRequest,
};
use crate::error::{Error, Result};
use crate::provisioner::bricks::BrickManager;
use crate::provisioner::commands;
use crate::provisioner::compensation::{Compensations, Compensator, UndoAction};
use crate::provisioner::config::ConfigResolver;
use crate::provisioner::executor::RemoteExecutor;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    GlusterfsPersistentVolumeSource, ObjectReference, PersistentVolume, PersistentVolumeClaim,
    PersistentVolumeSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

// =============================================================================
// Constants
// =============================================================================

/// Prefix of the Endpoints/Service exposing a volume
pub const ENDPOINT_PREFIX: &str = "glusterfs-dynamic-";

pub const ANN_CREATED_BY: &str = "kubernetes.io/createdby";
pub const CREATED_BY: &str = "glusterfs-simple-provisioner";
pub const ANN_PROVISIONER_ID: &str = "Provisioner_Id";
pub const ANN_PROVISIONED_BY: &str = "pv.kubernetes.io/provisioned-by";

/// Name of the endpoint service for a volume
pub fn endpoint_name(volume_name: &str) -> String {
    format!("{}{}", ENDPOINT_PREFIX, volume_name)
}

// =============================================================================
// Provision Options
// =============================================================================

/// Everything the provisioning framework hands over for one claim
#[derive(Debug, Clone)]
pub struct ProvisionOptions {
    /// Name of the volume to create
    pub pv_name: String,
    pub claim: PersistentVolumeClaim,
    /// Storage class parameters
    pub parameters: BTreeMap<String, String>,
    pub storage_class: String,
    pub reclaim_policy: Option<String>,
    pub mount_options: Option<Vec<String>>,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Top-level provision/delete workflow
pub struct VolumeOrchestrator {
    /// Fixed for the life of the process
    identity: String,
    executor: RemoteExecutor,
    bricks: BrickManager,
    endpoints: EndpointRegistryRef,
    classes: ClassResolverRef,
}

impl VolumeOrchestrator {
    pub fn new(
        identity: impl Into<String>,
        executor: RemoteExecutor,
        endpoints: EndpointRegistryRef,
        classes: ClassResolverRef,
    ) -> Self {
        Self {
            identity: identity.into(),
            bricks: BrickManager::new(executor.clone()),
            executor,
            endpoints,
            classes,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Provision a volume for a claim
    pub async fn provision(&self, options: &ProvisionOptions) -> Result<VolumeHandle> {
        let claim_name = options.claim.metadata.name.clone().unwrap_or_default();
        let namespace = options.claim.metadata.namespace.clone().ok_or_else(|| {
            Error::InvalidParameter(format!("claim {} has no namespace", claim_name))
        })?;

        info!("Provisioning volume {} for claim {}/{}", options.pv_name, namespace, claim_name);

        let has_selector = options
            .claim
            .spec
            .as_ref()
            .map(|spec| spec.selector.is_some())
            .unwrap_or(false);
        if has_selector {
            return Err(Error::UnsupportedSelector {
                claim: format!("{}/{}", namespace, claim_name),
            });
        }

        let config = ConfigResolver::resolve(&options.parameters)?;
        let request = VolumeRequest::new(namespace, options.pv_name.clone(), config);

        self.provision_request(&request, &claim_name).await
    }

    /// Create bricks, volume and endpoint for an already resolved request
    pub async fn provision_request(&self, request: &VolumeRequest, claim_name: &str) -> Result<VolumeHandle> {
        let mut journal = Compensations::new();

        match self.assemble(request, claim_name, &mut journal).await {
            Ok(handle) => {
                journal.commit();
                info!(
                    "Provisioned volume {} with {} bricks",
                    handle.volume_name,
                    handle.bricks.len()
                );
                Ok(handle)
            }
            Err(e) => {
                error!("Provisioning volume {} failed: {}", request.name, e);
                let failed = journal.rollback(self, &request.config).await;
                if failed > 0 {
                    warn!(
                        "Rollback of volume {} left {} step(s) undone",
                        request.name, failed
                    );
                }
                Err(Error::ProvisioningFailed {
                    volume: request.name.clone(),
                    source: Box::new(e),
                })
            }
        }
    }

    async fn assemble(
        &self,
        request: &VolumeRequest,
        claim_name: &str,
        journal: &mut Compensations,
    ) -> Result<VolumeHandle> {
        let cfg = &request.config;
        let bricks = self
            .bricks
            .create_bricks(&request.namespace, &request.name, cfg, journal)
            .await?;

        let coordinator = cfg.coordinator().host.clone();
        let created = self
            .executor
            .execute(
                &coordinator,
                &[commands::volume_create(&request.name, cfg.volume_type(), &bricks)],
                cfg,
            )
            .await;
        // a timed out create may still register the volume
        if created.is_ok() || matches!(created, Err(Error::ExecTimeout { .. })) {
            journal.record(UndoAction::DeleteVolume {
                host: coordinator.clone(),
                name: request.name.clone(),
            });
        }
        created?;

        self.executor
            .execute(&coordinator, &[commands::volume_start(&request.name)], cfg)
            .await?;

        let endpoint = endpoint_name(&request.name);
        self.endpoints
            .create_endpoint(&request.namespace, &endpoint, claim_name, &brick_hosts(&bricks))
            .await?;

        Ok(VolumeHandle {
            volume_name: request.name.clone(),
            endpoint_name: endpoint,
            namespace: request.namespace.clone(),
            bricks: bricks.iter().map(BrickTarget::brick_spec).collect(),
            provisioner_identity: self.identity.clone(),
            created_at: chrono::Utc::now(),
        })
    }

    /// Delete a volume this provisioner created
    pub async fn delete(&self, volume: &PersistentVolume) -> Result<()> {
        let name = volume
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::InvalidParameter("volume has no name".into()))?;

        info!("Deleting volume {}", name);

        let params = self.classes.parameters_for_volume(volume).await?;
        let config = ConfigResolver::resolve(&params)?;

        let claim = volume
            .spec
            .as_ref()
            .and_then(|spec| spec.claim_ref.as_ref())
            .ok_or_else(|| {
                error!("Volume {} has no claim reference", name);
                Error::MissingClaimReference { volume: name.clone() }
            })?;
        let namespace = claim
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| {
                error!("Claim reference of volume {} has no namespace", name);
                Error::MissingNamespace { volume: name.clone() }
            })?;

        self.delete_request(&VolumeRequest::new(namespace, name, config)).await
    }

    /// Tear down volume, endpoint and bricks; stops at the first failing step
    pub async fn delete_request(&self, request: &VolumeRequest) -> Result<()> {
        let cfg = &request.config;
        let fail = |step: &str, e: Error| {
            error!("Deleting volume {} failed at {}: {}", request.name, step, e);
            Error::DeleteFailed {
                volume: request.name.clone(),
                step: step.to_string(),
                source: Box::new(e),
            }
        };

        let coordinator = &cfg.coordinator().host;
        self.stop_volume(coordinator, &request.name, cfg)
            .await
            .map_err(|e| fail("volume stop", e))?;
        self.run_tolerating_absence(coordinator, &commands::volume_delete(&request.name), cfg)
            .await
            .map_err(|e| fail("volume delete", e))?;

        let endpoint = endpoint_name(&request.name);
        match self.endpoints.delete_endpoint(&request.namespace, &endpoint).await {
            Err(e) if !e.is_not_found() => return Err(fail("endpoint delete", e)),
            _ => {}
        }

        self.bricks
            .delete_bricks(&request.namespace, &request.name, cfg)
            .await
            .map_err(|e| fail("brick removal", e))?;

        info!("Deleted volume {}", request.name);
        Ok(())
    }

    /// Stop a volume; one that is already stopped or gone counts as stopped
    async fn stop_volume(&self, host: &str, name: &str, cfg: &ProvisionerConfig) -> Result<()> {
        match self.run_tolerating_absence(host, &commands::volume_stop(name), cfg).await {
            Err(e) if e.is_not_started() => {
                info!("Volume {} is not started", name);
                Ok(())
            }
            other => other,
        }
    }

    async fn run_tolerating_absence(&self, host: &str, command: &str, cfg: &ProvisionerConfig) -> Result<()> {
        match self.executor.execute(host, &[command], cfg).await {
            Err(e) if e.is_not_found() => {
                info!("Skipping `{}`: {}", command, e);
                Ok(())
            }
            other => other,
        }
    }
}

#[async_trait]
impl Compensator for VolumeOrchestrator {
    async fn undo(&self, action: &UndoAction, cfg: &ProvisionerConfig) -> Result<()> {
        match action {
            UndoAction::RemoveBrick(target) => self.bricks.remove_brick(target, cfg).await,
            UndoAction::ReleaseBrick(target) => self.bricks.release_brick(target, cfg).await,
            UndoAction::DeleteVolume { host, name } => {
                if let Err(e) = self.stop_volume(host, name, cfg).await {
                    warn!("Could not stop volume {} before deleting it: {}", name, e);
                }
                self.run_tolerating_absence(host, &commands::volume_delete(name), cfg).await
            }
        }
    }
}

/// Distinct brick hosts in brick order
fn brick_hosts(bricks: &[BrickTarget]) -> Vec<String> {
    let mut hosts: Vec<String> = Vec::with_capacity(bricks.len());
    for brick in bricks {
        if !hosts.contains(&brick.host) {
            hosts.push(brick.host.clone());
        }
    }
    hosts
}

// =============================================================================
// PersistentVolume
// =============================================================================

impl VolumeHandle {
    /// Build the PersistentVolume that binds this volume to its claim
    pub fn to_persistent_volume(&self, options: &ProvisionOptions, provisioner_name: &str) -> PersistentVolume {
        let claim_spec = options.claim.spec.clone().unwrap_or_default();

        let mut annotations = BTreeMap::new();
        annotations.insert(ANN_CREATED_BY.to_string(), CREATED_BY.to_string());
        annotations.insert(ANN_PROVISIONER_ID.to_string(), self.provisioner_identity.clone());
        annotations.insert(ANN_PROVISIONED_BY.to_string(), provisioner_name.to_string());

        let capacity = claim_spec
            .resources
            .and_then(|r| r.requests)
            .and_then(|requests| requests.get("storage").cloned())
            .map(|storage| BTreeMap::from([("storage".to_string(), storage)]));

        PersistentVolume {
            metadata: ObjectMeta {
                name: Some(self.volume_name.clone()),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(PersistentVolumeSpec {
                access_modes: claim_spec.access_modes,
                capacity,
                claim_ref: Some(ObjectReference {
                    api_version: Some("v1".into()),
                    kind: Some("PersistentVolumeClaim".into()),
                    name: options.claim.metadata.name.clone(),
                    namespace: options.claim.metadata.namespace.clone(),
                    uid: options.claim.metadata.uid.clone(),
                    resource_version: options.claim.metadata.resource_version.clone(),
                    ..Default::default()
                }),
                glusterfs: Some(GlusterfsPersistentVolumeSource {
                    endpoints: self.endpoint_name.clone(),
                    endpoints_namespace: Some(self.namespace.clone()),
                    path: self.volume_name.clone(),
                    read_only: None,
                }),
                mount_options: options.mount_options.clone(),
                persistent_volume_reclaim_policy: Some(
                    options.reclaim_policy.clone().unwrap_or_else(|| "Delete".into()),
                ),
                storage_class_name: Some(options.storage_class.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}
