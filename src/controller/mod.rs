//! Provision Controller
//!
//! Watches claims and volumes and hands matching work to the
//! [`VolumeOrchestrator`]:
//! - a Pending, unbound claim whose StorageClass names this provisioner is
//!   provisioned and bound to a new PersistentVolume
//! - a Released volume with reclaim policy `Delete` that this provisioner
//!   created is deleted together with its PersistentVolume

pub mod metrics;

pub use metrics::Metrics;

use crate::domain::ports::VolumeRequest;
use crate::error::{Error, ErrorAction, Result};
use crate::provisioner::config::ConfigResolver;
use crate::provisioner::orchestrator::{ProvisionOptions, VolumeOrchestrator, ANN_PROVISIONED_BY};
use crate::registry::KubeRegistry;
use futures::{Future, StreamExt};
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use kube::api::{Api, DeleteParams, PostParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Legacy annotation naming a claim's storage class
const ANN_CLAIM_STORAGE_CLASS: &str = "volume.beta.kubernetes.io/storage-class";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the provision controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Provisioner name StorageClasses refer to
    pub provisioner_name: String,
    /// Attempts per claim or volume before giving up until the next event
    pub max_attempts: u32,
    /// First retry delay, doubled on every attempt
    pub retry_base_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            provisioner_name: "gluster.org/glusterfs-simple".to_string(),
            max_attempts: 5,
            retry_base_delay: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Drives the orchestrator from claim and volume events
pub struct ProvisionController {
    config: ControllerConfig,
    client: Client,
    registry: KubeRegistry,
    orchestrator: Arc<VolumeOrchestrator>,
    metrics: Metrics,
    /// Claims and volumes currently being worked on
    in_flight: Mutex<HashSet<String>>,
}

impl ProvisionController {
    pub fn new(
        config: ControllerConfig,
        client: Client,
        orchestrator: Arc<VolumeOrchestrator>,
        metrics: Metrics,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry: KubeRegistry::new(client.clone()),
            client,
            orchestrator,
            metrics,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// Watch claims and volumes until either watch ends
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!(
            "Provision controller started for {}",
            self.config.provisioner_name
        );
        tokio::select! {
            _ = self.clone().watch_claims() => {}
            _ = self.clone().watch_volumes() => {}
        }
        Err(Error::Internal("watch stream ended".into()))
    }

    async fn watch_claims(self: Arc<Self>) {
        let claims: Api<PersistentVolumeClaim> = Api::all(self.client.clone());
        let mut stream = watcher(claims, watcher::Config::default())
            .default_backoff()
            .applied_objects()
            .boxed();

        while let Some(event) = stream.next().await {
            match event {
                Ok(claim) => {
                    if is_pending_unbound(&claim) {
                        let this = self.clone();
                        tokio::spawn(async move { this.handle_claim(claim).await });
                    }
                }
                Err(e) => warn!("Claim watch error: {}", e),
            }
        }
    }

    async fn watch_volumes(self: Arc<Self>) {
        let volumes: Api<PersistentVolume> = Api::all(self.client.clone());
        let mut stream = watcher(volumes, watcher::Config::default())
            .default_backoff()
            .applied_objects()
            .boxed();

        while let Some(event) = stream.next().await {
            match event {
                Ok(volume) => {
                    if should_delete(&volume, &self.config.provisioner_name) {
                        let this = self.clone();
                        tokio::spawn(async move { this.handle_volume(volume).await });
                    }
                }
                Err(e) => warn!("Volume watch error: {}", e),
            }
        }
    }

    async fn handle_claim(self: Arc<Self>, claim: PersistentVolumeClaim) {
        let Some(pv_name) = volume_name_for_claim(&claim) else {
            return;
        };
        let Some(_guard) = InFlight::claim(&self.in_flight, format!("claim/{}", pv_name)) else {
            debug!("Claim for {} already in progress", pv_name);
            return;
        };

        let outcome = self
            .with_retries(&pv_name, || self.provision_claim(&claim, &pv_name))
            .await;
        if let Some(ok) = outcome {
            self.metrics.record_provision(ok);
        }
    }

    async fn handle_volume(self: Arc<Self>, volume: PersistentVolume) {
        let name = volume.metadata.name.clone().unwrap_or_default();
        let Some(_guard) = InFlight::claim(&self.in_flight, format!("volume/{}", name)) else {
            debug!("Delete of {} already in progress", name);
            return;
        };

        let outcome = self.with_retries(&name, || self.delete_volume(&volume)).await;
        if let Some(ok) = outcome {
            self.metrics.record_delete(ok);
        }
    }

    /// Returns `None` when the claim or volume turned out not to be ours
    async fn provision_claim(&self, claim: &PersistentVolumeClaim, pv_name: &str) -> Result<Option<()>> {
        let Some(class_name) = claim_storage_class(claim) else {
            return Ok(None);
        };
        let class = self.registry.storage_class(&class_name).await?;
        if class.provisioner != self.config.provisioner_name {
            return Ok(None);
        }

        let volumes: Api<PersistentVolume> = Api::all(self.client.clone());
        if volumes.get_opt(pv_name).await?.is_some() {
            debug!("Volume {} already exists", pv_name);
            return Ok(None);
        }

        let options = ProvisionOptions {
            pv_name: pv_name.to_string(),
            claim: claim.clone(),
            parameters: class.parameters.unwrap_or_default(),
            storage_class: class_name,
            reclaim_policy: class.reclaim_policy,
            mount_options: class.mount_options,
        };

        let handle = self.orchestrator.provision(&options).await?;
        let pv = handle.to_persistent_volume(&options, &self.config.provisioner_name);

        if let Err(e) = volumes.create(&PostParams::default(), &pv).await {
            error!("Failed to create PersistentVolume {}: {}", pv_name, e);
            let config = ConfigResolver::resolve(&options.parameters)?;
            let request = VolumeRequest::new(handle.namespace.clone(), handle.volume_name.clone(), config);
            if let Err(cleanup) = self.orchestrator.delete_request(&request).await {
                warn!("Failed to clean up volume {}: {}", pv_name, cleanup);
            }
            return Err(e.into());
        }

        info!("Bound volume {} to claim", pv_name);
        Ok(Some(()))
    }

    async fn delete_volume(&self, volume: &PersistentVolume) -> Result<Option<()>> {
        let name = volume.metadata.name.clone().unwrap_or_default();
        self.orchestrator.delete(volume).await?;

        let volumes: Api<PersistentVolume> = Api::all(self.client.clone());
        match volumes.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(resp)) if resp.code == 404 => {}
            Err(e) => return Err(e.into()),
        }

        info!("Deleted PersistentVolume {}", name);
        Ok(Some(()))
    }

    /// Retry `op` as the error's [`ErrorAction`] allows
    ///
    /// Yields the final success flag, or `None` if the work was not ours.
    async fn with_retries<F, Fut>(&self, what: &str, mut op: F) -> Option<bool>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<()>>>,
    {
        let mut delay = self.config.retry_base_delay;
        for attempt in 1..=self.config.max_attempts {
            let err = match op().await {
                Ok(done) => return done.map(|_| true),
                Err(e) => e,
            };

            let wait = match err.action() {
                ErrorAction::NoRequeue => {
                    error!("{}: {} (not retrying)", what, err);
                    return Some(false);
                }
                ErrorAction::RequeueAfter(wait) => wait,
                ErrorAction::RequeueWithBackoff => delay,
            };
            if attempt == self.config.max_attempts {
                error!("{}: {} (giving up after {} attempts)", what, err, attempt);
                break;
            }

            warn!("{}: {} (attempt {}, retrying in {:?})", what, err, attempt, wait);
            tokio::time::sleep(wait).await;
            delay *= 2;
        }
        Some(false)
    }
}

/// Marks a key as in progress until dropped
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    key: String,
}

impl<'a> InFlight<'a> {
    fn claim(set: &'a Mutex<HashSet<String>>, key: String) -> Option<Self> {
        if set.lock().insert(key.clone()) {
            Some(Self { set, key })
        } else {
            None
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

// =============================================================================
// Event Filters
// =============================================================================

/// Storage class requested by a claim, from spec or legacy annotation
pub fn claim_storage_class(claim: &PersistentVolumeClaim) -> Option<String> {
    claim
        .spec
        .as_ref()
        .and_then(|spec| spec.storage_class_name.clone())
        .filter(|name| !name.is_empty())
        .or_else(|| {
            claim
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(ANN_CLAIM_STORAGE_CLASS).cloned())
        })
}

/// Pending and not yet bound to any volume
pub fn is_pending_unbound(claim: &PersistentVolumeClaim) -> bool {
    let pending = claim
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map_or(true, |phase| phase == "Pending");
    let unbound = claim
        .spec
        .as_ref()
        .and_then(|s| s.volume_name.as_deref())
        .map_or(true, str::is_empty);
    pending && unbound
}

/// Volume name derived from the claim's UID
pub fn volume_name_for_claim(claim: &PersistentVolumeClaim) -> Option<String> {
    claim.metadata.uid.as_ref().map(|uid| format!("pvc-{}", uid))
}

/// Released, reclaim policy Delete, and created by `provisioner_name`
pub fn should_delete(volume: &PersistentVolume, provisioner_name: &str) -> bool {
    let released = volume
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        == Some("Released");
    let reclaim_delete = volume
        .spec
        .as_ref()
        .and_then(|s| s.persistent_volume_reclaim_policy.as_deref())
        == Some("Delete");
    let ours = volume
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANN_PROVISIONED_BY))
        .map_or(false, |p| p == provisioner_name);
    released && reclaim_delete && ours
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        PersistentVolumeClaimSpec, PersistentVolumeClaimStatus, PersistentVolumeSpec,
        PersistentVolumeStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    const PROVISIONER: &str = "gluster.org/glusterfs-simple";

    fn claim(phase: Option<&str>, volume_name: Option<&str>, class: Option<&str>) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("claim1".into()),
                namespace: Some("ns1".into()),
                uid: Some("1234".into()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                volume_name: volume_name.map(String::from),
                storage_class_name: class.map(String::from),
                ..Default::default()
            }),
            status: Some(PersistentVolumeClaimStatus {
                phase: phase.map(String::from),
                ..Default::default()
            }),
        }
    }

    fn volume(phase: &str, policy: &str, provisioned_by: Option<&str>) -> PersistentVolume {
        PersistentVolume {
            metadata: ObjectMeta {
                name: Some("pvc-1234".into()),
                annotations: provisioned_by
                    .map(|p| BTreeMap::from([(ANN_PROVISIONED_BY.to_string(), p.to_string())])),
                ..Default::default()
            },
            spec: Some(PersistentVolumeSpec {
                persistent_volume_reclaim_policy: Some(policy.into()),
                ..Default::default()
            }),
            status: Some(PersistentVolumeStatus {
                phase: Some(phase.into()),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_pending_unbound_claims() {
        assert!(is_pending_unbound(&claim(Some("Pending"), None, None)));
        assert!(is_pending_unbound(&claim(None, Some(""), None)));
        assert!(!is_pending_unbound(&claim(Some("Bound"), Some("pvc-1234"), None)));
        assert!(!is_pending_unbound(&claim(Some("Pending"), Some("pv-static"), None)));
    }

    #[test]
    fn test_claim_storage_class() {
        assert_eq!(
            claim_storage_class(&claim(None, None, Some("gluster"))).as_deref(),
            Some("gluster")
        );

        let mut legacy = claim(None, None, None);
        legacy.metadata.annotations = Some(BTreeMap::from([(
            ANN_CLAIM_STORAGE_CLASS.to_string(),
            "old-gluster".to_string(),
        )]));
        assert_eq!(claim_storage_class(&legacy).as_deref(), Some("old-gluster"));
        assert_eq!(claim_storage_class(&claim(None, None, None)), None);
    }

    #[test]
    fn test_volume_name_for_claim() {
        assert_eq!(
            volume_name_for_claim(&claim(None, None, None)).as_deref(),
            Some("pvc-1234")
        );
    }

    #[test]
    fn test_should_delete() {
        assert!(should_delete(&volume("Released", "Delete", Some(PROVISIONER)), PROVISIONER));
        assert!(!should_delete(&volume("Bound", "Delete", Some(PROVISIONER)), PROVISIONER));
        assert!(!should_delete(&volume("Released", "Retain", Some(PROVISIONER)), PROVISIONER));
        assert!(!should_delete(&volume("Released", "Delete", Some("other/provisioner")), PROVISIONER));
        assert!(!should_delete(&volume("Released", "Delete", None), PROVISIONER));
    }

    #[test]
    fn test_in_flight_guard() {
        let set = Mutex::new(HashSet::new());
        let first = InFlight::claim(&set, "claim/pvc-1".into());
        assert!(first.is_some());
        assert!(InFlight::claim(&set, "claim/pvc-1".into()).is_none());
        drop(first);
        assert!(InFlight::claim(&set, "claim/pvc-1".into()).is_some());
    }
}
