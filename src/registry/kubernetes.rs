//! Kubernetes Registry Adapter
//!
//! Registers the Endpoints/Service pair that exposes a gluster volume and
//! resolves a volume back to its StorageClass parameters.

use crate::domain::ports::{ClassResolver, EndpointRegistry};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointPort, EndpointSubset, Endpoints, PersistentVolume, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::{debug, info, warn};

// =============================================================================
// Constants
// =============================================================================

/// Label tying an endpoint service to the claim it was created for
pub const LABEL_PROVISIONED_FOR: &str = "gluster.kubernetes.io/provisioned-for-pvc";

/// Legacy annotation naming a volume's storage class
pub const ANN_STORAGE_CLASS: &str = "volume.beta.kubernetes.io/storage-class";

/// Gluster endpoints need a port, but clients never use it
const PLACEHOLDER_PORT: i32 = 1;

// =============================================================================
// Kube Registry
// =============================================================================

/// Endpoint and storage class access over the Kubernetes API
#[derive(Clone)]
pub struct KubeRegistry {
    client: Client,
}

impl KubeRegistry {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Fetch a storage class by name
    pub async fn storage_class(&self, name: &str) -> Result<StorageClass> {
        let classes: Api<StorageClass> = Api::all(self.client.clone());
        classes
            .get_opt(name)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "StorageClass".into(),
                name: name.into(),
            })
    }
}

/// Resolve each host to an IP address, keeping order
async fn resolve_addresses(hosts: &[String]) -> Result<Vec<String>> {
    let mut addresses = Vec::with_capacity(hosts.len());
    for host in hosts {
        if let Ok(ip) = host.parse::<IpAddr>() {
            addresses.push(ip.to_string());
            continue;
        }
        let ip = tokio::net::lookup_host((host.as_str(), 0))
            .await?
            .next()
            .map(|addr| addr.ip().to_string())
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Address".into(),
                name: host.clone(),
            })?;
        debug!("Resolved {} to {}", host, ip);
        addresses.push(ip);
    }
    Ok(addresses)
}

fn endpoint_meta(namespace: &str, name: &str, claim_name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(BTreeMap::from([(
            LABEL_PROVISIONED_FOR.to_string(),
            claim_name.to_string(),
        )])),
        ..Default::default()
    }
}

fn build_endpoints(namespace: &str, name: &str, claim_name: &str, addresses: &[String]) -> Endpoints {
    Endpoints {
        metadata: endpoint_meta(namespace, name, claim_name),
        subsets: Some(vec![EndpointSubset {
            addresses: Some(
                addresses
                    .iter()
                    .map(|ip| EndpointAddress {
                        ip: ip.clone(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ports: Some(vec![EndpointPort {
                port: PLACEHOLDER_PORT,
                ..Default::default()
            }]),
            ..Default::default()
        }]),
    }
}

fn build_service(namespace: &str, name: &str, claim_name: &str) -> Service {
    Service {
        metadata: endpoint_meta(namespace, name, claim_name),
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                port: PLACEHOLDER_PORT,
                protocol: Some("TCP".into()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Storage class recorded on a volume, from spec or legacy annotation
pub fn storage_class_name(volume: &PersistentVolume) -> Option<String> {
    volume
        .spec
        .as_ref()
        .and_then(|spec| spec.storage_class_name.clone())
        .filter(|name| !name.is_empty())
        .or_else(|| {
            volume
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(ANN_STORAGE_CLASS).cloned())
        })
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409)
}

#[async_trait]
impl EndpointRegistry for KubeRegistry {
    async fn create_endpoint(
        &self,
        namespace: &str,
        name: &str,
        claim_name: &str,
        hosts: &[String],
    ) -> Result<()> {
        let addresses = resolve_addresses(hosts).await?;
        let pp = PostParams::default();

        let endpoints: Api<Endpoints> = Api::namespaced(self.client.clone(), namespace);
        match endpoints
            .create(&pp, &build_endpoints(namespace, name, claim_name, &addresses))
            .await
        {
            Ok(_) => {}
            Err(e) if is_conflict(&e) => info!("Endpoints {}/{} already exist", namespace, name),
            Err(e) => return Err(e.into()),
        }

        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        match services
            .create(&pp, &build_service(namespace, name, claim_name))
            .await
        {
            Ok(_) => {}
            Err(e) if is_conflict(&e) => info!("Service {}/{} already exists", namespace, name),
            Err(e) => {
                if let Err(cleanup) = endpoints.delete(name, &DeleteParams::default()).await {
                    warn!("Failed to remove endpoints {}/{}: {}", namespace, name, cleanup);
                }
                return Err(e.into());
            }
        }

        info!("Created endpoint service {}/{} for {} host(s)", namespace, name, addresses.len());
        Ok(())
    }

    async fn delete_endpoint(&self, namespace: &str, name: &str) -> Result<()> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        match services.delete(name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                debug!("Service {}/{} already gone", namespace, name)
            }
            Err(e) => return Err(e.into()),
        }

        let endpoints: Api<Endpoints> = Api::namespaced(self.client.clone(), namespace);
        match endpoints.delete(name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                debug!("Endpoints {}/{} already gone", namespace, name)
            }
            Err(e) => return Err(e.into()),
        }

        info!("Deleted endpoint service {}/{}", namespace, name);
        Ok(())
    }
}

#[async_trait]
impl ClassResolver for KubeRegistry {
    async fn parameters_for_volume(&self, volume: &PersistentVolume) -> Result<BTreeMap<String, String>> {
        let volume_name = volume.metadata.name.clone().unwrap_or_default();
        let class = storage_class_name(volume).ok_or_else(|| {
            Error::InvalidParameter(format!("volume {} has no storage class", volume_name))
        })?;

        Ok(self.storage_class(&class).await?.parameters.unwrap_or_default())
    }
}
