//! Pod Exec Transport
//!
//! Runs commands inside the storage-node pod scheduled on the target host.
//! Pods are found in the config's namespace with its label selector, then
//! matched to the host by node name, host IP, pod IP or pod name.

use crate::domain::ports::{CommandOutput, CommandTransport, ProvisionerConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams, ListParams};
use kube::Client;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Transport that execs into storage-node pods
pub struct PodExecTransport {
    client: Client,
}

impl PodExecTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn find_pod(&self, host: &str, config: &ProvisionerConfig) -> Result<(Api<Pod>, String, Option<String>)> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), config.namespace());
        let list = pods
            .list(&ListParams::default().labels(config.label_selector()))
            .await?;

        let pod = pod_for_host(&list.items, host).ok_or_else(|| Error::ResourceNotFound {
            kind: "Pod".into(),
            name: format!(
                "{}/{} on host {}",
                config.namespace(),
                config.label_selector(),
                host
            ),
        })?;

        let name = pod.metadata.name.clone().unwrap_or_default();
        let container = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.containers.first())
            .map(|c| c.name.clone());
        Ok((pods, name, container))
    }
}

/// First pod that runs on, or is addressed as, `host`
fn pod_for_host<'a>(pods: &'a [Pod], host: &str) -> Option<&'a Pod> {
    pods.iter().find(|pod| {
        let on_node = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.as_deref())
            .map_or(false, |n| n == host);
        let by_ip = pod.status.as_ref().map_or(false, |s| {
            s.host_ip.as_deref() == Some(host) || s.pod_ip.as_deref() == Some(host)
        });
        let by_name = pod.metadata.name.as_deref() == Some(host);
        on_node || by_ip || by_name
    })
}

/// Exit code carried in an exec status
fn exit_code(status: Option<&Status>) -> Option<i32> {
    let status = status?;
    if status.status.as_deref() == Some("Success") {
        return Some(0);
    }
    status
        .details
        .as_ref()
        .and_then(|d| d.causes.as_ref())
        .and_then(|causes| {
            causes
                .iter()
                .find(|c| c.reason.as_deref() == Some("ExitCode"))
                .and_then(|c| c.message.as_deref())
                .and_then(|m| m.parse().ok())
        })
        .or(Some(1))
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<String> {
    let mut buf = String::new();
    if let Some(mut reader) = reader {
        reader.read_to_string(&mut buf).await?;
    }
    Ok(buf)
}

#[async_trait]
impl CommandTransport for PodExecTransport {
    async fn run(&self, host: &str, command: &str, config: &ProvisionerConfig) -> Result<CommandOutput> {
        let (pods, pod_name, container) = self.find_pod(host, config).await?;
        debug!("exec in pod {} for {}: {}", pod_name, host, command);

        let mut params = AttachParams::default().stdin(false).stdout(true).stderr(true);
        if let Some(container) = container {
            params = params.container(container);
        }

        let mut attached = pods.exec(&pod_name, vec!["sh", "-c", command], &params).await?;
        let status = attached.take_status();
        let (stdout, stderr) = tokio::try_join!(read_all(attached.stdout()), read_all(attached.stderr()))?;
        let status = match status {
            Some(status) => status.await,
            None => None,
        };
        attached
            .join()
            .await
            .map_err(|e| Error::Transport(format!("exec in pod {} failed: {}", pod_name, e)))?;

        Ok(CommandOutput {
            exit_code: exit_code(status.as_ref()),
            stdout,
            stderr,
        })
    }

    fn name(&self) -> &str {
        "pod-exec"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, StatusCause, StatusDetails};

    fn pod(name: &str, node: &str, host_ip: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some(node.into()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                host_ip: Some(host_ip.into()),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_pod_for_host() {
        let pods = vec![
            pod("glusterfs-a", "node-1", "10.0.0.1"),
            pod("glusterfs-b", "node-2", "10.0.0.2"),
        ];

        let name = |p: Option<&Pod>| p.and_then(|p| p.metadata.name.clone());
        assert_eq!(name(pod_for_host(&pods, "node-2")), Some("glusterfs-b".into()));
        assert_eq!(name(pod_for_host(&pods, "10.0.0.1")), Some("glusterfs-a".into()));
        assert_eq!(name(pod_for_host(&pods, "glusterfs-b")), Some("glusterfs-b".into()));
        assert!(pod_for_host(&pods, "node-3").is_none());
    }

    #[test]
    fn test_exit_code_from_status() {
        let success = Status {
            status: Some("Success".into()),
            ..Default::default()
        };
        assert_eq!(exit_code(Some(&success)), Some(0));

        let failure = Status {
            status: Some("Failure".into()),
            details: Some(StatusDetails {
                causes: Some(vec![StatusCause {
                    reason: Some("ExitCode".into()),
                    message: Some("2".into()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(exit_code(Some(&failure)), Some(2));

        let bare = Status {
            status: Some("Failure".into()),
            ..Default::default()
        };
        assert_eq!(exit_code(Some(&bare)), Some(1));
        assert_eq!(exit_code(None), None);
    }
}
