//! kube-rs backed [`ClusterHandle`]

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, Secret, ServiceAccount};
use kube::api::{Api, AttachParams, DeleteParams, ListParams, ObjectMeta, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use super::{ClusterHandle, ExecOutput, Platform, Unit, UnitPhase};
use crate::{Error, Result};

/// Production cluster handle over a kube [`Client`]
///
/// Node addresses are loaded once at connect time, the same moment the
/// platform is detected.
pub struct KubeCluster {
    client: Client,
    platform: Platform,
    addresses: Vec<String>,
}

impl KubeCluster {
    /// Connect using an explicit kubeconfig path, or kube's default inference
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self> {
        let client = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    Error::Connect(format!(
                        "failed to read kubeconfig {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let config =
                    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await
                        .map_err(|e| Error::Connect(format!("failed to load kubeconfig: {}", e)))?;
                Client::try_from(config)?
            }
            None => Client::try_default().await?,
        };

        Self::from_client(client).await
    }

    /// Wrap an existing client, detecting the platform from its nodes
    pub async fn from_client(client: Client) -> Result<Self> {
        let nodes: Api<Node> = Api::all(client.clone());
        let nodes = nodes.list(&ListParams::default()).await?.items;

        let platform = Platform::detect(&nodes);
        let addresses = platform.external_addresses(&nodes);
        info!(platform = %platform, addresses = ?addresses, "Detected kubernetes platform");

        Ok(Self {
            client,
            platform,
            addresses,
        })
    }

    /// The detected cluster flavor
    pub fn platform(&self) -> Platform {
        self.platform
    }
}

fn unit_from_pod(pod: &Pod) -> Unit {
    let status = pod.status.as_ref();
    let phase = UnitPhase::parse(status.and_then(|s| s.phase.as_deref()));
    let containers_waiting = status
        .and_then(|s| s.container_statuses.as_ref())
        .map(|cs| {
            cs.iter()
                .any(|c| c.state.as_ref().is_some_and(|st| st.waiting.is_some()))
        })
        .unwrap_or(false);

    Unit {
        name: pod.metadata.name.clone().unwrap_or_default(),
        phase,
        containers_waiting,
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 404)
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

#[async_trait]
impl ClusterHandle for KubeCluster {
    async fn list_units(&self, partition: &str, selector: &str) -> Result<Vec<Unit>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), partition);
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(selector);
        }
        let list = pods.list(&params).await?;
        Ok(list.items.iter().map(unit_from_pod).collect())
    }

    async fn get_unit(&self, partition: &str, name: &str) -> Result<Option<Unit>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), partition);
        Ok(pods.get_opt(name).await?.as_ref().map(unit_from_pod))
    }

    async fn partition_exists(&self, name: &str) -> Result<bool> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        Ok(namespaces.get_opt(name).await?.is_some())
    }

    async fn create_partition(&self, name: &str, labels: BTreeMap<String, String>) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };
        namespaces.create(&PostParams::default(), &ns).await?;
        debug!(partition = %name, "Created namespace");
        Ok(())
    }

    async fn delete_partition(&self, name: &str) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        match namespaces.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                debug!(partition = %name, "Deleted namespace");
                Ok(())
            }
            Err(e) if is_not_found(&e) => {
                debug!(partition = %name, "Namespace already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_service_account(&self, partition: &str, name: &str) -> Result<()> {
        let accounts: Api<ServiceAccount> = Api::namespaced(self.client.clone(), partition);
        let sa = ServiceAccount {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        accounts.create(&PostParams::default(), &sa).await?;
        Ok(())
    }

    async fn delete_unit(&self, partition: &str, name: &str) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), partition);
        pods.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn exec(
        &self,
        partition: &str,
        unit: &str,
        container: &str,
        command: &[String],
        stdin: Option<Vec<u8>>,
    ) -> Result<ExecOutput> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), partition);
        let params = AttachParams::default()
            .container(container)
            .stdin(stdin.is_some())
            .stdout(true)
            .stderr(true);

        debug!(partition = %partition, unit = %unit, command = ?command, "Exec in pod");
        let mut attached = pods.exec(unit, command.to_vec(), &params).await?;

        let mut writer = attached.stdin();
        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let status = attached.take_status();

        let write = async move {
            if let (Some(w), Some(input)) = (writer.as_mut(), stdin.as_deref()) {
                w.write_all(input).await?;
                w.shutdown().await?;
            }
            drop(writer);
            Ok::<_, std::io::Error>(())
        };
        let (written, out, err) = tokio::join!(write, drain(stdout), drain(stderr));
        written?;
        let output = ExecOutput {
            stdout: out?,
            stderr: String::from_utf8_lossy(&err?).into_owned(),
        };

        let status = match status {
            Some(status) => status.await,
            None => None,
        };
        if let Some(status) = status {
            if status.status.as_deref() != Some("Success") {
                return Err(Error::command_failed(
                    format!("{}/{}: {}", partition, unit, command.join(" ")),
                    status.message.unwrap_or_else(|| output.stderr.clone()),
                ));
            }
        }

        Ok(output)
    }

    async fn secret_value(&self, partition: &str, secret: &str, key: &str) -> Result<String> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), partition);
        let secret_obj = secrets.get(secret).await?;
        secret_obj
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .map(|v| String::from_utf8_lossy(&v.0).into_owned())
            .ok_or_else(|| Error::MissingSecretKey {
                secret: format!("{}/{}", partition, secret),
                key: key.to_string(),
            })
    }

    async fn external_addresses(&self) -> Result<Vec<String>> {
        Ok(self.addresses.clone())
    }
}
