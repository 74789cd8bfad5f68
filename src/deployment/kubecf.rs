//! KubeCF
//!
//! The chart is installed without `--wait`; readiness is decided by polling
//! for the quarks statefulsets KubeCF is made of and then for every pod of
//! the release. Additional namespaces receive their own copy of KubeCF under
//! a subdomain of the primary one.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::teardown::Teardown;
use super::{DeployContext, Deployment, Quarks};
use crate::backup::{BackupArtifact, BackupSequencer, EncryptionKeys};
use crate::bundle::{ApplyMode, ApplyRequest, BundleParams};
use crate::catalog::{ComponentDescriptor, ComponentKind, DeploymentOptions};
use crate::cluster::ClusterHandle;
use crate::command::LocalCommand;
use crate::error::StepContext;
use crate::readiness::ReadinessQuery;
use crate::{Error, Result, OPERATOR_PARTITION};

const RELEASE: &str = "kubecf";

/// Selector matching every pod of the release
pub const KUBECF_SELECTOR: &str = "app.kubernetes.io/name=kubecf";

/// Statefulsets that must exist before the release can be waited on
const REQUIRED_STATEFULSETS: [&str; 4] = ["api", "nats", "cc-worker", "doppler"];
const STATEFULSET_LABEL: &str = "quarks.cloudfoundry.org/quarks-statefulset-name";

const ADMIN_SECRET: &str = "var-cf-admin-password";
const ADMIN_SECRET_KEY: &str = "password";

/// Services exposed directly when ingress is off
const EXPOSED_SERVICES: [&str; 3] = ["router", "tcp-router", "ssh-proxy"];

const EIRINI_PSPS: [&str; 7] = [
    "bits-service",
    "eirini",
    "eirini-events",
    "eirini-metrics",
    "eirini-routing",
    "eirini-staging-reporter",
    "kubecf-eirini-app-psp",
];

/// PodSecurityPolicy shared by the copies in additional namespaces
const SHARED_PSP: &str = "kubecf-default";

fn login_hint(domain: &str, password: &str) -> String {
    format!(
        "cf login --skip-ssl-validation -a https://api.{} -u admin -p {}",
        domain, password
    )
}

/// The KubeCF Cloud Foundry distribution
#[derive(Clone, Debug)]
pub struct KubeCf {
    descriptor: ComponentDescriptor,
    options: DeploymentOptions,
    domain: Option<String>,
    encryption: Option<EncryptionKeys>,
}

impl KubeCf {
    /// Deployment of `descriptor` with request `options`
    pub fn new(descriptor: ComponentDescriptor, options: DeploymentOptions) -> Self {
        let domain = options.requested_domain().map(str::to_string);
        Self {
            descriptor,
            options,
            domain,
            encryption: None,
        }
    }

    /// Read the generated CF admin password of a KubeCF namespace
    pub async fn admin_password(cluster: &dyn ClusterHandle, partition: &str) -> Result<String> {
        cluster
            .secret_value(partition, ADMIN_SECRET, ADMIN_SECRET_KEY)
            .await
    }

    /// Carry restored database encryption keys into the chart values
    pub fn with_encryption(mut self, keys: EncryptionKeys) -> Self {
        self.encryption = Some(keys);
        self
    }

    fn partition(&self) -> &str {
        &self.descriptor.partition
    }

    fn require_domain(&self) -> Result<&str> {
        self.domain.as_deref().ok_or(Error::NoExternalAddress)
    }

    fn operator(&self, ctx: &DeployContext) -> Result<Quarks> {
        let dependency = self
            .descriptor
            .dependency
            .as_ref()
            .ok_or_else(|| Error::DependencyMissing(ComponentKind::Quarks.to_string()))?;
        Ok(ctx
            .catalog
            .quarks_for(dependency, &self.options)?
            .watching(self.partition()))
    }

    /// Chart values for one namespace
    ///
    /// `primary` is false for the copies in additional namespaces, which
    /// share one PodSecurityPolicy instead of each creating their own.
    pub(crate) fn params(
        &self,
        partition: &str,
        domain: &str,
        addresses: &[String],
        primary: bool,
    ) -> BundleParams {
        let mut params = BundleParams::new();
        params.set("system_domain", domain);

        if let Some(keys) = &self.encryption {
            params.set("credentials.cc_db_encryption_key", &keys.db_encryption_key);
            for (i, (label, key)) in keys.keys.iter().enumerate() {
                params.set(format!("ccdb.encryption.rotation.key_labels[{}]", i), label);
                params.set(format!("credentials.ccdb_key_label_{}", label), key);
            }
            params.set(
                "ccdb.encryption.rotation.current_key_label",
                &keys.current_key_label,
            );
        }

        if self.options.eirini {
            params.set("features.eirini.enabled", "true");
            params.set("install_stacks[0]", "sle15");
            params.set("eirini.opi.namespace", format!("{}-eirini", partition));
        }

        if let Some(class) = self.options.storage_class() {
            params.set("kube.storage_class", class);
        }

        if self.options.ingress {
            params.set("features.ingress.enabled", "true");
        } else {
            for service in EXPOSED_SERVICES {
                params.set(format!("services.{}.type", service), "LoadBalancer");
                for (i, ip) in addresses.iter().enumerate() {
                    params.set(format!("services.{}.externalIPs[{}]", service, i), ip);
                }
            }
        }

        if self.options.autoscaler {
            params.set("features.autoscaler.enabled", "true");
        }

        if !primary {
            params.set("kube.psp.default", SHARED_PSP);
        }
        params
    }

    async fn apply(
        &self,
        ctx: &DeployContext,
        partition: &str,
        domain: &str,
        mode: ApplyMode,
        primary: bool,
    ) -> Result<()> {
        let location = self.descriptor.require_bundle_location()?;
        let addresses = if self.options.ingress {
            Vec::new()
        } else {
            ctx.pinned_addresses(&self.options).await?
        };

        let request = ApplyRequest::new(RELEASE, partition, location, mode)
            .with_params(self.params(partition, domain, &addresses, primary));
        ctx.applier.apply(&request).await?;

        self.wait_ready(ctx, partition)
            .await
            .step("while waiting for kubecf")?;
        info!(namespace = %partition, "KubeCF deployed");
        Ok(())
    }

    async fn wait_ready(&self, ctx: &DeployContext, partition: &str) -> Result<()> {
        let poller = ctx.poller();
        let timeout = self.options.timeout();
        for statefulset in REQUIRED_STATEFULSETS {
            let selector = format!("{}={}", STATEFULSET_LABEL, statefulset);
            poller
                .wait_for_existence(&ReadinessQuery::new(partition, selector, timeout))
                .await?;
        }
        poller
            .wait_for_running(&ReadinessQuery::new(partition, KUBECF_SELECTOR, timeout))
            .await
    }

    /// Workaround for eirini RBAC objects the chart leaves behind when eirini is off
    async fn remove_eirini_rbac(&self, ctx: &DeployContext) {
        best_effort(
            ctx,
            LocalCommand::kubectl(["delete", "clusterrolebinding", "eirini-cluster-rolebinding"]),
        )
        .await;
        best_effort(
            ctx,
            LocalCommand::kubectl(["delete", "clusterrole", "eirini-cluster-role"]),
        )
        .await;
    }

    /// Cluster-scoped eirini objects would collide with the next namespace's copy
    async fn remove_eirini_cluster_objects(&self, ctx: &DeployContext) {
        for psp in EIRINI_PSPS {
            best_effort(ctx, LocalCommand::kubectl(["delete", "psp", psp])).await;
        }
        best_effort(
            ctx,
            LocalCommand::kubectl(["delete", "clusterrole", "eirini-nodes-policy"]),
        )
        .await;
        self.remove_eirini_rbac(ctx).await;
    }

    async fn deploy_additional(&self, ctx: &DeployContext, partition: &str, domain: &str) -> Result<()> {
        if self.options.eirini {
            self.remove_eirini_cluster_objects(ctx).await;
        }
        let domain = format!("{}.{}", partition, domain);
        self.apply(ctx, partition, &domain, ApplyMode::Install, false)
            .await?;

        let password = Self::admin_password(ctx.cluster.as_ref(), partition)
            .await
            .step("while reading admin password")?;
        if !self.options.eirini {
            self.remove_eirini_rbac(ctx).await;
        }
        info!(namespace = %partition, login = %login_hint(&domain, &password), "CF deployment ready");
        Ok(())
    }
}

async fn best_effort(ctx: &DeployContext, command: LocalCommand) {
    if let Err(e) = ctx.runner.run(&command).await {
        debug!(command = %command, error = %e, "Workaround step failed, ignoring");
    }
}

#[async_trait]
impl Deployment for KubeCf {
    fn kind(&self) -> ComponentKind {
        ComponentKind::KubeCf
    }

    fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }

    fn options(&self) -> &DeploymentOptions {
        &self.options
    }

    fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    fn set_domain(&mut self, domain: String) {
        self.domain = Some(domain);
    }

    #[instrument(skip(self, ctx), fields(version = %self.descriptor.version, namespace = %self.descriptor.partition))]
    async fn deploy(&self, ctx: &DeployContext) -> Result<()> {
        let partition = self.partition();
        // the operator creates the namespace it watches, so an empty one is not a deployment
        if ctx.cluster.partition_exists(partition).await?
            && !ctx.cluster.list_units(partition, KUBECF_SELECTOR).await?.is_empty()
        {
            return Err(Error::already_deployed(partition, self.kind().as_str()));
        }
        self.descriptor.require_bundle_location()?;
        let domain = self.require_domain()?;

        if ctx.cluster.partition_exists(OPERATOR_PARTITION).await? {
            info!("Quarks operator already present");
        } else {
            self.operator(ctx)?
                .deploy(ctx)
                .await
                .step("while deploying quarks operator")?;
        }

        if self.options.ingress {
            let nginx = ctx.catalog.nginx_companion(&self.options)?;
            if ctx.cluster.partition_exists(&nginx.descriptor().partition).await? {
                info!("nginx-ingress already present");
            } else {
                nginx
                    .deploy(ctx)
                    .await
                    .step("while deploying nginx-ingress")?;
            }
        }

        info!("Deploying kubecf");
        self.apply(ctx, partition, domain, ApplyMode::Install, true)
            .await
            .step("while deploying kubecf")?;
        let password = Self::admin_password(ctx.cluster.as_ref(), partition)
            .await
            .step("while reading admin password")?;
        if !self.options.eirini {
            self.remove_eirini_rbac(ctx).await;
        }

        for extra in &self.options.additional_partitions {
            self.deploy_additional(ctx, extra, domain)
                .await
                .step(&format!("while deploying kubecf for namespace {}", extra))?;
        }

        info!(login = %login_hint(domain, &password), "CF deployment ready");
        Ok(())
    }

    #[instrument(skip(self, ctx), fields(version = %self.descriptor.version, namespace = %self.descriptor.partition))]
    async fn upgrade(&self, ctx: &DeployContext) -> Result<()> {
        if !ctx.cluster.partition_exists(OPERATOR_PARTITION).await? {
            return Err(Error::DependencyMissing(OPERATOR_PARTITION.to_string()));
        }
        let domain = self.require_domain()?;

        info!("Upgrading quarks operator");
        self.operator(ctx)?
            .upgrade(ctx)
            .await
            .step("while upgrading quarks operator")?;

        info!("Upgrading kubecf");
        self.apply(ctx, self.partition(), domain, ApplyMode::Upgrade, true)
            .await
            .step("while upgrading kubecf")?;

        for extra in &self.options.additional_partitions {
            let extra_domain = format!("{}.{}", extra, domain);
            self.apply(ctx, extra, &extra_domain, ApplyMode::Upgrade, false)
                .await
                .step(&format!("while upgrading kubecf for namespace {}", extra))?;
        }
        Ok(())
    }

    #[instrument(skip(self, ctx), fields(namespace = %self.descriptor.partition))]
    async fn delete(&self, ctx: &DeployContext) -> Result<()> {
        let mut teardown = Teardown::new(ctx);
        teardown
            .nested("while deleting quarks operator", async {
                self.operator(ctx)?.delete(ctx).await
            })
            .await;

        for extra in &self.options.additional_partitions {
            teardown.delete_partition(extra).await;
            teardown.delete_partition(&format!("{}-eirini", extra)).await;
        }
        teardown.delete_partition(self.partition()).await;
        teardown
            .delete_partition(&format!("{}-eirini", self.partition()))
            .await;

        teardown
            .cleanup(LocalCommand::kubectl(["delete", "psp", SHARED_PSP]))
            .await;
        teardown
            .cleanup(LocalCommand::kubectl(["delete", "clusterrolebinding", "eirini-cluster-rolebinding"]))
            .await;
        teardown
            .cleanup(LocalCommand::kubectl(["delete", "clusterrole", "eirini-cluster-role"]))
            .await;

        info!("KubeCF deleted");
        teardown.finish()
    }

    async fn backup(&self, ctx: &DeployContext, output: &Path) -> Result<()> {
        BackupSequencer::new(ctx.cluster.as_ref(), self.partition())
            .backup(&BackupArtifact::new(output))
            .await
    }

    #[instrument(skip(self, ctx, output), fields(namespace = %self.descriptor.partition, dir = %output.display()))]
    async fn restore(&self, ctx: &DeployContext, output: &Path) -> Result<()> {
        let artifact = BackupArtifact::new(output);
        let keys = artifact
            .validate()
            .await
            .step("while reading backup")?;
        if keys.keys.is_empty() {
            warn!("Backup carries no database encryption keys");
        }

        self.deploy(ctx).await.step("while deploying kubecf")?;

        BackupSequencer::new(ctx.cluster.as_ref(), self.partition())
            .replay(&artifact)
            .await?;

        info!(current_key_label = %keys.current_key_label, "Re-applying kubecf with restored encryption keys");
        self.clone()
            .with_encryption(keys)
            .upgrade(ctx)
            .await
            .step("while upgrading kubecf")
    }
}
