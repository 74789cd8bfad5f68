//! Component lifecycle implementations
//!
//! Each component kind implements [`Deployment`]. Deploy, upgrade, backup
//! and restore fail fast: the first failing step aborts and is wrapped with
//! the intent of that step. Delete is the opposite: it runs every step and
//! only reports cluster API failures, collected by [`teardown::Teardown`].
//!
//! There is no local state. Whether something is deployed is decided on every
//! call by asking the cluster whether its namespace exists.

mod carrier;
mod kubecf;
mod nginx;
mod quarks;
mod stratos;
pub(crate) mod teardown;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::bundle::{ApplyMode, ApplyRequest, BundleApplier, BundleParams};
use crate::catalog::{Catalog, ComponentDescriptor, ComponentKind, DeploymentOptions};
use crate::cluster::ClusterHandle;
use crate::command::CommandRunner;
use crate::readiness::{PollConfig, ReadinessPoller, ReadinessQuery};
use crate::{Error, Result};

pub use carrier::Carrier;
pub use kubecf::KubeCf;
pub use nginx::NginxIngress;
pub use quarks::Quarks;
pub use stratos::Stratos;

/// Collaborators every lifecycle call needs
#[derive(Clone)]
pub struct DeployContext {
    /// Cluster the component lives on
    pub cluster: Arc<dyn ClusterHandle>,
    /// Chart applier
    pub applier: Arc<dyn BundleApplier>,
    /// Local command runner for cleanup steps and scripts
    pub runner: Arc<dyn CommandRunner>,
    /// Catalog used to resolve operators and companions
    pub catalog: Arc<Catalog>,
    /// Readiness poll cadence
    pub poll: PollConfig,
}

impl DeployContext {
    /// Context with the default poll cadence
    pub fn new(
        cluster: Arc<dyn ClusterHandle>,
        applier: Arc<dyn BundleApplier>,
        runner: Arc<dyn CommandRunner>,
        catalog: Arc<Catalog>,
    ) -> Self {
        Self {
            cluster,
            applier,
            runner,
            catalog,
            poll: PollConfig::default(),
        }
    }

    /// Override the poll cadence
    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Poller over this context's cluster
    pub fn poller(&self) -> ReadinessPoller {
        ReadinessPoller::new(self.cluster.clone(), self.poll)
    }

    /// Fail with `AlreadyDeployed` when `partition` exists
    pub(crate) async fn ensure_absent(&self, partition: &str, kind: ComponentKind) -> Result<()> {
        if self.cluster.partition_exists(partition).await? {
            return Err(Error::already_deployed(partition, kind.as_str()));
        }
        Ok(())
    }

    /// Wait for every pod in `partition` to be running
    pub(crate) async fn wait_partition_running(
        &self,
        partition: &str,
        options: &DeploymentOptions,
    ) -> Result<()> {
        self.poller()
            .wait_for_running(&ReadinessQuery::new(partition, "", options.timeout()))
            .await
    }

    /// Apply a self-contained chart with `--create-namespace --wait`, then wait for its pods
    pub(crate) async fn apply_chart(
        &self,
        release: &str,
        descriptor: &ComponentDescriptor,
        options: &DeploymentOptions,
        mode: ApplyMode,
        params: BundleParams,
    ) -> Result<()> {
        let request = ApplyRequest::new(
            release,
            descriptor.partition.as_str(),
            descriptor.require_bundle_location()?,
            mode,
        )
        .create_partition()
        .wait()
        .with_params(params);
        self.applier.apply(&request).await?;
        self.wait_partition_running(&descriptor.partition, options)
            .await
    }

    /// Node addresses to pin on services when no load balancer hands them out
    pub(crate) async fn pinned_addresses(&self, options: &DeploymentOptions) -> Result<Vec<String>> {
        if options.load_balancer {
            Ok(Vec::new())
        } else {
            self.cluster.external_addresses().await
        }
    }
}

/// Lifecycle contract shared by all component kinds
#[async_trait]
pub trait Deployment: fmt::Debug + Send + Sync {
    /// Component kind
    fn kind(&self) -> ComponentKind;

    /// Resolved descriptor
    fn descriptor(&self) -> &ComponentDescriptor;

    /// Request options merged into this deployment
    fn options(&self) -> &DeploymentOptions;

    /// Resolved version
    fn version(&self) -> &str {
        &self.descriptor().version
    }

    /// Human-readable identity
    fn describe(&self) -> String {
        let d = self.descriptor();
        let mut text = format!("{} version: {}\n{} chart: {}", d.kind, d.version, d.kind, d.bundle_location);
        if let Some(dep) = &d.dependency {
            text.push_str(&format!("\n{} version: {}", dep.kind, dep.version));
        }
        text
    }

    /// System domain, if one has been set
    fn domain(&self) -> Option<&str>;

    /// Set the system domain
    fn set_domain(&mut self, domain: String);

    /// Install onto the cluster
    async fn deploy(&self, ctx: &DeployContext) -> Result<()>;

    /// Upgrade in place
    async fn upgrade(&self, ctx: &DeployContext) -> Result<()>;

    /// Remove from the cluster, best effort
    async fn delete(&self, ctx: &DeployContext) -> Result<()>;

    /// Snapshot stateful data into `output`
    async fn backup(&self, _ctx: &DeployContext, _output: &Path) -> Result<()> {
        Err(Error::unsupported(self.kind().as_str(), "backup"))
    }

    /// Redeploy and replay a snapshot from `output`
    async fn restore(&self, _ctx: &DeployContext, _output: &Path) -> Result<()> {
        Err(Error::unsupported(self.kind().as_str(), "restore"))
    }
}
