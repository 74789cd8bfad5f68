//! Lifecycle orchestration
//!
//! The [`Installer`] drives a resolved [`Deployment`] through one lifecycle
//! operation against a cluster:
//!
//! 1. Derive a system domain from the cluster's external addresses when the
//!    caller did not supply one (install, upgrade and restore only)
//! 2. Run the operation
//! 3. On a failed install with rollback enabled, delete what was applied
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cfdeploy::bundle::HelmApplier;
//! use cfdeploy::catalog::{Catalog, DeploymentOptions};
//! use cfdeploy::cluster::KubeCluster;
//! use cfdeploy::command::ProcessRunner;
//! use cfdeploy::deployment::DeployContext;
//! use cfdeploy::install::Installer;
//!
//! #[tokio::main]
//! async fn main() -> cfdeploy::Result<()> {
//!     let cluster = Arc::new(KubeCluster::connect(None).await?);
//!     let runner = Arc::new(ProcessRunner::new(false));
//!     let applier = Arc::new(HelmApplier::new(runner.clone()));
//!     let catalog = Arc::new(Catalog::builtin());
//!
//!     let mut kubecf = catalog.resolve("kubecf", &DeploymentOptions::default())?;
//!     let installer = Installer::new(DeployContext::new(cluster, applier, runner, catalog));
//!     installer.install(kubecf.as_mut()).await
//! }
//! ```

use std::path::Path;
use std::time::Instant;

use tracing::{info, warn};

use crate::deployment::{DeployContext, Deployment, KubeCf};
use crate::{Error, Result, MAGIC_DNS_SUFFIX};

/// Drives deployments through install, upgrade, delete, backup and restore
#[derive(Clone)]
pub struct Installer {
    ctx: DeployContext,
    rollback_on_failure: bool,
}

impl Installer {
    /// Installer over the given collaborators, without rollback
    pub fn new(ctx: DeployContext) -> Self {
        Self {
            ctx,
            rollback_on_failure: false,
        }
    }

    /// Delete the deployment when install fails
    pub fn with_rollback(mut self, rollback: bool) -> Self {
        self.rollback_on_failure = rollback;
        self
    }

    /// Collaborators handed to every operation
    pub fn context(&self) -> &DeployContext {
        &self.ctx
    }

    /// Give the deployment a `<ip>.nip.io` domain unless it already has one
    pub async fn ensure_domain(&self, deployment: &mut dyn Deployment) -> Result<()> {
        if deployment.domain().is_some() {
            return Ok(());
        }
        let address = self
            .ctx
            .cluster
            .external_addresses()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::NoExternalAddress)?;
        let domain = format!("{}.{}", address, MAGIC_DNS_SUFFIX);
        info!(domain = %domain, "No domain given, using node address");
        deployment.set_domain(domain);
        Ok(())
    }

    /// Install the deployment
    pub async fn install(&self, deployment: &mut dyn Deployment) -> Result<()> {
        let start = Instant::now();
        self.ensure_domain(deployment).await?;
        info!(component = %deployment.kind(), version = %deployment.version(), "Installing");

        let result = deployment.deploy(&self.ctx).await;
        if let Err(e) = &result {
            // a refused install applied nothing, so there is nothing to roll back
            if self.rollback_on_failure && !matches!(e.root(), Error::AlreadyDeployed { .. }) {
                warn!(error = %e, "Install failed, rolling back");
                if let Err(cleanup) = deployment.delete(&self.ctx).await {
                    warn!(error = %cleanup, "Rollback left resources behind");
                }
            }
        }
        result?;

        info!(component = %deployment.kind(), duration = ?start.elapsed(), "Installation complete");
        Ok(())
    }

    /// Upgrade the deployment in place
    pub async fn upgrade(&self, deployment: &mut dyn Deployment) -> Result<()> {
        self.ensure_domain(deployment).await?;
        info!(component = %deployment.kind(), version = %deployment.version(), "Upgrading");
        deployment.upgrade(&self.ctx).await
    }

    /// Delete the deployment, best effort
    pub async fn delete(&self, deployment: &dyn Deployment) -> Result<()> {
        info!(component = %deployment.kind(), "Deleting");
        deployment.delete(&self.ctx).await
    }

    /// Back up the deployment into `output`
    pub async fn backup(&self, deployment: &dyn Deployment, output: &Path) -> Result<()> {
        info!(component = %deployment.kind(), dir = %output.display(), "Backing up");
        deployment.backup(&self.ctx, output).await
    }

    /// Redeploy and restore the deployment from `output`
    pub async fn restore(&self, deployment: &mut dyn Deployment, output: &Path) -> Result<()> {
        self.ensure_domain(deployment).await?;
        info!(component = %deployment.kind(), dir = %output.display(), "Restoring");
        deployment.restore(&self.ctx, output).await
    }

    /// CF admin password of a KubeCF namespace
    pub async fn admin_password(&self, partition: &str) -> Result<String> {
        KubeCf::admin_password(self.ctx.cluster.as_ref(), partition).await
    }
}
