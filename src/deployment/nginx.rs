//! nginx ingress controller

use async_trait::async_trait;
use tracing::{info, instrument};

use super::teardown::Teardown;
use super::{DeployContext, Deployment};
use crate::bundle::{ApplyMode, BundleParams};
use crate::catalog::{ComponentDescriptor, ComponentKind, DeploymentOptions};
use crate::error::StepContext;
use crate::{Error, Result};

const RELEASE: &str = "nginx-ingress";

/// nginx-ingress, deployed standalone or as KubeCF's ingress companion
#[derive(Clone, Debug)]
pub struct NginxIngress {
    descriptor: ComponentDescriptor,
    options: DeploymentOptions,
    domain: Option<String>,
}

impl NginxIngress {
    /// Deployment of `descriptor` with request `options`
    pub fn new(descriptor: ComponentDescriptor, options: DeploymentOptions) -> Self {
        let domain = options.requested_domain().map(str::to_string);
        Self {
            descriptor,
            options,
            domain,
        }
    }

    fn params(addresses: &[String]) -> BundleParams {
        let mut params = BundleParams::new();
        for (i, ip) in addresses.iter().enumerate() {
            params.set(format!("controller.service.externalIPs[{}]", i), ip);
        }
        params
    }

    async fn apply(&self, ctx: &DeployContext, mode: ApplyMode) -> Result<()> {
        let addresses = ctx.pinned_addresses(&self.options).await?;
        ctx.apply_chart(
            RELEASE,
            &self.descriptor,
            &self.options,
            mode,
            Self::params(&addresses),
        )
        .await?;
        info!(namespace = %self.descriptor.partition, "nginx-ingress deployed");
        Ok(())
    }
}

#[async_trait]
impl Deployment for NginxIngress {
    fn kind(&self) -> ComponentKind {
        ComponentKind::NginxIngress
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

    #[instrument(skip(self, ctx), fields(version = %self.descriptor.version))]
    async fn deploy(&self, ctx: &DeployContext) -> Result<()> {
        ctx.ensure_absent(&self.descriptor.partition, self.kind())
            .await?;
        info!("Deploying nginx-ingress");
        self.apply(ctx, ApplyMode::Install).await
    }

    #[instrument(skip(self, ctx), fields(version = %self.descriptor.version))]
    async fn upgrade(&self, ctx: &DeployContext) -> Result<()> {
        if !ctx.cluster.partition_exists(&self.descriptor.partition).await? {
            return Err(Error::NotDeployed(self.descriptor.partition.clone()));
        }
        info!("Upgrading nginx-ingress");
        self.apply(ctx, ApplyMode::Upgrade)
            .await
            .step("while upgrading nginx-ingress")
    }

    async fn delete(&self, ctx: &DeployContext) -> Result<()> {
        let mut teardown = Teardown::new(ctx);
        teardown.delete_partition(&self.descriptor.partition).await;
        teardown.finish()
    }
}
