//! Stratos web console

use async_trait::async_trait;
use tracing::{info, instrument};

use super::teardown::Teardown;
use super::{DeployContext, Deployment};
use crate::bundle::{ApplyMode, BundleParams};
use crate::catalog::{ComponentDescriptor, ComponentKind, DeploymentOptions};
use crate::error::StepContext;
use crate::{Error, Result};

const RELEASE: &str = "stratos";
const CONSOLE_PORT: &str = "8443";

/// The Stratos console
#[derive(Clone, Debug)]
pub struct Stratos {
    descriptor: ComponentDescriptor,
    options: DeploymentOptions,
    domain: Option<String>,
}

impl Stratos {
    /// Deployment of `descriptor` with request `options`
    pub fn new(descriptor: ComponentDescriptor, options: DeploymentOptions) -> Self {
        let domain = options.requested_domain().map(str::to_string);
        Self {
            descriptor,
            options,
            domain,
        }
    }

    fn params(&self, addresses: &[String]) -> BundleParams {
        let mut params = BundleParams::new();
        if !self.options.load_balancer {
            for (i, ip) in addresses.iter().enumerate() {
                params.set(format!("console.service.externalIPs[{}]", i), ip);
            }
            params.set("console.service.servicePort", CONSOLE_PORT);
            params.set("console.service.type", "LoadBalancer");
        }
        if self.options.ingress {
            params.set("console.service.ingress.enabled", "true");
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
            self.params(&addresses),
        )
        .await?;
        info!(namespace = %self.descriptor.partition, "Stratos deployed");
        Ok(())
    }
}

#[async_trait]
impl Deployment for Stratos {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Stratos
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
        info!("Deploying Stratos");
        self.apply(ctx, ApplyMode::Install)
            .await
            .step("while deploying stratos")
    }

    #[instrument(skip(self, ctx), fields(version = %self.descriptor.version))]
    async fn upgrade(&self, ctx: &DeployContext) -> Result<()> {
        if !ctx.cluster.partition_exists(&self.descriptor.partition).await? {
            return Err(Error::NotDeployed(self.descriptor.partition.clone()));
        }
        info!("Upgrading Stratos");
        self.apply(ctx, ApplyMode::Upgrade)
            .await
            .step("while upgrading stratos")
    }

    async fn delete(&self, ctx: &DeployContext) -> Result<()> {
        let mut teardown = Teardown::new(ctx);
        teardown.delete_partition(&self.descriptor.partition).await;
        teardown.finish()
    }
}
