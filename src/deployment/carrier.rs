//! carrier
//!
//! carrier is not a chart: its descriptor points at a git repository whose
//! per-subsystem `install` and `uninstall` scripts are run from a throwaway
//! checkout.

use std::path::Path;

use async_trait::async_trait;
use tracing::{info, instrument};

use super::teardown::Teardown;
use super::{DeployContext, Deployment, Quarks};
use crate::catalog::{ComponentDescriptor, ComponentKind, DeploymentOptions};
use crate::command::LocalCommand;
use crate::error::StepContext;
use crate::{Error, Result, OPERATOR_PARTITION};

/// Subsystems removed on delete, in order
const UNINSTALL_SCRIPTS: [&str; 4] = [
    "./gitea/uninstall",
    "./kpack/uninstall",
    "./drone/uninstall",
    "./eirini/uninstall",
];

/// The carrier platform
#[derive(Clone, Debug)]
pub struct Carrier {
    descriptor: ComponentDescriptor,
    options: DeploymentOptions,
    domain: Option<String>,
}

impl Carrier {
    /// Deployment of `descriptor` with request `options`
    pub fn new(descriptor: ComponentDescriptor, options: DeploymentOptions) -> Self {
        let domain = options.requested_domain().map(str::to_string);
        Self {
            descriptor,
            options,
            domain,
        }
    }

    fn operator(&self, ctx: &DeployContext) -> Result<Quarks> {
        let dependency = self
            .descriptor
            .dependency
            .as_ref()
            .ok_or_else(|| Error::DependencyMissing(ComponentKind::Quarks.to_string()))?;
        ctx.catalog.quarks_for(dependency, &self.options)
    }

    fn clone_command(&self, dir: &Path) -> Result<LocalCommand> {
        let repository = self.descriptor.require_bundle_location()?;
        Ok(LocalCommand::new("git", ["clone", repository, "./"]).in_dir(dir))
    }

    /// Install scripts, in order, with their arguments
    fn install_scripts(&self, address: &str) -> Vec<(&'static str, Vec<String>)> {
        let username = self.options.registry_username.clone().unwrap_or_default();
        let password = self.options.registry_password.clone().unwrap_or_default();
        vec![
            ("./gitea/install", vec![address.to_string()]),
            ("./kpack/install", vec![username, password]),
            ("./drone/install", vec![address.to_string()]),
            ("./eirini/install", vec![]),
            ("./drone-gitea/install", vec![address.to_string()]),
        ]
    }
}

#[async_trait]
impl Deployment for Carrier {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Carrier
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
        self.descriptor.require_bundle_location()?;
        let address = ctx
            .cluster
            .external_addresses()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::NoExternalAddress)?;

        if ctx.cluster.partition_exists(OPERATOR_PARTITION).await? {
            info!("Quarks operator already present");
        } else {
            self.operator(ctx)?
                .deploy(ctx)
                .await
                .step("while deploying quarks operator")?;
        }

        let checkout = tempfile::tempdir().step("while cloning carrier")?;
        info!(repository = %self.descriptor.bundle_location, "Cloning carrier");
        ctx.runner
            .run(&self.clone_command(checkout.path())?)
            .await
            .step("while cloning carrier")?;

        for (script, args) in self.install_scripts(&address) {
            info!(script = %script, "Running carrier installer");
            ctx.runner
                .run(&LocalCommand::new(script, args).in_dir(checkout.path()))
                .await
                .step(&format!("while running {}", script))?;
        }

        info!("Carrier deployed");
        Ok(())
    }

    /// Carrier has no in-place upgrade; it is removed and installed again
    async fn upgrade(&self, ctx: &DeployContext) -> Result<()> {
        self.delete(ctx)
            .await
            .step("while removing previous carrier")?;
        self.deploy(ctx).await
    }

    #[instrument(skip(self, ctx), fields(version = %self.descriptor.version))]
    async fn delete(&self, ctx: &DeployContext) -> Result<()> {
        let mut teardown = Teardown::new(ctx);
        teardown
            .nested("while deleting quarks operator", async {
                self.operator(ctx)?.delete(ctx).await
            })
            .await;

        match tempfile::tempdir() {
            Ok(checkout) => {
                if let Ok(clone) = self.clone_command(checkout.path()) {
                    teardown.cleanup(clone).await;
                }
                for script in UNINSTALL_SCRIPTS {
                    teardown
                        .cleanup(LocalCommand::new(script, Vec::<String>::new()).in_dir(checkout.path()))
                        .await;
                }
            }
            Err(e) => {
                teardown
                    .nested("while preparing carrier checkout", async move { Err(e.into()) })
                    .await;
            }
        }
        teardown.delete_partition(&self.descriptor.partition).await;

        info!("Carrier deleted");
        teardown.finish()
    }
}
