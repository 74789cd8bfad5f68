//! Command-line surface
//!
//! Thin: every subcommand resolves a deployment from the catalog and hands it
//! to the [`Installer`].

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::bundle::HelmApplier;
use crate::catalog::{Catalog, ComponentKind, DeploymentOptions};
use crate::cluster::KubeCluster;
use crate::command::ProcessRunner;
use crate::config::{self, OptionOverrides};
use crate::deployment::{DeployContext, Deployment};
use crate::install::Installer;
use crate::Result;

/// cfdeploy - deploy KubeCF and friends to Kubernetes
#[derive(Parser, Debug)]
#[command(name = "cfdeploy", version, about, long_about = None)]
pub struct Cli {
    /// Path to a kubeconfig (falls back to CFDEPLOY_KUBECONFIG, then kube defaults)
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Verbose logging and command output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install a component and whatever it depends on
    Install {
        /// Component and options
        #[command(flatten)]
        target: TargetArgs,
        /// Delete what was applied if the install fails
        #[arg(long)]
        rollback: bool,
    },

    /// Upgrade a deployed component in place
    Upgrade(TargetArgs),

    /// Delete a component, best effort
    Delete(TargetArgs),

    /// Back up a deployed component
    Backup {
        /// Component and options
        #[command(flatten)]
        target: TargetArgs,
        /// Directory the backup is written to
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Redeploy a component and restore it from a backup
    Restore {
        /// Component and options
        #[command(flatten)]
        target: TargetArgs,
        /// Directory holding the backup
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// List catalog entries
    List {
        /// Only list this kind
        kind: Option<String>,
    },

    /// Search catalog entries by kind name or version
    Search {
        /// Substring to look for
        term: String,
    },

    /// Read information from a deployment
    #[command(subcommand)]
    Get(GetCommand),
}

/// `get` subcommands
#[derive(Subcommand, Debug)]
pub enum GetCommand {
    /// Print the CF admin password of a KubeCF namespace
    Password {
        /// KubeCF namespace
        #[arg(long, default_value = "kubecf")]
        namespace: String,
    },
}

/// Component selection and request options shared by lifecycle subcommands
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Component kind (kubecf, quarks, nginx-ingress, stratos, carrier)
    pub kind: String,

    /// Catalog version; the kind's default when omitted
    pub version: Option<String>,

    /// YAML file with deployment options; flags override its fields
    #[arg(long)]
    pub options_file: Option<PathBuf>,

    /// Explicit chart location, bypassing the catalog
    #[arg(long)]
    pub chart: Option<String>,

    /// Explicit quarks operator chart location
    #[arg(long)]
    pub operator_chart: Option<String>,

    /// Enable Eirini
    #[arg(long)]
    pub eirini: bool,

    /// Route traffic through nginx-ingress
    #[arg(long)]
    pub ingress: bool,

    /// Enable the app autoscaler
    #[arg(long)]
    pub autoscaler: bool,

    /// The cluster hands out LoadBalancer addresses; do not pin node addresses
    #[arg(long)]
    pub load_balancer: bool,

    /// Readiness timeout in seconds
    #[arg(long, env = "CFDEPLOY_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Storage class for persistent volumes
    #[arg(long)]
    pub storage_class: Option<String>,

    /// System domain; derived from node addresses when omitted
    #[arg(long)]
    pub domain: Option<String>,

    /// Extra namespace to replicate KubeCF into (repeatable)
    #[arg(long = "additional-namespace")]
    pub additional_namespaces: Vec<String>,

    /// Registry user for carrier's kpack
    #[arg(long, env = "CFDEPLOY_REGISTRY_USERNAME")]
    pub registry_username: Option<String>,

    /// Registry password for carrier's kpack
    #[arg(long, env = "CFDEPLOY_REGISTRY_PASSWORD", hide_env_values = true)]
    pub registry_password: Option<String>,
}

impl TargetArgs {
    /// Merge the options file and flags into request options
    pub fn options(&self, debug: bool) -> Result<DeploymentOptions> {
        let overrides = OptionOverrides {
            version: self.version.clone(),
            bundle_location: self.chart.clone(),
            dependency_bundle_location: self.operator_chart.clone(),
            eirini: self.eirini,
            ingress: self.ingress,
            autoscaler: self.autoscaler,
            load_balancer: self.load_balancer,
            debug,
            timeout_secs: self.timeout,
            storage_class: self.storage_class.clone(),
            domain: self.domain.clone(),
            additional_partitions: self.additional_namespaces.clone(),
            registry_username: self.registry_username.clone(),
            registry_password: self.registry_password.clone(),
        };
        config::build_options(self.options_file.as_deref(), overrides)
    }

    fn resolve(&self, catalog: &Catalog, debug: bool) -> Result<Box<dyn Deployment>> {
        let options = self.options(debug)?;
        let deployment = catalog.resolve(&self.kind, &options)?;
        info!("{}", deployment.describe());
        Ok(deployment)
    }
}

impl Cli {
    /// Run the selected subcommand
    pub async fn run(self) -> Result<()> {
        let catalog = Arc::new(Catalog::builtin());

        match &self.command {
            Commands::List { kind } => return list(&catalog, kind.as_deref()),
            Commands::Search { term } => {
                for (kind, version) in catalog.search(term) {
                    println!("{} {}", kind, version);
                }
                return Ok(());
            }
            _ => {}
        }

        let installer = self.installer(catalog.clone()).await?;
        match self.command {
            Commands::Install { target, rollback } => {
                let mut deployment = target.resolve(&catalog, self.debug)?;
                installer
                    .with_rollback(rollback)
                    .install(deployment.as_mut())
                    .await
            }
            Commands::Upgrade(target) => {
                let mut deployment = target.resolve(&catalog, self.debug)?;
                installer.upgrade(deployment.as_mut()).await
            }
            Commands::Delete(target) => {
                let deployment = target.resolve(&catalog, self.debug)?;
                installer.delete(deployment.as_ref()).await
            }
            Commands::Backup { target, output_dir } => {
                let deployment = target.resolve(&catalog, self.debug)?;
                installer.backup(deployment.as_ref(), &output_dir).await
            }
            Commands::Restore { target, output_dir } => {
                let mut deployment = target.resolve(&catalog, self.debug)?;
                installer.restore(deployment.as_mut(), &output_dir).await
            }
            Commands::Get(GetCommand::Password { namespace }) => {
                println!("{}", installer.admin_password(&namespace).await?);
                Ok(())
            }
            Commands::List { .. } | Commands::Search { .. } => Ok(()),
        }
    }

    async fn installer(&self, catalog: Arc<Catalog>) -> Result<Installer> {
        let kubeconfig = config::resolve_kubeconfig(self.kubeconfig.as_deref());
        let cluster = KubeCluster::connect(kubeconfig.as_deref()).await?;
        info!(platform = %cluster.platform(), "Connected to cluster");

        let runner = Arc::new(ProcessRunner::new(self.debug));
        let applier = Arc::new(HelmApplier::new(runner.clone()));
        Ok(Installer::new(DeployContext::new(
            Arc::new(cluster),
            applier,
            runner,
            catalog,
        )))
    }
}

fn list(catalog: &Catalog, kind: Option<&str>) -> Result<()> {
    let kinds = match kind {
        Some(kind) => vec![kind.parse::<ComponentKind>()?],
        None => ComponentKind::ALL.to_vec(),
    };
    for kind in kinds {
        let default = catalog.default_version(kind).ok();
        for version in catalog.list_kind(kind) {
            let marker = if Some(version) == default { " (default)" } else { "" };
            println!("{} {}{}", kind, version, marker);
        }
    }
    Ok(())
}
