//! Kubeconfig resolution and option files
//!
//! The kubeconfig resolution chain (highest priority first):
//! 1. Explicit `--kubeconfig` flag
//! 2. `CFDEPLOY_KUBECONFIG` environment variable
//! 3. Fall back to kube default (`KUBECONFIG` env / `~/.kube/config` / in-cluster)
//!
//! Deployment options come from an optional YAML file, with command-line flags
//! overriding it field by field.

use std::path::{Path, PathBuf};

use crate::catalog::DeploymentOptions;
use crate::{Error, Result};

/// Environment variable naming a kubeconfig for this tool only
pub const KUBECONFIG_ENV: &str = "CFDEPLOY_KUBECONFIG";

/// Resolve a kubeconfig path using the priority chain.
///
/// Returns `None` to use `kube::Client::try_default()`.
pub fn resolve_kubeconfig(explicit: Option<&Path>) -> Option<PathBuf> {
    resolve_kubeconfig_with(explicit, std::env::var(KUBECONFIG_ENV).ok())
}

fn resolve_kubeconfig_with(explicit: Option<&Path>, env: Option<String>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    env.filter(|path| !path.is_empty()).map(PathBuf::from)
}

/// Load a YAML options file; omitted fields take their defaults
pub fn load_options_file(path: &Path) -> Result<DeploymentOptions> {
    let data = std::fs::read_to_string(path).map_err(|e| Error::OptionsFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    serde_yaml::from_str(&data).map_err(|e| Error::OptionsFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Options given explicitly on the command line
///
/// Unset fields leave the file (or default) value alone. Switches can only
/// turn a feature on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionOverrides {
    /// `--version`
    pub version: Option<String>,
    /// `--chart`
    pub bundle_location: Option<String>,
    /// `--operator-chart`
    pub dependency_bundle_location: Option<String>,
    /// `--eirini`
    pub eirini: bool,
    /// `--ingress`
    pub ingress: bool,
    /// `--autoscaler`
    pub autoscaler: bool,
    /// `--load-balancer`
    pub load_balancer: bool,
    /// `--debug`
    pub debug: bool,
    /// `--timeout`
    pub timeout_secs: Option<u64>,
    /// `--storage-class`
    pub storage_class: Option<String>,
    /// `--domain`
    pub domain: Option<String>,
    /// `--additional-namespace`, repeatable
    pub additional_partitions: Vec<String>,
    /// `--registry-username`
    pub registry_username: Option<String>,
    /// `--registry-password`
    pub registry_password: Option<String>,
}

impl OptionOverrides {
    /// Overlay these overrides on `base`
    pub fn apply(self, base: DeploymentOptions) -> DeploymentOptions {
        DeploymentOptions {
            version: self.version.or(base.version),
            bundle_location: self.bundle_location.or(base.bundle_location),
            dependency_bundle_location: self
                .dependency_bundle_location
                .or(base.dependency_bundle_location),
            eirini: self.eirini || base.eirini,
            ingress: self.ingress || base.ingress,
            autoscaler: self.autoscaler || base.autoscaler,
            load_balancer: self.load_balancer || base.load_balancer,
            debug: self.debug || base.debug,
            timeout_secs: self.timeout_secs.unwrap_or(base.timeout_secs),
            storage_class: self.storage_class.or(base.storage_class),
            domain: self.domain.or(base.domain),
            additional_partitions: if self.additional_partitions.is_empty() {
                base.additional_partitions
            } else {
                self.additional_partitions
            },
            registry_username: self.registry_username.or(base.registry_username),
            registry_password: self.registry_password.or(base.registry_password),
        }
    }
}

/// Final request options: the options file if given, then the overrides
pub fn build_options(file: Option<&Path>, overrides: OptionOverrides) -> Result<DeploymentOptions> {
    let base = match file {
        Some(path) => load_options_file(path)?,
        None => DeploymentOptions::default(),
    };
    Ok(overrides.apply(base))
}
