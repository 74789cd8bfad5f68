//! Bundle (Helm chart) application
//!
//! The orchestrator never templates charts itself. It builds an
//! [`ApplyRequest`] and hands it to a [`BundleApplier`], then waits on the
//! readiness poller for the effects.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::command::{CommandRunner, LocalCommand};
use crate::Result;

/// Ordered `key=value` overrides passed to the bundle
///
/// Order is preserved exactly as inserted so the same options always
/// produce the same command line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BundleParams(Vec<(String, String)>);

impl BundleParams {
    /// Empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an override
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.push((key.into(), value.into()));
        self
    }

    /// First value set for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether the key was set
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Iterate overrides in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of overrides
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no override was set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Whether the bundle is installed fresh or upgraded in place
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyMode {
    /// First installation of a release
    Install,
    /// In-place upgrade of an existing release
    Upgrade,
}

impl fmt::Display for ApplyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyMode::Install => write!(f, "install"),
            ApplyMode::Upgrade => write!(f, "upgrade"),
        }
    }
}

/// One bundle application
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplyRequest {
    /// Release name
    pub release: String,
    /// Target partition (namespace)
    pub partition: String,
    /// Chart URL or path
    pub bundle_location: String,
    /// Install or upgrade
    pub mode: ApplyMode,
    /// Create the partition if it does not exist
    pub create_partition: bool,
    /// Block until the applier reports the release healthy
    pub wait: bool,
    /// Value overrides
    pub params: BundleParams,
}

impl ApplyRequest {
    /// Request with no flags and no overrides
    pub fn new(
        release: impl Into<String>,
        partition: impl Into<String>,
        bundle_location: impl Into<String>,
        mode: ApplyMode,
    ) -> Self {
        Self {
            release: release.into(),
            partition: partition.into(),
            bundle_location: bundle_location.into(),
            mode,
            create_partition: false,
            wait: false,
            params: BundleParams::new(),
        }
    }

    /// Ask the applier to create the partition
    pub fn create_partition(mut self) -> Self {
        self.create_partition = true;
        self
    }

    /// Ask the applier to wait for the release
    pub fn wait(mut self) -> Self {
        self.wait = true;
        self
    }

    /// Attach value overrides
    pub fn with_params(mut self, params: BundleParams) -> Self {
        self.params = params;
        self
    }
}

/// Materializes a bundle onto the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BundleApplier: Send + Sync {
    /// Apply the bundle and return the applier's output
    async fn apply(&self, request: &ApplyRequest) -> Result<String>;
}

/// [`BundleApplier`] that shells out to the `helm` binary
pub struct HelmApplier {
    runner: Arc<dyn CommandRunner>,
}

impl HelmApplier {
    /// Run helm through the given runner
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Build the helm command line for a request
    pub fn command(request: &ApplyRequest) -> LocalCommand {
        let mut args = vec![
            request.mode.to_string(),
            request.release.clone(),
            "--namespace".to_string(),
            request.partition.clone(),
        ];
        if request.create_partition {
            args.push("--create-namespace".to_string());
        }
        if request.wait {
            args.push("--wait".to_string());
        }
        args.push(request.bundle_location.clone());
        for (key, value) in request.params.iter() {
            args.push("--set".to_string());
            args.push(format!("{}={}", key, value));
        }
        LocalCommand::new("helm", args)
    }
}

#[async_trait]
impl BundleApplier for HelmApplier {
    async fn apply(&self, request: &ApplyRequest) -> Result<String> {
        info!(
            release = %request.release,
            namespace = %request.partition,
            mode = %request.mode,
            "Applying helm chart"
        );
        let output = self.runner.run(&Self::command(request)).await?;
        debug!(release = %request.release, output = %output.trim_end(), "helm finished");
        Ok(output)
    }
}
