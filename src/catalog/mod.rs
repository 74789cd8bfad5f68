//! Component catalog
//!
//! The catalog is an explicit value, built once at startup and passed to
//! whoever needs to resolve a component. Resolution is pure: it never touches
//! the cluster and always hands back fresh copies of the registered
//! descriptors, so nothing a caller does to a resolved deployment leaks into
//! later resolutions.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::deployment::{Carrier, Deployment, KubeCf, NginxIngress, Quarks, Stratos};
use crate::{Error, Result, DEFAULT_TIMEOUT_SECS};

/// Version tag of descriptors synthesized from an explicit bundle location
pub const CUSTOM_VERSION: &str = "Custom";

/// The closed set of components this tool knows how to manage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentKind {
    /// KubeCF, the Cloud Foundry distribution
    KubeCf,
    /// The quarks (cf-operator) operator KubeCF and carrier depend on
    Quarks,
    /// nginx ingress controller
    NginxIngress,
    /// Stratos web console
    Stratos,
    /// carrier platform (scripted, git-hosted)
    Carrier,
}

impl ComponentKind {
    /// Every kind, in listing order
    pub const ALL: [ComponentKind; 5] = [
        ComponentKind::KubeCf,
        ComponentKind::Quarks,
        ComponentKind::NginxIngress,
        ComponentKind::Stratos,
        ComponentKind::Carrier,
    ];

    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::KubeCf => "kubecf",
            ComponentKind::Quarks => "quarks",
            ComponentKind::NginxIngress => "nginx-ingress",
            ComponentKind::Stratos => "stratos",
            ComponentKind::Carrier => "carrier",
        }
    }

    /// Operator this kind needs running before it can be applied
    pub fn dependency(&self) -> Option<ComponentKind> {
        match self {
            ComponentKind::KubeCf | ComponentKind::Carrier => Some(ComponentKind::Quarks),
            _ => None,
        }
    }

    /// Namespace the kind deploys into unless the registry says otherwise
    ///
    /// For quarks this is the namespace the operator watches; the operator
    /// itself always lives in [`crate::OPERATOR_PARTITION`].
    pub fn default_partition(&self) -> &'static str {
        match self {
            ComponentKind::KubeCf | ComponentKind::Quarks => "kubecf",
            ComponentKind::NginxIngress => "nginx-ingress",
            ComponentKind::Stratos => "stratos",
            // created by carrier's first installer, gitea
            ComponentKind::Carrier => "gitea",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kubecf" => Ok(ComponentKind::KubeCf),
            "quarks" | "cf-operator" => Ok(ComponentKind::Quarks),
            "nginx-ingress" | "ingress" => Ok(ComponentKind::NginxIngress),
            "stratos" => Ok(ComponentKind::Stratos),
            "carrier" => Ok(ComponentKind::Carrier),
            _ => Err(Error::InvalidComponent(s.to_string())),
        }
    }
}

/// Reference from a component to the operator it depends on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencyRef {
    /// Operator kind
    pub kind: ComponentKind,
    /// Operator version, or `Custom` when overridden
    pub version: String,
    /// Operator bundle; a `Custom` reference bypasses the registry, a
    /// registered one keeps its version but is fetched from here
    pub bundle_location: Option<String>,
}

/// Immutable catalog entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentDescriptor {
    /// Component kind
    pub kind: ComponentKind,
    /// Registered version or `Custom`
    pub version: String,
    /// Chart URL (git URL for carrier); empty when a custom descriptor did not supply one
    pub bundle_location: String,
    /// Operator prerequisite
    pub dependency: Option<DependencyRef>,
    /// Target namespace
    pub partition: String,
}

impl ComponentDescriptor {
    /// Registry entry helper
    pub fn new(
        kind: ComponentKind,
        version: impl Into<String>,
        bundle_location: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            version: version.into(),
            bundle_location: bundle_location.into(),
            dependency: None,
            partition: kind.default_partition().to_string(),
        }
    }

    /// Declare the operator version this entry needs
    pub fn depends_on(mut self, kind: ComponentKind, version: impl Into<String>) -> Self {
        self.dependency = Some(DependencyRef {
            kind,
            version: version.into(),
            bundle_location: None,
        });
        self
    }

    /// Fetch the dependency from `location` instead of its registered bundle
    pub fn pinned_at(mut self, location: impl Into<String>) -> Self {
        if let Some(dependency) = self.dependency.as_mut() {
            dependency.bundle_location = Some(location.into());
        }
        self
    }

    /// Synthesized from an explicit location rather than looked up
    pub fn is_custom(&self) -> bool {
        self.version == CUSTOM_VERSION
    }

    /// Bundle location, or `MissingBundleLocation` when none was supplied
    pub fn require_bundle_location(&self) -> Result<&str> {
        if self.bundle_location.is_empty() {
            Err(Error::MissingBundleLocation(self.kind.to_string()))
        } else {
            Ok(&self.bundle_location)
        }
    }
}

/// YAML reads an unquoted `version: 2.6` as a number
fn version_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<serde_yaml::Value>::deserialize(deserializer)? {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(version)) => Ok(Some(version)),
        Some(serde_yaml::Value::Number(version)) => Ok(Some(version.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "version must be a string or number, got {:?}",
            other
        ))),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Request-scoped options, overlaid on whatever descriptor resolution picked
///
/// Also the schema of `--options-file`; every field may be omitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentOptions {
    /// Registered version to resolve; default version when unset
    #[serde(deserialize_with = "version_string")]
    pub version: Option<String>,
    /// Explicit chart location, yields a `Custom` descriptor
    pub bundle_location: Option<String>,
    /// Explicit operator chart location, yields a `Custom` descriptor
    pub dependency_bundle_location: Option<String>,
    /// Enable the Eirini runtime substrate
    pub eirini: bool,
    /// Route traffic through nginx-ingress instead of LoadBalancer services
    pub ingress: bool,
    /// Enable the app autoscaler
    pub autoscaler: bool,
    /// The cluster assigns LoadBalancer addresses; otherwise node addresses are pinned
    pub load_balancer: bool,
    /// Verbose command output
    pub debug: bool,
    /// Readiness timeout in seconds
    #[serde(rename = "timeout")]
    pub timeout_secs: u64,
    /// Storage class for persistent volumes
    pub storage_class: Option<String>,
    /// Explicit system domain; derived from node addresses when unset
    pub domain: Option<String>,
    /// Extra namespaces to replicate KubeCF into
    pub additional_partitions: Vec<String>,
    /// Private registry user (carrier's kpack)
    pub registry_username: Option<String>,
    /// Private registry password (carrier's kpack)
    pub registry_password: Option<String>,
}

impl Default for DeploymentOptions {
    fn default() -> Self {
        Self {
            version: None,
            bundle_location: None,
            dependency_bundle_location: None,
            eirini: false,
            ingress: false,
            autoscaler: false,
            load_balancer: false,
            debug: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            storage_class: None,
            domain: None,
            additional_partitions: Vec::new(),
            registry_username: None,
            registry_password: None,
        }
    }
}

impl DeploymentOptions {
    /// Readiness timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Requested version, treating an empty string as unset
    pub fn requested_version(&self) -> Option<&str> {
        non_empty(&self.version)
    }

    /// Explicit domain, treating an empty string as unset
    pub fn requested_domain(&self) -> Option<&str> {
        non_empty(&self.domain)
    }

    /// Storage class, treating an empty string as unset
    pub fn storage_class(&self) -> Option<&str> {
        non_empty(&self.storage_class)
    }

    /// Options handed to an operator deployed on behalf of this request
    ///
    /// The operator inherits the runtime knobs and extra namespaces but
    /// resolves its own version from the dependency reference.
    pub fn for_dependency(&self, dependency: &DependencyRef) -> Self {
        let custom = dependency.version == CUSTOM_VERSION;
        Self {
            version: Some(dependency.version.clone()).filter(|_| !custom),
            bundle_location: dependency.bundle_location.clone().filter(|_| custom),
            dependency_bundle_location: None,
            ..self.clone()
        }
    }

    /// Options for a companion component resolved at its default version
    pub fn for_companion(&self) -> Self {
        Self {
            version: None,
            bundle_location: None,
            dependency_bundle_location: None,
            additional_partitions: Vec::new(),
            ..self.clone()
        }
    }
}

/// Built-in registry contents
mod builtin {
    pub const KUBECF_2_6_1: &str =
        "https://github.com/cloudfoundry-incubator/kubecf/releases/download/v2.6.1/kubecf-v2.6.1.tgz";
    pub const KUBECF_2_5_8: &str =
        "https://github.com/cloudfoundry-incubator/kubecf/releases/download/v2.5.8/kubecf-v2.5.8.tgz";
    pub const QUARKS_VERSION: &str = "6.1.17+0.gec409fd7";
    pub const QUARKS_6_1_17: &str =
        "https://github.com/cloudfoundry-incubator/quarks-operator/releases/download/v6.1.17/cf-operator-6.1.17+0.gec409fd7.tgz";
    /// Same operator release, as kubecf 2.6.1 pins it
    pub const QUARKS_6_1_17_S3: &str =
        "https://s3.amazonaws.com/cf-operators/release/helm-charts/cf-operator-6.1.17%2B0.gec409fd7.tgz";
    pub const NGINX_3_7_1: &str =
        "https://github.com/kubernetes/ingress-nginx/releases/download/ingress-nginx-3.7.1/ingress-nginx-3.7.1.tgz";
    pub const STRATOS_4_2_1: &str =
        "https://github.com/cloudfoundry/stratos/releases/download/4.2.1/console-helm-chart-4.2.1-15dcb83ab.tgz";
    pub const CARRIER_REPO: &str = "https://github.com/SUSE/carrier.git";
}

/// Registry of (kind, version) descriptors with one default version per kind
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    entries: Vec<ComponentDescriptor>,
    defaults: BTreeMap<ComponentKind, String>,
}

impl Catalog {
    /// A catalog with no entries
    pub fn empty() -> Self {
        Self::default()
    }

    /// The compiled-in registry
    pub fn builtin() -> Self {
        use builtin::*;
        use ComponentKind::*;

        Self::empty()
            .register(
                ComponentDescriptor::new(KubeCf, "2.6.1", KUBECF_2_6_1)
                    .depends_on(Quarks, QUARKS_VERSION)
                    .pinned_at(QUARKS_6_1_17_S3),
                true,
            )
            .register(
                ComponentDescriptor::new(KubeCf, "2.5.8", KUBECF_2_5_8)
                    .depends_on(Quarks, QUARKS_VERSION),
                false,
            )
            .register(ComponentDescriptor::new(Quarks, QUARKS_VERSION, QUARKS_6_1_17), true)
            .register(ComponentDescriptor::new(NginxIngress, "3.7.1", NGINX_3_7_1), true)
            .register(ComponentDescriptor::new(Stratos, "4.2.1", STRATOS_4_2_1), true)
            .register(
                ComponentDescriptor::new(Carrier, "0.1.0", CARRIER_REPO)
                    .depends_on(Quarks, QUARKS_VERSION),
                true,
            )
    }

    /// Add an entry, optionally making it the kind's default version
    pub fn register(mut self, descriptor: ComponentDescriptor, default: bool) -> Self {
        if default {
            self.defaults
                .insert(descriptor.kind, descriptor.version.clone());
        }
        self.entries.push(descriptor);
        self
    }

    /// Default version of a kind
    pub fn default_version(&self, kind: ComponentKind) -> Result<&str> {
        self.defaults
            .get(&kind)
            .map(String::as_str)
            .ok_or_else(|| Error::not_found(kind.as_str(), "<default>"))
    }

    /// Copy of the registered descriptor for (kind, version)
    pub fn lookup(&self, kind: ComponentKind, version: &str) -> Result<ComponentDescriptor> {
        self.entries
            .iter()
            .find(|d| d.kind == kind && d.version == version)
            .cloned()
            .ok_or_else(|| Error::not_found(kind.as_str(), version))
    }

    /// All registered (kind, version) pairs in registration order
    pub fn list(&self) -> Vec<(ComponentKind, &str)> {
        self.entries
            .iter()
            .map(|d| (d.kind, d.version.as_str()))
            .collect()
    }

    /// Registered versions of one kind
    pub fn list_kind(&self, kind: ComponentKind) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|d| d.kind == kind)
            .map(|d| d.version.as_str())
            .collect()
    }

    /// Entries whose kind name or version contains `term`
    pub fn search(&self, term: &str) -> Vec<(ComponentKind, &str)> {
        self.entries
            .iter()
            .filter(|d| d.kind.as_str().contains(term) || d.version.contains(term))
            .map(|d| (d.kind, d.version.as_str()))
            .collect()
    }

    /// Pick the descriptor a request resolves to
    ///
    /// An explicit bundle location (or operator bundle location, for kinds
    /// with an operator) short-circuits the registry and yields a `Custom`
    /// descriptor. Otherwise the requested version, or the kind's default,
    /// is looked up.
    pub fn descriptor(
        &self,
        kind: ComponentKind,
        options: &DeploymentOptions,
    ) -> Result<ComponentDescriptor> {
        let location = non_empty(&options.bundle_location);
        let dependency_location = kind
            .dependency()
            .and_then(|_| non_empty(&options.dependency_bundle_location));

        if location.is_some() || dependency_location.is_some() {
            return Ok(Self::custom(kind, location, dependency_location));
        }

        let version = match options.requested_version() {
            Some(v) => v,
            None => self.default_version(kind)?,
        };
        self.lookup(kind, version)
    }

    fn custom(
        kind: ComponentKind,
        location: Option<&str>,
        dependency_location: Option<&str>,
    ) -> ComponentDescriptor {
        let mut descriptor =
            ComponentDescriptor::new(kind, CUSTOM_VERSION, location.unwrap_or_default());
        descriptor.dependency = kind.dependency().map(|dep| DependencyRef {
            kind: dep,
            version: match dependency_location {
                Some(_) => CUSTOM_VERSION.to_string(),
                None => builtin::QUARKS_VERSION.to_string(),
            },
            bundle_location: dependency_location.map(str::to_string),
        });
        descriptor
    }

    /// Resolve a kind name and options into a deployment
    pub fn resolve(&self, kind: &str, options: &DeploymentOptions) -> Result<Box<dyn Deployment>> {
        self.resolve_kind(kind.parse()?, options)
    }

    /// Resolve a parsed kind and options into a deployment
    pub fn resolve_kind(
        &self,
        kind: ComponentKind,
        options: &DeploymentOptions,
    ) -> Result<Box<dyn Deployment>> {
        let descriptor = self.descriptor(kind, options)?;
        let options = options.clone();
        Ok(match kind {
            ComponentKind::KubeCf => Box::new(KubeCf::new(descriptor, options)),
            ComponentKind::Quarks => Box::new(Quarks::new(descriptor, options)),
            ComponentKind::NginxIngress => Box::new(NginxIngress::new(descriptor, options)),
            ComponentKind::Stratos => Box::new(Stratos::new(descriptor, options)),
            ComponentKind::Carrier => Box::new(Carrier::new(descriptor, options)),
        })
    }

    /// Resolve the operator a dependent component needs
    pub fn quarks_for(&self, dependency: &DependencyRef, options: &DeploymentOptions) -> Result<Quarks> {
        let options = options.for_dependency(dependency);
        let mut descriptor = self.descriptor(ComponentKind::Quarks, &options)?;
        if let (false, Some(pinned)) = (descriptor.is_custom(), &dependency.bundle_location) {
            descriptor.bundle_location = pinned.clone();
        }
        Ok(Quarks::new(descriptor, options))
    }

    /// Resolve the default nginx-ingress as a companion of another component
    pub fn nginx_companion(&self, options: &DeploymentOptions) -> Result<NginxIngress> {
        let options = options.for_companion();
        let descriptor = self.descriptor(ComponentKind::NginxIngress, &options)?;
        Ok(NginxIngress::new(descriptor, options))
    }
}
