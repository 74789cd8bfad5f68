//! cfdeploy - catalog-driven lifecycle orchestrator for KubeCF and its companions
//!
//! cfdeploy installs, upgrades, deletes, backs up and restores a small set of
//! interdependent Helm-packaged components (KubeCF, the quarks operator,
//! nginx-ingress, the Stratos console and carrier) on a Kubernetes cluster.
//!
//! # Architecture
//!
//! - A [`catalog::Catalog`] resolves a component kind plus options into a
//!   concrete [`deployment::Deployment`]
//! - The [`install::Installer`] drives that deployment through its lifecycle and
//!   derives a `nip.io` domain from the cluster's external addresses when none is given
//! - Every lifecycle step is gated by the [`readiness::ReadinessPoller`]
//! - [`backup`] snapshots and replays KubeCF state through pod exec
//!
//! # Modules
//!
//! - [`catalog`] - Component kinds, descriptors, options and the built-in registry
//! - [`deployment`] - One lifecycle implementation per component kind
//! - [`readiness`] - Bounded polling for pod existence and readiness
//! - [`backup`] - Backup artifact layout and the backup/restore sequence
//! - [`install`] - The lifecycle orchestrator
//! - [`cluster`] - Cluster handle abstraction over kube-rs and platform detection
//! - [`bundle`] - Helm chart application
//! - [`command`] - Local command execution (kubectl, git, installer scripts)
//! - [`config`] - Kubeconfig resolution and option files
//! - [`cli`] - Command-line surface
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod backup;
pub mod bundle;
pub mod catalog;
pub mod cli;
pub mod cluster;
pub mod command;
pub mod config;
pub mod deployment;
pub mod error;
pub mod install;
pub mod readiness;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Default readiness timeout in seconds for every lifecycle wait
pub const DEFAULT_TIMEOUT_SECS: u64 = 1000;

/// Default interval between readiness polls in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Wildcard DNS suffix used to derive a domain from a cluster address
pub const MAGIC_DNS_SUFFIX: &str = "nip.io";

/// Partition the quarks operator itself is installed into
pub const OPERATOR_PARTITION: &str = "cf-operator";
