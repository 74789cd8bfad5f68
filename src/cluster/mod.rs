//! Cluster handle abstraction
//!
//! Everything the lifecycle code needs from a cluster goes through the
//! [`ClusterHandle`] trait: namespace ("partition") queries, pod ("unit")
//! queries, pod exec and the externally reachable node addresses. The
//! production implementation lives in [`kube`]; tests use mocks or the
//! recording fake in the lifecycle integration tests.

mod kube;
pub mod platform;

use std::collections::BTreeMap;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::Result;

pub use self::kube::KubeCluster;
pub use platform::Platform;

/// Lifecycle phase of a unit as reported by the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitPhase {
    /// Accepted but not all containers have started
    Pending,
    /// Bound to a node with at least one container running
    Running,
    /// All containers terminated successfully
    Succeeded,
    /// All containers terminated and at least one failed
    Failed,
    /// Phase could not be determined
    Unknown,
}

impl UnitPhase {
    /// Parse the pod phase string reported by the API server
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => Self::Pending,
            Some("Running") => Self::Running,
            Some("Succeeded") => Self::Succeeded,
            Some("Failed") => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// Snapshot of a single unit (pod)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unit {
    /// Pod name
    pub name: String,
    /// Overall phase
    pub phase: UnitPhase,
    /// True while any container is still in its waiting state
    pub containers_waiting: bool,
}

impl Unit {
    /// Build a unit snapshot
    pub fn new(name: impl Into<String>, phase: UnitPhase, containers_waiting: bool) -> Self {
        Self {
            name: name.into(),
            phase,
            containers_waiting,
        }
    }

    /// All containers are past waiting and the pod is running or completed
    pub fn is_ready(&self) -> bool {
        !self.containers_waiting && matches!(self.phase, UnitPhase::Running | UnitPhase::Succeeded)
    }

    /// The unit reached a terminal failure and will never become ready
    pub fn is_failed(&self) -> bool {
        self.phase == UnitPhase::Failed
    }
}

/// Buffered result of a remote command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Everything the command wrote to stdout
    pub stdout: Vec<u8>,
    /// Everything the command wrote to stderr
    pub stderr: String,
}

/// Operations the orchestrator performs against a cluster
///
/// Implementations must treat partition deletion as idempotent: deleting a
/// partition that does not exist is not an error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterHandle: Send + Sync {
    /// List units in a partition matching a label selector (empty selector matches all)
    async fn list_units(&self, partition: &str, selector: &str) -> Result<Vec<Unit>>;

    /// Get a single unit; `None` when it does not exist
    async fn get_unit(&self, partition: &str, name: &str) -> Result<Option<Unit>>;

    /// Whether the partition exists
    async fn partition_exists(&self, name: &str) -> Result<bool>;

    /// Create a partition carrying the given labels
    async fn create_partition(&self, name: &str, labels: BTreeMap<String, String>) -> Result<()>;

    /// Delete a partition; absent partitions are not an error
    async fn delete_partition(&self, name: &str) -> Result<()>;

    /// Create a service account inside a partition
    async fn create_service_account(&self, partition: &str, name: &str) -> Result<()>;

    /// Delete a unit so its controller recreates it
    async fn delete_unit(&self, partition: &str, name: &str) -> Result<()>;

    /// Run a command inside a unit's container and buffer its output
    ///
    /// A non-zero exit surfaces as `ExternalCommandFailed`.
    async fn exec(
        &self,
        partition: &str,
        unit: &str,
        container: &str,
        command: &[String],
        stdin: Option<Vec<u8>>,
    ) -> Result<ExecOutput>;

    /// Read one key of a secret as UTF-8
    async fn secret_value(&self, partition: &str, secret: &str, key: &str) -> Result<String>;

    /// Externally reachable node addresses, in node order
    async fn external_addresses(&self) -> Result<Vec<String>>;
}
