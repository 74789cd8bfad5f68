//! Recording fake cluster
//!
//! One value plays the cluster, the chart applier and the local command
//! runner, and writes every call to a shared event log so tests can assert
//! on ordering across all three.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use cfdeploy::bundle::{ApplyRequest, BundleApplier};
use cfdeploy::catalog::Catalog;
use cfdeploy::cluster::{ClusterHandle, ExecOutput, Unit, UnitPhase};
use cfdeploy::command::{CommandRunner, LocalCommand};
use cfdeploy::deployment::DeployContext;
use cfdeploy::install::Installer;
use cfdeploy::readiness::PollConfig;
use cfdeploy::{Error, Result};

/// One exec into a unit
#[derive(Clone, Debug)]
pub struct ExecCall {
    pub partition: String,
    pub unit: String,
    pub container: String,
    pub command: Vec<String>,
    pub stdin: Option<Vec<u8>>,
}

impl ExecCall {
    pub fn line(&self) -> String {
        self.command.join(" ")
    }
}

#[derive(Default)]
pub struct FakeState {
    /// Namespaces that exist
    pub partitions: BTreeSet<String>,
    /// Node addresses reported by the cluster
    pub addresses: Vec<String>,
    /// Canned stdout keyed by command line prefix
    pub exec_outputs: BTreeMap<String, Vec<u8>>,
    /// Number of `list_units` calls that see nothing before units appear
    pub hidden_polls: usize,
    /// Namespaces whose deletion fails
    pub failing_deletes: BTreeSet<String>,
    /// Make every local command fail
    pub failing_commands: bool,

    pub events: Vec<String>,
    pub applies: Vec<ApplyRequest>,
    pub execs: Vec<ExecCall>,
    pub commands: Vec<LocalCommand>,
    pub deleted_partitions: Vec<String>,
    pub deleted_units: Vec<String>,
    pub list_calls: usize,
    pub get_calls: usize,
}

pub struct FakeCluster {
    state: Mutex<FakeState>,
}

impl FakeCluster {
    pub fn new(addresses: &[&str]) -> Arc<Self> {
        let state = FakeState {
            addresses: addresses.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        };
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn with_partitions(self: Arc<Self>, partitions: &[&str]) -> Arc<Self> {
        self.state()
            .partitions
            .extend(partitions.iter().map(|p| p.to_string()));
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.state().events.clone()
    }

    pub fn applies(&self) -> Vec<ApplyRequest> {
        self.state().applies.clone()
    }

    pub fn execs(&self) -> Vec<ExecCall> {
        self.state().execs.clone()
    }

    fn record(&self, event: String) {
        self.state().events.push(event);
    }
}

/// Context over the fake with a 1ms poll interval
pub fn context(fake: &Arc<FakeCluster>) -> DeployContext {
    DeployContext::new(
        fake.clone(),
        fake.clone(),
        fake.clone(),
        Arc::new(Catalog::builtin()),
    )
    .with_poll_config(PollConfig::with_interval(Duration::from_millis(1)))
}

pub fn installer(fake: &Arc<FakeCluster>) -> Installer {
    Installer::new(context(fake))
}

#[async_trait]
impl ClusterHandle for FakeCluster {
    async fn list_units(&self, partition: &str, _selector: &str) -> Result<Vec<Unit>> {
        let mut state = self.state();
        state.list_calls += 1;
        if !state.partitions.contains(partition) {
            return Ok(Vec::new());
        }
        if state.hidden_polls > 0 {
            state.hidden_polls -= 1;
            return Ok(Vec::new());
        }
        Ok(vec![Unit::new(
            format!("{}-0", partition),
            UnitPhase::Running,
            false,
        )])
    }

    async fn get_unit(&self, partition: &str, name: &str) -> Result<Option<Unit>> {
        let mut state = self.state();
        state.get_calls += 1;
        if !state.partitions.contains(partition) {
            return Ok(None);
        }
        Ok(Some(Unit::new(name, UnitPhase::Running, false)))
    }

    async fn partition_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state().partitions.contains(name))
    }

    async fn create_partition(&self, name: &str, _labels: BTreeMap<String, String>) -> Result<()> {
        self.record(format!("create namespace {}", name));
        self.state().partitions.insert(name.to_string());
        Ok(())
    }

    async fn delete_partition(&self, name: &str) -> Result<()> {
        self.record(format!("delete namespace {}", name));
        let mut state = self.state();
        state.deleted_partitions.push(name.to_string());
        if state.failing_deletes.contains(name) {
            return Err(Error::Connect(format!("cannot delete {}", name)));
        }
        state.partitions.remove(name);
        Ok(())
    }

    async fn create_service_account(&self, partition: &str, name: &str) -> Result<()> {
        self.record(format!("create serviceaccount {}/{}", partition, name));
        Ok(())
    }

    async fn delete_unit(&self, partition: &str, name: &str) -> Result<()> {
        self.record(format!("delete pod {}/{}", partition, name));
        self.state().deleted_units.push(name.to_string());
        Ok(())
    }

    async fn exec(
        &self,
        partition: &str,
        unit: &str,
        container: &str,
        command: &[String],
        stdin: Option<Vec<u8>>,
    ) -> Result<ExecOutput> {
        let call = ExecCall {
            partition: partition.to_string(),
            unit: unit.to_string(),
            container: container.to_string(),
            command: command.to_vec(),
            stdin,
        };
        let line = call.line();
        self.record(format!("exec {}/{} {}", partition, unit, line));

        let mut state = self.state();
        let stdout = state
            .exec_outputs
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default();
        state.execs.push(call);
        Ok(ExecOutput {
            stdout,
            stderr: String::new(),
        })
    }

    async fn secret_value(&self, _partition: &str, _secret: &str, _key: &str) -> Result<String> {
        Ok("admin-password".to_string())
    }

    async fn external_addresses(&self) -> Result<Vec<String>> {
        Ok(self.state().addresses.clone())
    }
}

#[async_trait]
impl BundleApplier for FakeCluster {
    async fn apply(&self, request: &ApplyRequest) -> Result<String> {
        self.record(format!(
            "helm {} {} -n {}",
            request.mode, request.release, request.partition
        ));
        let mut state = self.state();
        state.applies.push(request.clone());
        state.partitions.insert(request.partition.clone());
        // the operator creates the namespace it watches
        if let Some(watched) = request.params.get("global.singleNamespace.name") {
            state.partitions.insert(watched.to_string());
        }
        Ok(String::new())
    }
}

#[async_trait]
impl CommandRunner for FakeCluster {
    async fn run(&self, command: &LocalCommand) -> Result<String> {
        self.record(format!("run {}", command));
        let mut state = self.state();
        state.commands.push(command.clone());
        if state.failing_commands {
            return Err(Error::command_failed(command.to_string(), "NotFound"));
        }
        Ok(String::new())
    }
}
