//! Bounded readiness polling
//!
//! A chart install returns long before its pods exist. Every lifecycle step
//! that depends on the cluster catching up blocks here, on a fixed-interval
//! poll with an explicit deadline. There is no backoff and no retry of the
//! surrounding step; a wait either succeeds, fails on a terminal unit state,
//! or times out.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::cluster::ClusterHandle;
use crate::{Error, Result, DEFAULT_POLL_INTERVAL_MS};

/// Poll cadence shared by every wait
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between two checks of the same condition
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl PollConfig {
    /// Poll at a custom interval
    pub fn with_interval(interval: Duration) -> Self {
        Self { interval }
    }
}

/// What to wait for: units matching a selector inside one partition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadinessQuery {
    /// Partition (namespace) to query
    pub partition: String,
    /// Label selector; empty matches every unit
    pub selector: String,
    /// Upper bound for the wait
    pub timeout: Duration,
}

impl ReadinessQuery {
    /// Build a query
    pub fn new(
        partition: impl Into<String>,
        selector: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            partition: partition.into(),
            selector: selector.into(),
            timeout,
        }
    }

    fn describe(&self) -> String {
        if self.selector.is_empty() {
            format!("pods in {}", self.partition)
        } else {
            format!("pods in {} with selector {}", self.partition, self.selector)
        }
    }
}

/// Converts asynchronous cluster state into a synchronous result
#[derive(Clone)]
pub struct ReadinessPoller {
    cluster: Arc<dyn ClusterHandle>,
    config: PollConfig,
}

impl ReadinessPoller {
    /// Poll the given cluster with the given cadence
    pub fn new(cluster: Arc<dyn ClusterHandle>, config: PollConfig) -> Self {
        Self { cluster, config }
    }

    /// Block until at least one unit matches the query
    ///
    /// The first check happens immediately. Query errors abort the wait.
    pub async fn wait_for_existence(&self, query: &ReadinessQuery) -> Result<()> {
        info!(
            namespace = %query.partition,
            selector = %query.selector,
            "Waiting for pods to exist"
        );
        let what = query.describe();
        let cluster = &self.cluster;
        self.poll_until(&what, query.timeout, || async move {
            let units = cluster.list_units(&query.partition, &query.selector).await?;
            Ok(!units.is_empty())
        })
        .await
    }

    /// Block until every unit that matches the query *right now* is ready
    ///
    /// The unit set is a point-in-time snapshot: units created after this call
    /// starts are never observed. An empty snapshot fails immediately with
    /// `NoUnitsFound`. Units are awaited one after another and each one gets
    /// the full timeout. A unit in the `Failed` phase ends the wait with
    /// `UnitFailed`; a unit that has disappeared is polled again, since its
    /// controller may be recreating it under the same name.
    pub async fn wait_for_running(&self, query: &ReadinessQuery) -> Result<()> {
        let units = self
            .cluster
            .list_units(&query.partition, &query.selector)
            .await?;
        if units.is_empty() {
            return Err(Error::NoUnitsFound {
                partition: query.partition.clone(),
                selector: query.selector.clone(),
            });
        }

        info!(
            namespace = %query.partition,
            selector = %query.selector,
            count = units.len(),
            "Waiting for pods to be running"
        );

        let cluster = &self.cluster;
        for unit in &units {
            debug!(namespace = %query.partition, pod = %unit.name, "Waiting for pod");
            let what = format!("pod {}/{}", query.partition, unit.name);
            self.poll_until(&what, query.timeout, || async move {
                match cluster.get_unit(&query.partition, &unit.name).await? {
                    Some(current) if current.is_failed() => Err(Error::UnitFailed {
                        partition: query.partition.clone(),
                        unit: current.name,
                    }),
                    Some(current) => Ok(current.is_ready()),
                    None => Ok(false),
                }
            })
            .await?;
        }

        Ok(())
    }

    async fn poll_until<F, Fut>(&self, what: &str, timeout: Duration, mut check: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if check().await? {
                debug!(what = %what, "Condition met");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::timeout(what, timeout));
            }
            tokio::time::sleep(self.config.interval).await;
        }
    }
}
