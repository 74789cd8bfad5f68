//! Fail-soft teardown
//!
//! Delete has to make progress from any partially applied state, so nothing
//! here aborts. Local cleanup commands (kubectl deletes of cluster-scoped
//! leftovers) usually fail because the object is already gone; those are
//! logged and dropped. Cluster API failures are remembered and reported once
//! every step has run.

use std::future::Future;

use tracing::{debug, warn};

use super::DeployContext;
use crate::command::LocalCommand;
use crate::{Error, Result};

/// Accumulates teardown failures across steps
pub(crate) struct Teardown<'a> {
    ctx: &'a DeployContext,
    failures: Vec<String>,
}

impl<'a> Teardown<'a> {
    pub(crate) fn new(ctx: &'a DeployContext) -> Self {
        Self {
            ctx,
            failures: Vec::new(),
        }
    }

    /// Run a cleanup command, ignoring failure
    pub(crate) async fn cleanup(&mut self, command: LocalCommand) {
        if let Err(e) = self.ctx.runner.run(&command).await {
            debug!(command = %command, error = %e, "Cleanup step failed, ignoring");
        }
    }

    /// Delete a namespace, remembering API failures
    pub(crate) async fn delete_partition(&mut self, name: &str) {
        if let Err(e) = self.ctx.cluster.delete_partition(name).await {
            warn!(namespace = %name, error = %e, "Failed to delete namespace");
            self.failures.push(format!("delete namespace {}: {}", name, e));
        }
    }

    /// Run a nested teardown, remembering its failure
    pub(crate) async fn nested<F>(&mut self, what: &str, teardown: F)
    where
        F: Future<Output = Result<()>>,
    {
        if let Err(e) = teardown.await {
            warn!(step = %what, error = %e, "Nested teardown failed");
            self.failures.push(format!("{}: {}", what, e));
        }
    }

    /// Success unless a cluster API call failed
    pub(crate) fn finish(self) -> Result<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Teardown(self.failures))
        }
    }
}
