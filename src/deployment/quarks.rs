//! quarks (cf-operator)
//!
//! The operator is installed into its own fixed namespace and watches a
//! single namespace, normally the one KubeCF deploys into. Extra namespaces
//! get a labelled namespace, a service account and a role binding so the
//! operator can persist job output there too.

use std::collections::BTreeMap;

use async_trait::async_trait;
use rand::Rng;
use tracing::{info, instrument};

use super::teardown::Teardown;
use super::{DeployContext, Deployment};
use crate::bundle::{ApplyMode, ApplyRequest, BundleParams};
use crate::catalog::{ComponentDescriptor, ComponentKind, DeploymentOptions};
use crate::command::LocalCommand;
use crate::error::StepContext;
use crate::{Error, Result, OPERATOR_PARTITION};

const RELEASE: &str = "cf-operator";

const QUARKS_CRDS: [&str; 4] = [
    "boshdeployments.quarks.cloudfoundry.org",
    "quarksjobs.quarks.cloudfoundry.org",
    "quarkssecrets.quarks.cloudfoundry.org",
    "quarksstatefulsets.quarks.cloudfoundry.org",
];

const SERVICE_ACCOUNT_LABEL: &str = "quarks.cloudfoundry.org/qjob-service-account";
const MONITORED_LABEL: &str = "quarks.cloudfoundry.org/monitored";
const MONITOR_ID: &str = "cfo";
const PERSIST_OUTPUT_ROLE: &str = "qjob-persist-output";

fn random_suffix(len: usize) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// The quarks operator
#[derive(Clone, Debug)]
pub struct Quarks {
    descriptor: ComponentDescriptor,
    options: DeploymentOptions,
    domain: Option<String>,
    watch_partition: String,
}

impl Quarks {
    /// Operator watching the descriptor's namespace
    pub fn new(descriptor: ComponentDescriptor, options: DeploymentOptions) -> Self {
        let watch_partition = descriptor.partition.clone();
        let domain = options.requested_domain().map(str::to_string);
        Self {
            descriptor,
            options,
            domain,
            watch_partition,
        }
    }

    /// Watch a different namespace
    pub fn watching(mut self, partition: impl Into<String>) -> Self {
        self.watch_partition = partition.into();
        self
    }

    /// Namespace the operator watches
    pub fn watch_partition(&self) -> &str {
        &self.watch_partition
    }

    async fn apply_operator(&self, ctx: &DeployContext, mode: ApplyMode) -> Result<()> {
        let location = self.descriptor.require_bundle_location()?;
        let mut params = BundleParams::new();
        params.set("global.singleNamespace.name", self.watch_partition.as_str());

        let request = ApplyRequest::new(RELEASE, OPERATOR_PARTITION, location, mode)
            .create_partition()
            .wait()
            .with_params(params);
        ctx.applier.apply(&request).await?;

        ctx.wait_partition_running(OPERATOR_PARTITION, &self.options)
            .await
            .step("while waiting for quarks operator")?;

        if mode == ApplyMode::Install {
            for partition in &self.options.additional_partitions {
                self.prepare_partition(ctx, partition)
                    .await
                    .step(&format!("while preparing additional namespace {}", partition))?;
            }
        }

        info!(version = %self.descriptor.version, "Quarks operator deployed");
        Ok(())
    }

    async fn prepare_partition(&self, ctx: &DeployContext, partition: &str) -> Result<()> {
        info!(namespace = %partition, "Preparing namespace");
        let service_account = format!("{}{}{}", partition, MONITOR_ID, random_suffix(5));
        let role_binding = format!("{}{}{}", partition, MONITOR_ID, random_suffix(5));

        let labels = BTreeMap::from([
            (SERVICE_ACCOUNT_LABEL.to_string(), service_account.clone()),
            (MONITORED_LABEL.to_string(), MONITOR_ID.to_string()),
        ]);
        ctx.cluster.create_partition(partition, labels).await?;
        ctx.cluster
            .create_service_account(partition, &service_account)
            .await?;

        ctx.runner
            .run(&LocalCommand::kubectl([
                "--namespace".to_string(),
                partition.to_string(),
                "create".to_string(),
                "rolebinding".to_string(),
                "--clusterrole".to_string(),
                PERSIST_OUTPUT_ROLE.to_string(),
                "--serviceaccount".to_string(),
                format!("{}:{}", partition, service_account),
                role_binding,
            ]))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Deployment for Quarks {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Quarks
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
        ctx.ensure_absent(OPERATOR_PARTITION, self.kind()).await?;
        info!("Deploying quarks operator");
        self.apply_operator(ctx, ApplyMode::Install).await
    }

    #[instrument(skip(self, ctx), fields(version = %self.descriptor.version))]
    async fn upgrade(&self, ctx: &DeployContext) -> Result<()> {
        if !ctx.cluster.partition_exists(OPERATOR_PARTITION).await? {
            return Err(Error::DependencyMissing(OPERATOR_PARTITION.to_string()));
        }
        info!("Upgrading quarks operator");
        self.apply_operator(ctx, ApplyMode::Upgrade).await
    }

    #[instrument(skip(self, ctx), fields(version = %self.descriptor.version))]
    async fn delete(&self, ctx: &DeployContext) -> Result<()> {
        let mut teardown = Teardown::new(ctx);
        for crd in QUARKS_CRDS {
            teardown
                .cleanup(LocalCommand::kubectl(["delete", "crds", crd]))
                .await;
        }
        for partition in &self.options.additional_partitions {
            teardown.delete_partition(partition).await;
        }
        teardown.delete_partition(&self.watch_partition).await;
        teardown.delete_partition(OPERATOR_PARTITION).await;

        info!("Quarks operator deleted");
        teardown.finish()
    }
}
