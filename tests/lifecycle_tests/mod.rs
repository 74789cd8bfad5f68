//! Lifecycle stories
//!
//! # Test Organization
//!
//! - `fake`: the recording fake that stands in for the cluster, the chart
//!   applier and the local command runner at once
//!
//! - `deploy_ordering`: Stories about what a KubeCF install brings up and in
//!   which order (operator first, nginx-ingress before KubeCF with ingress)
//!
//! - `backup_restore`: A backup taken from one deployment replayed into a
//!   fresh one, ending with the restored encryption keys applied
//!
//! - `teardown`: Fail-soft deletes that keep going past failures
//!
//! - `readiness`: Polling against units that appear late or never
//!
//! - `catalog`: Resolution properties over the built-in catalog
//!
//! - `kind_smoke`: Read-only checks against a real cluster (ignored)

mod backup_restore;
mod catalog;
mod deploy_ordering;
mod fake;
mod teardown;
