//! The reconciliation engine
//!
//! Translates a service instance plus its resolved health check into the
//! proxy state that should exist, and converges the proxy onto it:
//!
//! - [`intent`]: tag parsing and the effective-check priority ladder
//! - [`naming`]: deterministic backend/server/ACL names
//! - [`backend`]: backend existence and health-check convergence
//! - [`server`]: server entries per `(backend, address, port)`
//! - [`frontend`]: transactional host-header routing rules
//! - [`drain`]: graceful deregistration and scheduled deletion

pub mod backend;
pub mod drain;
pub mod frontend;
pub mod intent;
pub mod naming;
pub mod server;

use std::future::Future;

use serde::Serialize;
use tracing::debug;

use crate::haproxy::DataplaneApi;
use crate::{Error, Result};

/// Result of one reconcile step against one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The target did not exist and was created
    Created,
    /// The target existed and diverged; it was updated in place
    Updated,
    /// The target already existed in the desired shape
    AlreadyExists,
    /// The target matched the desired state; nothing written
    Unchanged,
    /// The server entered runtime drain; deletion is scheduled
    Draining,
    /// The target was deleted
    Deleted,
    /// The step did not apply
    Skipped {
        /// Why the step was skipped
        reason: String,
    },
    /// The event did not engage the bridge at all
    Ignored {
        /// Why the event was ignored
        reason: String,
    },
}

/// What a registration did, per target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationReport {
    /// Backend the instance was reconciled into
    pub backend: String,
    /// Derived server name
    pub server: String,
    /// Backend reconcile result
    pub backend_outcome: Outcome,
    /// Server reconcile result
    pub server_outcome: Outcome,
    /// Frontend-rule result, absent when the service has no domain tag
    pub rule_outcome: Option<Outcome>,
}

/// How a deregistration released the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeregistrationReport {
    /// Backend the server belonged to
    pub backend: String,
    /// Derived server name
    pub server: String,
    /// `Draining` or `Deleted`
    pub outcome: Outcome,
    /// Path taken
    pub method: DeregistrationMethod,
}

/// Deregistration path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeregistrationMethod {
    /// Runtime drain accepted; deletion scheduled after the drain timeout
    GracefulDrain,
    /// Drain failed; the server was deleted on the spot
    ImmediateDeletion,
}

/// Run a versioned mutation, retrying once on a version conflict after
/// re-reading the configuration version. A second conflict is surfaced.
pub(crate) async fn with_version_retry<A, F, Fut, T>(api: &A, mut op: F) -> Result<T>
where
    A: DataplaneApi + ?Sized,
    F: FnMut(i64) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let version = api.configuration_version().await?;
    match op(version).await {
        Err(Error::VersionConflict) => {
            debug!(version, "Version conflict, retrying with fresh version");
            let version = api.configuration_version().await?;
            op(version).await
        }
        other => other,
    }
}
