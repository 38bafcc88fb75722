//! Backend reconciliation
//!
//! Ensures a backend exists with the health-check fields the effective check
//! demands. An existing backend is repaired in place when its check fields
//! diverge: a stale "roundrobin without checks" backend left by an older
//! deployment must not cause later registrations to silently attach servers
//! with no health probe.

use tracing::info;

use super::intent::EffectiveCheck;
use super::{Outcome, with_version_retry};
use crate::haproxy::{Backend, Balance, DataplaneApi, DefaultServer, HttpCheckParams};
use crate::{Error, Result};

/// The backend document the effective check maps onto
#[must_use]
pub fn desired_backend(name: &str, check: &EffectiveCheck) -> Backend {
    let (adv_check, http_check_params, server_check) = match check {
        EffectiveCheck::Http { path, method, host } => (
            "httpchk".to_string(),
            Some(HttpCheckParams {
                uri: path.clone(),
                method: method.clone(),
                host: host.clone(),
            }),
            "enabled",
        ),
        EffectiveCheck::Tcp => (String::new(), None, "enabled"),
        EffectiveCheck::Disabled => (String::new(), None, "disabled"),
    };

    Backend {
        name: name.to_string(),
        balance: Some(Balance::round_robin()),
        adv_check,
        http_check_params,
        default_server: Some(DefaultServer {
            check: Some(server_check.to_string()),
        }),
    }
}

fn check_fields_match(existing: &Backend, desired: &Backend) -> bool {
    existing.adv_check == desired.adv_check
        && existing.http_check_params == desired.http_check_params
        && existing.default_server.as_ref().and_then(|d| d.check.as_deref())
            == desired.default_server.as_ref().and_then(|d| d.check.as_deref())
}

/// Idempotently ensure `name` exists with the desired check fields.
///
/// An existing backend is adopted only if it balances `roundrobin`; anything
/// else fails with [`Error::IncompatibleBackend`] rather than silently
/// attaching servers to a pool with foreign semantics.
pub async fn ensure_backend(
    api: &dyn DataplaneApi,
    name: &str,
    check: &EffectiveCheck,
) -> Result<Outcome> {
    let desired = desired_backend(name, check);

    let Some(existing) = api.backend(name).await? else {
        with_version_retry(api, |version| api.create_backend(&desired, version)).await?;
        info!(backend = %name, "Backend created");
        return Ok(Outcome::Created);
    };

    if existing.algorithm() != Balance::ROUND_ROBIN {
        return Err(Error::IncompatibleBackend {
            backend: name.to_string(),
            algorithm: existing.algorithm().to_string(),
        });
    }

    if check_fields_match(&existing, &desired) {
        return Ok(Outcome::Unchanged);
    }

    // Read-modify-write: only the check fields the bridge owns change
    let mut updated = existing;
    updated.adv_check = desired.adv_check;
    updated.http_check_params = desired.http_check_params;
    updated.default_server = desired.default_server;

    with_version_retry(api, |version| api.replace_backend(&updated, version)).await?;
    info!(backend = %name, "Backend check fields updated");
    Ok(Outcome::Updated)
}
