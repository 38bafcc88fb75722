//! Server reconciliation
//!
//! One server entry per `(backend, address, port)`, keyed by the derived
//! name. Existence is the idempotency check: a re-registration of the same
//! instance is a no-op.

use tracing::info;

use super::{Outcome, naming, with_version_retry};
use crate::haproxy::{DataplaneApi, Server};
use crate::Result;

/// Idempotently ensure a server entry for the instance, returning the
/// derived server name alongside the outcome
pub async fn ensure_server(
    api: &dyn DataplaneApi,
    backend: &str,
    service_name: &str,
    address: &str,
    port: u16,
    check_enabled: bool,
) -> Result<(String, Outcome)> {
    let name = naming::server_name(service_name, address, port);

    let existing = api.servers(backend).await?;
    if existing.iter().any(|s| s.name == name) {
        return Ok((name, Outcome::AlreadyExists));
    }

    let server = Server {
        name: name.clone(),
        address: address.to_string(),
        port: Some(port),
        check: Some(if check_enabled { "enabled" } else { "disabled" }.to_string()),
    };

    with_version_retry(api, |version| api.create_server(backend, &server, version)).await?;
    info!(backend, server = %name, "Server created");
    Ok((name, Outcome::Created))
}

/// Delete a server entry. A server that is already gone is not an error;
/// drain timers and the sweeper may race over the same entry.
pub async fn delete_server(api: &dyn DataplaneApi, backend: &str, name: &str) -> Result<Outcome> {
    match with_version_retry(api, |version| api.delete_server(backend, name, version)).await {
        Ok(()) => {
            info!(backend, server = %name, "Server deleted");
            Ok(Outcome::Deleted)
        }
        Err(e) if e.is_not_found() => Ok(Outcome::Skipped {
            reason: "server already absent".to_string(),
        }),
        Err(e) => Err(e),
    }
}
