//! Initial sync and stale-server sweep
//!
//! Replays the orchestrator's full service set through the regular dispatch
//! path, then deletes proxy servers that no longer correspond to a live
//! instance. The sweep only touches backends derived from enabled services;
//! backends the bridge knows nothing about may be operator-managed and are
//! left alone.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{info, warn};

use crate::dispatch::Dispatcher;
use crate::nomad::{Event, ServiceInstance};
use crate::reconcile::{drain, intent, naming};

/// Summary of one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Instances replayed through the dispatcher
    pub replayed: usize,
    /// Replays that failed (logged, non-fatal)
    pub failed: usize,
    /// Orphaned servers deleted by the sweep, as `backend/server`
    pub swept: Vec<String>,
}

/// Reconcile the full service set and sweep stale servers
pub async fn run(dispatcher: &Dispatcher, instances: Vec<ServiceInstance>) -> SyncReport {
    let mut report = SyncReport::default();

    // Desired state: backend -> servers, restricted to opted-in services
    let mut expected: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for instance in &instances {
        if !intent::parse_tags(&instance.tags).enabled {
            continue;
        }
        expected
            .entry(naming::sanitize_backend(&instance.service_name))
            .or_default()
            .insert(naming::server_name(
                &instance.service_name,
                &instance.address,
                instance.port,
            ));
    }

    // Replay every instance through the regular dispatch path
    for instance in instances {
        let service = instance.service_name.clone();
        let event = Event::synthetic_registration(instance);

        report.replayed += 1;
        if let Err(e) = dispatcher.process(&event).await {
            report.failed += 1;
            warn!(service = %service, error = %e, "Sync reconcile failed");
        }
    }

    // Sweep: delete servers the orchestrator no longer advertises
    for (backend, keep) in &expected {
        let servers = match dispatcher.api().servers(backend).await {
            Ok(servers) => servers,
            Err(e) => {
                warn!(backend = %backend, error = %e, "Sweep could not list servers");
                continue;
            }
        };

        for server in servers {
            if keep.contains(&server.name) {
                continue;
            }
            match drain::delete_and_cleanup(
                dispatcher.api(),
                dispatcher.frontend(),
                backend,
                &server.name,
            )
            .await
            {
                Ok(_) => {
                    info!(backend = %backend, server = %server.name, "Swept stale server");
                    report.swept.push(format!("{backend}/{}", server.name));
                }
                Err(e) => {
                    warn!(backend = %backend, server = %server.name, error = %e, "Sweep delete failed");
                }
            }
        }
    }

    info!(
        replayed = report.replayed,
        failed = report.failed,
        swept = report.swept.len(),
        "Sync pass complete"
    );
    report
}
