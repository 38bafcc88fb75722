//! Graceful deregistration
//!
//! A deregistered server is first transitioned to runtime `drain` so
//! in-flight connections finish, then deleted after the configured timeout.
//! When the drain transition itself fails (server unknown to the runtime,
//! API error) the entry is deleted on the spot.
//!
//! Scheduled deletions are first-class: the scheduler holds every pending
//! timer so shutdown can enumerate them, let them attempt one best-effort
//! delete, and bound the wait.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{DeregistrationMethod, DeregistrationReport, Outcome, frontend, server};
use crate::haproxy::{AdminState, DataplaneApi};
use crate::Result;

/// Bound on the best-effort delete a timer performs when shutdown arrives
/// before its drain timeout elapsed
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Owns the pending scheduled deletions
pub struct DrainScheduler {
    api: Arc<dyn DataplaneApi>,
    frontend: String,
    drain_timeout: Duration,
    shutdown: broadcast::Sender<()>,
    pending: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl DrainScheduler {
    /// Create a scheduler deleting via `api` after `drain_timeout`
    pub fn new(
        api: Arc<dyn DataplaneApi>,
        frontend: String,
        drain_timeout: Duration,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            api,
            frontend,
            drain_timeout,
            shutdown,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Deregister a server: drain and schedule deletion, or delete
    /// immediately when the drain transition fails
    pub async fn deregister(&self, backend: &str, server_name: &str) -> Result<DeregistrationReport> {
        match self
            .api
            .set_server_admin_state(backend, server_name, AdminState::Drain)
            .await
        {
            Ok(()) => {
                info!(
                    backend,
                    server = %server_name,
                    timeout = ?self.drain_timeout,
                    "Server draining, deletion scheduled"
                );
                self.schedule_deletion(backend.to_string(), server_name.to_string());
                Ok(DeregistrationReport {
                    backend: backend.to_string(),
                    server: server_name.to_string(),
                    outcome: Outcome::Draining,
                    method: DeregistrationMethod::GracefulDrain,
                })
            }
            Err(e) => {
                warn!(
                    backend,
                    server = %server_name,
                    error = %e,
                    "Drain failed, deleting immediately"
                );
                let outcome =
                    delete_and_cleanup(self.api.as_ref(), &self.frontend, backend, server_name)
                        .await?;
                Ok(DeregistrationReport {
                    backend: backend.to_string(),
                    server: server_name.to_string(),
                    outcome,
                    method: DeregistrationMethod::ImmediateDeletion,
                })
            }
        }
    }

    /// Cancel a pending deletion, returning whether one existed. Called when
    /// an instance re-registers inside its drain window.
    pub fn cancel(&self, backend: &str, server_name: &str) -> bool {
        let key = pending_key(backend, server_name);
        if let Some(handle) = self.pending.lock().remove(&key) {
            handle.abort();
            debug!(backend, server = %server_name, "Scheduled deletion cancelled");
            true
        } else {
            false
        }
    }

    /// Number of deletions still scheduled
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn schedule_deletion(&self, backend: String, server_name: String) {
        let key = pending_key(&backend, &server_name);
        let api = Arc::clone(&self.api);
        let frontend = self.frontend.clone();
        let timeout = self.drain_timeout;
        let mut shutdown = self.shutdown.subscribe();
        let pending = Arc::clone(&self.pending);
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            let interrupted = tokio::select! {
                () = tokio::time::sleep(timeout) => false,
                _ = shutdown.recv() => true,
            };

            let delete = delete_and_cleanup(api.as_ref(), &frontend, &backend, &server_name);
            if interrupted {
                // Shutdown arrived first: one best-effort attempt, bounded
                match tokio::time::timeout(SHUTDOWN_GRACE, delete).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        warn!(backend = %backend, server = %server_name, error = %e,
                            "Best-effort delete during shutdown failed");
                    }
                    Err(_) => {
                        warn!(backend = %backend, server = %server_name,
                            "Best-effort delete during shutdown timed out");
                    }
                }
            } else if let Err(e) = delete.await {
                warn!(backend = %backend, server = %server_name, error = %e,
                    "Scheduled deletion failed");
            }

            pending.lock().remove(&task_key);
        });

        // A second deregistration for the same server resets its timer
        if let Some(previous) = self.pending.lock().insert(key, handle) {
            previous.abort();
        }
    }

    /// Wait for outstanding timers to finish their best-effort deletes,
    /// bounded by `grace`; whatever remains is aborted
    pub async fn shutdown(&self, grace: Duration) {
        let handles: Vec<JoinHandle<()>> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, handle)| handle).collect()
        };

        if handles.is_empty() {
            return;
        }

        info!(pending = handles.len(), "Waiting for scheduled deletions");
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        if tokio::time::timeout(grace, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!("Scheduled deletions did not finish within grace, aborting");
            for abort in aborts {
                abort.abort();
            }
        }
    }
}

fn pending_key(backend: &str, server_name: &str) -> String {
    format!("{backend}/{server_name}")
}

/// Delete a server and, when its backend has no servers left, remove every
/// routing rule that pointed at the backend. Shared by the drain timer, the
/// immediate-deletion path, and the sweeper.
pub async fn delete_and_cleanup(
    api: &dyn DataplaneApi,
    frontend_name: &str,
    backend: &str,
    server_name: &str,
) -> Result<Outcome> {
    let outcome = server::delete_server(api, backend, server_name).await?;

    let remaining = api.servers(backend).await?;
    if remaining.is_empty() {
        frontend::remove_rules_for_backend(api, frontend_name, backend).await?;
    }

    Ok(outcome)
}
