//! Process orchestration
//!
//! Wires the clients, the dispatcher, the drain scheduler, and the admin
//! server together, runs the event loop, and fans the shutdown signal out to
//! every task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{Notify, broadcast, mpsc};
use tracing::{info, warn};

use crate::admin::{self, AdminContext};
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::haproxy::{DataplaneApi, DataplaneClient};
use crate::metrics::Metrics;
use crate::nomad::NomadClient;
use crate::reconcile::drain::DrainScheduler;
use crate::{Error, Result, sync};

/// How long shutdown waits for pending drain deletions
const DRAIN_SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// The assembled bridge process
pub struct Bridge {
    config: Config,
    api: Arc<DataplaneClient>,
    nomad: Arc<NomadClient>,
    metrics: Arc<Metrics>,
}

impl Bridge {
    /// Construct the clients and probe the Data Plane API. An unreachable
    /// proxy is a fatal startup error.
    pub async fn new(config: Config) -> Result<Self> {
        let api = Arc::new(DataplaneClient::new(&config.haproxy)?);

        let dataplane = api.info().await.map_err(|e| {
            Error::Config(format!(
                "Data Plane API unreachable at {}: {e}",
                config.haproxy.address
            ))
        })?;
        info!(
            version = dataplane.api.and_then(|a| a.version).as_deref().unwrap_or("unknown"),
            "Data Plane API reachable"
        );

        let nomad = Arc::new(NomadClient::new(&config.nomad)?);

        Ok(Self {
            config,
            api,
            nomad,
            metrics: Arc::new(Metrics::new()),
        })
    }

    /// Run until a shutdown signal. `initial_sync` controls the startup
    /// reconcile-and-sweep pass.
    pub async fn run(self, initial_sync: bool) -> Result<()> {
        let (shutdown_tx, _) = broadcast::channel(1);

        let api: Arc<dyn DataplaneApi> = self.api.clone();
        let drains = Arc::new(DrainScheduler::new(
            Arc::clone(&api),
            self.config.haproxy.frontend.clone(),
            self.config.connector.drain_timeout,
            shutdown_tx.clone(),
        ));
        let dispatcher = Dispatcher::new(
            api,
            self.nomad.clone(),
            Arc::clone(&drains),
            self.config.haproxy.frontend.clone(),
            Arc::clone(&self.metrics),
        );

        // Admin server; a failed bind is a startup error
        let admin_addr = SocketAddr::new(
            self.config
                .admin
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid admin host: {e}")))?,
            self.config.admin.port,
        );
        let listener = TcpListener::bind(admin_addr).await?;
        info!(addr = %admin_addr, "Admin endpoints listening");

        let sync_trigger = Arc::new(Notify::new());
        let admin_context = Arc::new(AdminContext {
            metrics: Arc::clone(&self.metrics),
            sync_trigger: Arc::clone(&sync_trigger),
        });
        let admin_task = tokio::spawn(admin::serve(
            listener,
            admin_context,
            shutdown_tx.subscribe(),
        ));

        if initial_sync {
            self.resync(&dispatcher).await;
        }

        // Stream reader feeding the bounded event channel
        let (event_tx, mut event_rx) = mpsc::channel(self.config.connector.event_buffer);
        let reader_task = {
            let nomad = Arc::clone(&self.nomad);
            let shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move {
                nomad.run_event_stream(event_tx, shutdown).await;
            })
        };

        tokio::spawn(shutdown_signal(shutdown_tx.clone()));

        // The event loop: single-threaded reconciliation, on-demand sync
        // requests handled between events
        let mut shutdown_rx = shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                event = event_rx.recv() => match event {
                    Some(event) => {
                        if let Err(e) = dispatcher.process(&event).await {
                            warn!(event = %event.event_type, error = %e, "Event handler failed");
                        }
                    }
                    None => break,
                },
                () = sync_trigger.notified() => {
                    info!("On-demand sync requested");
                    self.resync(&dispatcher).await;
                }
            }
        }

        info!("Dispatcher stopped, shutting down");
        let _ = shutdown_tx.send(());

        if let Err(e) = reader_task.await {
            warn!(error = %e, "Stream reader task failed");
        }
        match admin_task.await {
            Ok(Err(e)) => warn!(error = %e, "Admin server failed"),
            Err(e) => warn!(error = %e, "Admin server task failed"),
            Ok(Ok(())) => {}
        }

        drains.shutdown(DRAIN_SHUTDOWN_GRACE).await;

        Ok(())
    }

    /// Fetch the full service set and run a reconcile-and-sweep pass. An
    /// unreachable orchestrator is transient: logged, not fatal, the event
    /// stream keeps reconnecting on its own.
    async fn resync(&self, dispatcher: &Dispatcher) {
        match self.nomad.all_service_instances().await {
            Ok(instances) => {
                info!(instances = instances.len(), "Starting sync pass");
                sync::run(dispatcher, instances).await;
            }
            Err(e) => warn!(error = %e, "Could not list services for sync"),
        }
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
