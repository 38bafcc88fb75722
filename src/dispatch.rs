//! Event dispatcher
//!
//! The single consumer of the event channel. Classifies each event, routes
//! it to the registration or deregistration path, and accumulates the
//! process counters. Handler errors are logged and counted but never stop
//! the dispatcher; per-service ordering follows from the FIFO channel and
//! the dispatcher being single-threaded.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::haproxy::{AdminState, DataplaneApi};
use crate::metrics::Metrics;
use crate::nomad::{Event, JobCheckSource, ServiceInstance, TOPIC_SERVICE, event_types};
use crate::reconcile::drain::DrainScheduler;
use crate::reconcile::frontend::FrontendRule;
use crate::reconcile::intent::{self, BackendKind};
use crate::reconcile::{
    DeregistrationReport, Outcome, RegistrationReport, backend, frontend, naming, server,
};
use crate::Result;

/// What processing one event amounted to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventReport {
    /// Full reconcile path ran
    Registered(RegistrationReport),
    /// Deregistration path ran
    Deregistered(DeregistrationReport),
    /// Event did not apply to the bridge
    Skipped {
        /// Why
        reason: String,
    },
    /// Service is not opted in
    Ignored {
        /// Why
        reason: String,
    },
}

/// Routes events to the reconcilers
pub struct Dispatcher {
    api: Arc<dyn DataplaneApi>,
    jobs: Arc<dyn JobCheckSource>,
    drains: Arc<DrainScheduler>,
    frontend: String,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    /// Wire a dispatcher to its collaborators
    pub fn new(
        api: Arc<dyn DataplaneApi>,
        jobs: Arc<dyn JobCheckSource>,
        drains: Arc<DrainScheduler>,
        frontend: String,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            api,
            jobs,
            drains,
            frontend,
            metrics,
        }
    }

    /// The configuration API the dispatcher writes through
    #[must_use]
    pub fn api(&self) -> &dyn DataplaneApi {
        self.api.as_ref()
    }

    /// The frontend carrying the routing rules
    #[must_use]
    pub fn frontend(&self) -> &str {
        &self.frontend
    }

    /// Process one event, updating the counters. Errors are returned for
    /// logging; the caller moves on to the next event regardless.
    pub async fn process(&self, event: &Event) -> Result<EventReport> {
        self.metrics.record_event();

        let result = self.dispatch(event).await;
        match &result {
            Ok(report) => debug!(event = %event.event_type, ?report, "Event handled"),
            Err(_) => self.metrics.record_error(),
        }
        result
    }

    /// Classify and route an event
    pub async fn dispatch(&self, event: &Event) -> Result<EventReport> {
        if event.topic != TOPIC_SERVICE {
            return Ok(EventReport::Skipped {
                reason: format!("topic {} is not Service", event.topic),
            });
        }

        let Some(service) = event.service() else {
            return Ok(EventReport::Skipped {
                reason: "no service payload".to_string(),
            });
        };

        match event.event_type.as_str() {
            event_types::SERVICE_REGISTRATION => self.handle_registration(service).await,
            event_types::SERVICE_DEREGISTRATION
            | event_types::NODE_EVENT
            | event_types::NODE_DEREGISTRATION
            | event_types::ALLOCATION_UPDATED => self.handle_deregistration(service).await,
            _ => Ok(EventReport::Skipped {
                reason: "unknown event type".to_string(),
            }),
        }
    }

    /// Full reconcile path: intent, check, backend, server, rule
    pub async fn handle_registration(&self, service: &ServiceInstance) -> Result<EventReport> {
        let intent = intent::parse_tags(&service.tags);
        if !intent.enabled {
            return Ok(EventReport::Ignored {
                reason: "haproxy.enable not set".to_string(),
            });
        }

        let check = intent::resolve_check(&intent, service, self.jobs.as_ref()).await;
        let backend_name = naming::sanitize_backend(&service.service_name);

        let backend_outcome = match intent.backend_kind {
            BackendKind::Dynamic => {
                backend::ensure_backend(self.api.as_ref(), &backend_name, &check).await?
            }
            // Operator-managed pool: servers and rules only
            BackendKind::Custom => Outcome::Skipped {
                reason: "custom backend is operator-managed".to_string(),
            },
        };

        // A re-registration inside the drain window revives the entry
        // instead of racing its scheduled deletion
        let server_name =
            naming::server_name(&service.service_name, &service.address, service.port);
        if self.drains.cancel(&backend_name, &server_name) {
            if let Err(e) = self
                .api
                .set_server_admin_state(&backend_name, &server_name, AdminState::Ready)
                .await
            {
                warn!(
                    backend = %backend_name,
                    server = %server_name,
                    error = %e,
                    "Failed to take server out of drain"
                );
            }
        }

        let (server_name, server_outcome) = server::ensure_server(
            self.api.as_ref(),
            &backend_name,
            &service.service_name,
            &service.address,
            service.port,
            check.is_enabled(),
        )
        .await?;

        let rule_outcome = match &intent.domain {
            Some(domain) => Some(
                frontend::ensure_rule(
                    self.api.as_ref(),
                    &self.frontend,
                    &FrontendRule {
                        domain: domain.host.clone(),
                        match_type: domain.match_type,
                        backend: backend_name.clone(),
                    },
                )
                .await?,
            ),
            None => None,
        };

        Ok(EventReport::Registered(RegistrationReport {
            backend: backend_name,
            server: server_name,
            backend_outcome,
            server_outcome,
            rule_outcome,
        }))
    }

    /// Deregistration path. Names are derived from the payload alone, so a
    /// deregistration for a service the bridge never saw registered still
    /// resolves deterministically; rule removal happens only once the
    /// backend's server list is empty, never from the event's tags.
    async fn handle_deregistration(&self, service: &ServiceInstance) -> Result<EventReport> {
        let backend_name = naming::sanitize_backend(&service.service_name);
        let server_name =
            naming::server_name(&service.service_name, &service.address, service.port);

        let report = self.drains.deregister(&backend_name, &server_name).await?;
        Ok(EventReport::Deregistered(report))
    }

    /// The drain scheduler, for shutdown accounting
    #[must_use]
    pub fn drains(&self) -> &DrainScheduler {
        self.drains.as_ref()
    }
}
