//! Nomad API surface
//!
//! Wire types for the event stream, service instances, and job specs, plus
//! the [`JobCheckSource`] seam the check resolver uses to pull job-level
//! health checks on demand.

mod client;

pub use client::NomadClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Topic of the events the bridge consumes
pub const TOPIC_SERVICE: &str = "Service";

/// Event types the dispatcher classifies
pub mod event_types {
    /// A service instance came up
    pub const SERVICE_REGISTRATION: &str = "ServiceRegistration";
    /// A service instance went away
    pub const SERVICE_DEREGISTRATION: &str = "ServiceDeregistration";
    /// Node-level event that can reference a service
    pub const NODE_EVENT: &str = "NodeEvent";
    /// Node left the cluster
    pub const NODE_DEREGISTRATION: &str = "NodeDeregistration";
    /// Allocation changed placement or state
    pub const ALLOCATION_UPDATED: &str = "AllocationUpdated";
}

/// One frame of the event stream: a batch of events sharing an index
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFrame {
    /// Raft index of the batch
    #[serde(rename = "Index", default)]
    pub index: u64,
    /// Events in the batch
    #[serde(rename = "Events", default)]
    pub events: Vec<Event>,
}

/// A single orchestrator event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event topic; only `Service` is relevant
    #[serde(rename = "Topic", default)]
    pub topic: String,
    /// Event type, e.g. `ServiceRegistration`
    #[serde(rename = "Type", default)]
    pub event_type: String,
    /// Subject key
    #[serde(rename = "Key", default)]
    pub key: String,
    /// Raft index of the event
    #[serde(rename = "Index", default)]
    pub index: u64,
    /// Event payload
    #[serde(rename = "Payload", default)]
    pub payload: Option<EventPayload>,
}

impl Event {
    /// The service instance carried by the event, if any
    #[must_use]
    pub fn service(&self) -> Option<&ServiceInstance> {
        self.payload.as_ref().and_then(|p| p.service.as_ref())
    }

    /// Synthesize a registration event, used by the initial sync to replay
    /// the current service set through the regular dispatch path
    #[must_use]
    pub fn synthetic_registration(service: ServiceInstance) -> Self {
        Self {
            topic: TOPIC_SERVICE.to_string(),
            event_type: event_types::SERVICE_REGISTRATION.to_string(),
            key: service.service_name.clone(),
            index: 0,
            payload: Some(EventPayload {
                service: Some(service),
            }),
        }
    }
}

/// Payload wrapper of a service event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPayload {
    /// The service instance the event refers to
    #[serde(rename = "Service", default)]
    pub service: Option<ServiceInstance>,
}

/// A service instance advertised by the orchestrator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Registration id
    #[serde(rename = "ID", default)]
    pub id: String,
    /// Service name
    #[serde(rename = "ServiceName", default)]
    pub service_name: String,
    /// Instance address
    #[serde(rename = "Address", default)]
    pub address: String,
    /// Instance port
    #[serde(rename = "Port", default)]
    pub port: u16,
    /// Owning job, empty for externally registered services
    #[serde(rename = "JobID", default)]
    pub job_id: String,
    /// Owning allocation
    #[serde(rename = "AllocID", default)]
    pub alloc_id: String,
    /// Namespace the service lives in
    #[serde(rename = "Namespace", default)]
    pub namespace: String,
    /// Operator tags, the `haproxy.*` surface
    #[serde(rename = "Tags", default)]
    pub tags: Vec<String>,
}

/// A job specification, reduced to the parts relevant for check lookup
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Job {
    /// Task groups of the job
    #[serde(rename = "TaskGroups", default)]
    pub task_groups: Vec<TaskGroup>,
}

impl Job {
    /// First check attached to the service named `service`, searching
    /// task-group services before task services
    #[must_use]
    pub fn find_service_check(&self, service: &str) -> Option<&JobCheck> {
        for group in &self.task_groups {
            for svc in &group.services {
                if svc.name == service {
                    if let Some(check) = svc.checks.first() {
                        return Some(check);
                    }
                }
            }
        }
        for group in &self.task_groups {
            for task in &group.tasks {
                for svc in &task.services {
                    if svc.name == service {
                        if let Some(check) = svc.checks.first() {
                            return Some(check);
                        }
                    }
                }
            }
        }
        None
    }
}

/// A task group inside a job
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskGroup {
    /// Group-level services
    #[serde(rename = "Services", default)]
    pub services: Vec<JobService>,
    /// Tasks of the group
    #[serde(rename = "Tasks", default)]
    pub tasks: Vec<Task>,
}

/// A task inside a task group
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Task {
    /// Task-level services
    #[serde(rename = "Services", default)]
    pub services: Vec<JobService>,
}

/// A service block inside a job spec
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobService {
    /// Service name
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Health checks of the service
    #[serde(rename = "Checks", default)]
    pub checks: Vec<JobCheck>,
}

/// A health check declared in a job spec
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobCheck {
    /// Check type: `http`, `https`, `tcp`, `grpc`, `script`, ...
    #[serde(rename = "Type", default)]
    pub check_type: String,
    /// HTTP path, empty for non-HTTP checks
    #[serde(rename = "Path", default)]
    pub path: String,
    /// HTTP method, empty means GET
    #[serde(rename = "Method", default)]
    pub method: String,
}

/// On-demand job-level check lookup
#[async_trait]
pub trait JobCheckSource: Send + Sync {
    /// First check attached to `service` in job `job_id`, `None` when the
    /// job declares no check for it
    async fn lookup_service_check(&self, job_id: &str, service: &str)
    -> Result<Option<JobCheck>>;
}
