//! Nomad HTTP client: event stream, job queries, service listing

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::{Event, EventFrame, Job, JobCheck, JobCheckSource, ServiceInstance, TOPIC_SERVICE};
use crate::config::NomadConfig;
use crate::{Error, Result};

/// Backoff between event-stream reconnect attempts
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Per-request timeout for non-streaming calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Entry of the `/v1/services` listing
#[derive(Deserialize)]
struct NamespaceServices {
    #[serde(rename = "Services", default)]
    services: Vec<ServiceStub>,
}

#[derive(Deserialize)]
struct ServiceStub {
    #[serde(rename = "ServiceName", default)]
    service_name: String,
}

/// HTTP client for the Nomad API
pub struct NomadClient {
    client: Client,
    base: String,
    token: Option<String>,
    region: Option<String>,
    namespace: Option<String>,
}

impl NomadClient {
    /// Build a client from configuration. The client carries no global
    /// timeout so the event stream can stay open indefinitely; regular
    /// requests set one per call.
    pub fn new(config: &NomadConfig) -> Result<Self> {
        let client = Client::builder()
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base: config.address.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            region: config.region.clone(),
            namespace: config.namespace.clone(),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let mut request = self.client.get(format!("{}/v1{path}", self.base));

        if let Some(ref token) = self.token {
            request = request.header("X-Nomad-Token", token.clone());
        }
        if let Some(ref region) = self.region {
            request = request.query(&[("region", region)]);
        }
        if let Some(ref namespace) = self.namespace {
            request = request.query(&[("namespace", namespace)]);
        }

        request
    }

    /// Consume the service event stream until shutdown, pushing events into
    /// `events`. Reconnects after stream EOF or error with a fixed backoff;
    /// a full channel blocks the reader (backpressure on the orchestrator
    /// connection, not on the dispatcher).
    pub async fn run_event_stream(
        &self,
        events: mpsc::Sender<Event>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Event stream reader stopping");
                    return;
                }
                result = self.stream_once(&events) => match result {
                    Ok(()) => info!("Event stream ended, reconnecting"),
                    Err(e) => warn!(error = %e, "Event stream failed, reconnecting"),
                }
            }

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Event stream reader stopping");
                    return;
                }
                () = tokio::time::sleep(RECONNECT_BACKOFF) => {}
            }
        }
    }

    /// One stream connection: long-lived GET yielding newline-delimited JSON
    /// frames. Empty `{}` heartbeats keep the connection alive and are
    /// skipped.
    async fn stream_once(&self, events: &mpsc::Sender<Event>) -> Result<()> {
        let response = self
            .get("/event/stream")
            .query(&[("topic", TOPIC_SERVICE)])
            .send()
            .await
            .map_err(|e| Error::Stream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Stream(format!("event stream returned {status}")));
        }

        info!("Event stream connected");

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Stream(e.to_string()))?;
            buffer.extend_from_slice(&chunk);

            while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();

                if line.is_empty() || line == "{}" {
                    continue;
                }

                match serde_json::from_str::<EventFrame>(line) {
                    Ok(frame) => {
                        debug!(index = frame.index, events = frame.events.len(), "Frame");
                        for event in frame.events {
                            if events.send(event).await.is_err() {
                                // Dispatcher is gone; nothing left to feed
                                return Ok(());
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "Skipping undecodable event frame"),
                }
            }
        }

        Ok(())
    }

    /// Fetch a job spec
    pub async fn job(&self, job_id: &str) -> Result<Job> {
        let response = self
            .get(&format!("/job/{job_id}"))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("job {job_id}")));
        }
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response.json().await?)
    }

    /// All instances of every currently registered service, used by the
    /// initial sync and the sweeper
    pub async fn all_service_instances(&self) -> Result<Vec<ServiceInstance>> {
        let response = self
            .get("/services")
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;

        let namespaces: Vec<NamespaceServices> = response.json().await?;

        let mut instances = Vec::new();
        for namespace in namespaces {
            for stub in namespace.services {
                instances.extend(self.service_instances(&stub.service_name).await?);
            }
        }

        Ok(instances)
    }

    /// Instances of one service
    pub async fn service_instances(&self, name: &str) -> Result<Vec<ServiceInstance>> {
        let response = self
            .get(&format!("/service/{name}"))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}

#[async_trait]
impl JobCheckSource for NomadClient {
    async fn lookup_service_check(
        &self,
        job_id: &str,
        service: &str,
    ) -> Result<Option<JobCheck>> {
        let job = self.job(job_id).await?;
        Ok(job.find_service_check(service).cloned())
    }
}
