//! Test doubles: an in-memory Data Plane API that enforces the version and
//! transaction semantics of the real one, and canned job-check sources.

// Not every test file uses every helper.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use haproxy_nomad_bridge::dispatch::Dispatcher;
use haproxy_nomad_bridge::haproxy::{
    Acl, AdminState, ApiInfo, Backend, BackendSwitchingRule, DataplaneApi, DataplaneInfo, Server,
};
use haproxy_nomad_bridge::metrics::Metrics;
use haproxy_nomad_bridge::nomad::{Event, EventPayload, JobCheck, JobCheckSource, ServiceInstance};
use haproxy_nomad_bridge::reconcile::drain::DrainScheduler;
use haproxy_nomad_bridge::{Error, Result};

/// Frontend used by every test
pub const FRONTEND: &str = "http_in";

#[derive(Default)]
struct Transaction {
    version: i64,
    acls: Vec<Acl>,
    rules: Vec<BackendSwitchingRule>,
}

#[derive(Default)]
struct State {
    version: i64,
    backends: BTreeMap<String, Backend>,
    servers: BTreeMap<String, Vec<Server>>,
    acls: Vec<Acl>,
    rules: Vec<BackendSwitchingRule>,
    transactions: BTreeMap<String, Transaction>,
    next_transaction: u64,
    admin_states: BTreeMap<String, String>,
    fail_drain: bool,
    conflict_next_write: bool,
}

impl State {
    /// Every mutating call must carry the current version; a stale one is
    /// the optimistic-concurrency conflict, a fresh one bumps the counter.
    fn commit_write(&mut self, version: i64) -> Result<()> {
        if self.conflict_next_write {
            self.conflict_next_write = false;
            return Err(Error::VersionConflict);
        }
        if version != self.version {
            return Err(Error::VersionConflict);
        }
        self.version += 1;
        Ok(())
    }
}

/// In-memory Data Plane API double
#[derive(Default)]
pub struct FakeDataplane {
    state: Mutex<State>,
}

impl FakeDataplane {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed a backend as an operator or an older deployment would have
    /// left it
    pub fn seed_backend(&self, backend: Backend) {
        let mut state = self.state.lock();
        state.servers.entry(backend.name.clone()).or_default();
        state.backends.insert(backend.name.clone(), backend);
    }

    /// Seed a server entry under a backend
    pub fn seed_server(&self, backend: &str, server: Server) {
        self.state
            .lock()
            .servers
            .entry(backend.to_string())
            .or_default()
            .push(server);
    }

    /// Make the next runtime drain call fail
    pub fn fail_drain(&self, fail: bool) {
        self.state.lock().fail_drain = fail;
    }

    /// Make the next versioned write fail once with a version conflict
    pub fn conflict_next_write(&self) {
        self.state.lock().conflict_next_write = true;
    }

    pub fn version(&self) -> i64 {
        self.state.lock().version
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.state.lock().backends.keys().cloned().collect()
    }

    pub fn get_backend(&self, name: &str) -> Option<Backend> {
        self.state.lock().backends.get(name).cloned()
    }

    pub fn get_servers(&self, backend: &str) -> Vec<Server> {
        self.state
            .lock()
            .servers
            .get(backend)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_acls(&self) -> Vec<Acl> {
        self.state.lock().acls.clone()
    }

    pub fn get_rules(&self) -> Vec<BackendSwitchingRule> {
        self.state.lock().rules.clone()
    }

    pub fn admin_state(&self, backend: &str, server: &str) -> Option<String> {
        self.state
            .lock()
            .admin_states
            .get(&format!("{backend}/{server}"))
            .cloned()
    }
}

#[async_trait]
impl DataplaneApi for FakeDataplane {
    async fn info(&self) -> Result<DataplaneInfo> {
        Ok(DataplaneInfo {
            api: Some(ApiInfo {
                version: Some("test".to_string()),
            }),
        })
    }

    async fn configuration_version(&self) -> Result<i64> {
        Ok(self.state.lock().version)
    }

    async fn backend(&self, name: &str) -> Result<Option<Backend>> {
        Ok(self.state.lock().backends.get(name).cloned())
    }

    async fn create_backend(&self, backend: &Backend, version: i64) -> Result<()> {
        let mut state = self.state.lock();
        state.commit_write(version)?;
        state.servers.entry(backend.name.clone()).or_default();
        state.backends.insert(backend.name.clone(), backend.clone());
        Ok(())
    }

    async fn replace_backend(&self, backend: &Backend, version: i64) -> Result<()> {
        let mut state = self.state.lock();
        if !state.backends.contains_key(&backend.name) {
            return Err(Error::NotFound(format!("backend {}", backend.name)));
        }
        state.commit_write(version)?;
        state.backends.insert(backend.name.clone(), backend.clone());
        Ok(())
    }

    async fn servers(&self, backend: &str) -> Result<Vec<Server>> {
        Ok(self
            .state
            .lock()
            .servers
            .get(backend)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_server(&self, backend: &str, server: &Server, version: i64) -> Result<()> {
        let mut state = self.state.lock();
        state.commit_write(version)?;
        state
            .servers
            .entry(backend.to_string())
            .or_default()
            .push(server.clone());
        Ok(())
    }

    async fn delete_server(&self, backend: &str, server: &str, version: i64) -> Result<()> {
        let mut state = self.state.lock();

        let exists = state
            .servers
            .get(backend)
            .is_some_and(|list| list.iter().any(|s| s.name == server));
        if !exists {
            return Err(Error::NotFound(format!("server {backend}/{server}")));
        }

        state.commit_write(version)?;
        if let Some(list) = state.servers.get_mut(backend) {
            list.retain(|s| s.name != server);
        }
        state.admin_states.remove(&format!("{backend}/{server}"));
        Ok(())
    }

    async fn start_transaction(&self, version: i64) -> Result<String> {
        let mut state = self.state.lock();
        if version != state.version {
            return Err(Error::VersionConflict);
        }

        state.next_transaction += 1;
        let id = format!("txn-{}", state.next_transaction);
        let transaction = Transaction {
            version,
            acls: state.acls.clone(),
            rules: state.rules.clone(),
        };
        state.transactions.insert(id.clone(), transaction);
        Ok(id)
    }

    async fn commit_transaction(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let transaction = state
            .transactions
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("transaction {id}")))?;

        // A transaction created at a stale version cannot commit
        if transaction.version != state.version {
            return Err(Error::VersionConflict);
        }

        state.version += 1;
        state.acls = transaction.acls;
        state.rules = transaction.rules;
        Ok(())
    }

    async fn abort_transaction(&self, id: &str) -> Result<()> {
        self.state
            .lock()
            .transactions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("transaction {id}")))
    }

    async fn acls(&self, _frontend: &str, transaction_id: &str) -> Result<Vec<Acl>> {
        let state = self.state.lock();
        let transaction = state
            .transactions
            .get(transaction_id)
            .ok_or_else(|| Error::NotFound(format!("transaction {transaction_id}")))?;
        Ok(transaction.acls.clone())
    }

    async fn replace_acls(
        &self,
        _frontend: &str,
        acls: &[Acl],
        transaction_id: &str,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let transaction = state
            .transactions
            .get_mut(transaction_id)
            .ok_or_else(|| Error::NotFound(format!("transaction {transaction_id}")))?;
        transaction.acls = acls.to_vec();
        Ok(())
    }

    async fn switching_rules(
        &self,
        _frontend: &str,
        transaction_id: &str,
    ) -> Result<Vec<BackendSwitchingRule>> {
        let state = self.state.lock();
        let transaction = state
            .transactions
            .get(transaction_id)
            .ok_or_else(|| Error::NotFound(format!("transaction {transaction_id}")))?;
        Ok(transaction.rules.clone())
    }

    async fn replace_switching_rules(
        &self,
        _frontend: &str,
        rules: &[BackendSwitchingRule],
        transaction_id: &str,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let transaction = state
            .transactions
            .get_mut(transaction_id)
            .ok_or_else(|| Error::NotFound(format!("transaction {transaction_id}")))?;
        transaction.rules = rules.to_vec();
        Ok(())
    }

    async fn set_server_admin_state(
        &self,
        backend: &str,
        server: &str,
        state: AdminState,
    ) -> Result<()> {
        let mut inner = self.state.lock();
        if inner.fail_drain {
            return Err(Error::Api {
                status: 500,
                message: "runtime unavailable".to_string(),
            });
        }

        let exists = inner
            .servers
            .get(backend)
            .is_some_and(|list| list.iter().any(|s| s.name == server));
        if !exists {
            return Err(Error::NotFound(format!("runtime server {backend}/{server}")));
        }

        inner
            .admin_states
            .insert(format!("{backend}/{server}"), state.as_str().to_string());
        Ok(())
    }
}

/// Job-check source with canned answers keyed by `(job_id, service)`
#[derive(Default)]
pub struct StaticJobChecks {
    checks: BTreeMap<(String, String), JobCheck>,
}

impl StaticJobChecks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, job_id: &str, service: &str, check: JobCheck) -> Self {
        self.checks
            .insert((job_id.to_string(), service.to_string()), check);
        self
    }
}

#[async_trait]
impl JobCheckSource for StaticJobChecks {
    async fn lookup_service_check(
        &self,
        job_id: &str,
        service: &str,
    ) -> Result<Option<JobCheck>> {
        Ok(self
            .checks
            .get(&(job_id.to_string(), service.to_string()))
            .cloned())
    }
}

/// A fully wired dispatcher over the fake Data Plane
pub struct Harness {
    pub api: Arc<FakeDataplane>,
    pub dispatcher: Dispatcher,
    pub shutdown: broadcast::Sender<()>,
    pub metrics: Arc<Metrics>,
}

pub fn harness(drain_timeout: Duration, jobs: Arc<dyn JobCheckSource>) -> Harness {
    let api = FakeDataplane::new();
    let metrics = Arc::new(Metrics::new());
    let (shutdown, _) = broadcast::channel(1);

    let drains = Arc::new(DrainScheduler::new(
        api.clone(),
        FRONTEND.to_string(),
        drain_timeout,
        shutdown.clone(),
    ));
    let dispatcher = Dispatcher::new(
        api.clone(),
        jobs,
        drains,
        FRONTEND.to_string(),
        Arc::clone(&metrics),
    );

    Harness {
        api,
        dispatcher,
        shutdown,
        metrics,
    }
}

pub fn default_harness() -> Harness {
    harness(Duration::from_millis(50), Arc::new(StaticJobChecks::new()))
}

pub fn instance(service: &str, address: &str, port: u16, job_id: &str, tags: &[&str]) -> ServiceInstance {
    ServiceInstance {
        id: format!("_nomad-{service}-{address}-{port}"),
        service_name: service.to_string(),
        address: address.to_string(),
        port,
        job_id: job_id.to_string(),
        tags: tags.iter().map(ToString::to_string).collect(),
        ..ServiceInstance::default()
    }
}

pub fn event(event_type: &str, service: ServiceInstance) -> Event {
    Event {
        topic: "Service".to_string(),
        event_type: event_type.to_string(),
        key: service.service_name.clone(),
        index: 1,
        payload: Some(EventPayload {
            service: Some(service),
        }),
    }
}

/// Poll until `condition` holds, panicking after a bounded wait. Keeps the
/// drain-timer tests robust without long sleeps.
pub async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
