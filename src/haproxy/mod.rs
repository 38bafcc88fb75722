//! HAProxy Data Plane API surface
//!
//! Wire types for the configuration objects the bridge owns, plus the
//! [`DataplaneApi`] trait the reconcilers are written against. The production
//! implementation is [`DataplaneClient`]; tests substitute an in-memory
//! double that enforces the same version semantics.

mod client;

pub use client::DataplaneClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Balancing algorithm block on a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Balance {
    /// Algorithm name (`roundrobin`, `leastconn`, ...)
    pub algorithm: String,
}

impl Balance {
    /// The only algorithm the bridge creates or adopts
    pub const ROUND_ROBIN: &'static str = "roundrobin";

    /// Round-robin balance block
    #[must_use]
    pub fn round_robin() -> Self {
        Self {
            algorithm: Self::ROUND_ROBIN.to_string(),
        }
    }
}

/// Parameters of an `httpchk` health probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpCheckParams {
    /// Request URI
    pub uri: String,
    /// Request method
    pub method: String,
    /// Host header sent with the probe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// Per-backend defaults applied to every server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DefaultServer {
    /// `enabled` or `disabled`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
}

/// A backend pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Backend {
    /// Backend name
    pub name: String,
    /// Balancing algorithm
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<Balance>,
    /// Advanced check mode; `httpchk` for HTTP probes, empty for layer-4
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub adv_check: String,
    /// HTTP probe parameters, present iff `adv_check == "httpchk"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_check_params: Option<HttpCheckParams>,
    /// Defaults applied to the backend's servers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_server: Option<DefaultServer>,
}

impl Backend {
    /// Algorithm of the backend, empty if no balance block is present
    #[must_use]
    pub fn algorithm(&self) -> &str {
        self.balance.as_ref().map_or("", |b| b.algorithm.as_str())
    }
}

/// A server entry inside a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Server {
    /// Server name, derived deterministically from `(service, address, port)`
    pub name: String,
    /// Instance address
    pub address: String,
    /// Instance port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// `enabled` or `disabled`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
}

/// A frontend ACL line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    /// Position in the frontend's ACL list
    pub index: i64,
    /// ACL name referenced by switching rules
    pub acl_name: String,
    /// Match criterion, `hdr(host)` for the rules the bridge owns
    pub criterion: String,
    /// Match value; may carry a `-m beg ` / `-m reg ` prefix
    pub value: String,
}

/// A `use_backend` switching rule on a frontend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSwitchingRule {
    /// Position in the frontend's rule list
    pub index: i64,
    /// Condition keyword, always `if`
    pub cond: String,
    /// ACL name the rule tests
    pub cond_test: String,
    /// Target backend
    pub name: String,
}

/// Administrative state of a server in the runtime API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminState {
    /// Accepting traffic
    Ready,
    /// Finishing in-flight connections, no new ones
    Drain,
    /// Out of rotation
    Maint,
}

impl AdminState {
    /// Wire representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Drain => "drain",
            Self::Maint => "maint",
        }
    }
}

/// Response of the `info` probe
#[derive(Debug, Clone, Deserialize)]
pub struct DataplaneInfo {
    /// API build information
    #[serde(default)]
    pub api: Option<ApiInfo>,
}

/// API build information
#[derive(Debug, Clone, Deserialize)]
pub struct ApiInfo {
    /// Data Plane API version string
    #[serde(default)]
    pub version: Option<String>,
}

/// Versioned, partially transactional configuration API of the proxy.
///
/// Every mutating configuration call carries either the current configuration
/// version or a transaction id created at that version; the implementation
/// maps a stale version to [`crate::Error::VersionConflict`]. ACL and
/// switching-rule writes only exist in transactional form so the pair can be
/// committed atomically.
#[async_trait]
pub trait DataplaneApi: Send + Sync {
    /// Probe the API; used at startup to fail fast when the proxy is down
    async fn info(&self) -> Result<DataplaneInfo>;

    /// Current configuration generation number
    async fn configuration_version(&self) -> Result<i64>;

    /// Fetch a backend, `None` if absent
    async fn backend(&self, name: &str) -> Result<Option<Backend>>;

    /// Create a backend at `version`
    async fn create_backend(&self, backend: &Backend, version: i64) -> Result<()>;

    /// Replace a backend's configuration at `version`
    async fn replace_backend(&self, backend: &Backend, version: i64) -> Result<()>;

    /// List the servers of a backend
    async fn servers(&self, backend: &str) -> Result<Vec<Server>>;

    /// Add a server to a backend at `version`
    async fn create_server(&self, backend: &str, server: &Server, version: i64) -> Result<()>;

    /// Delete a server from a backend at `version`
    async fn delete_server(&self, backend: &str, server: &str, version: i64) -> Result<()>;

    /// Open a transaction bound to `version`, returning its id
    async fn start_transaction(&self, version: i64) -> Result<String>;

    /// Commit a transaction
    async fn commit_transaction(&self, id: &str) -> Result<()>;

    /// Abort a transaction, discarding its staged changes
    async fn abort_transaction(&self, id: &str) -> Result<()>;

    /// Read a frontend's ACL list inside a transaction
    async fn acls(&self, frontend: &str, transaction_id: &str) -> Result<Vec<Acl>>;

    /// Replace a frontend's full ACL list inside a transaction
    async fn replace_acls(&self, frontend: &str, acls: &[Acl], transaction_id: &str)
    -> Result<()>;

    /// Read a frontend's switching rules inside a transaction
    async fn switching_rules(
        &self,
        frontend: &str,
        transaction_id: &str,
    ) -> Result<Vec<BackendSwitchingRule>>;

    /// Replace a frontend's full switching-rule list inside a transaction
    async fn replace_switching_rules(
        &self,
        frontend: &str,
        rules: &[BackendSwitchingRule],
        transaction_id: &str,
    ) -> Result<()>;

    /// Transition a server's runtime administrative state. Not a
    /// configuration mutation; no version involved.
    async fn set_server_admin_state(
        &self,
        backend: &str,
        server: &str,
        state: AdminState,
    ) -> Result<()>;
}
