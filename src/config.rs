//! Configuration management

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Nomad client configuration
    pub nomad: NomadConfig,
    /// HAProxy Data Plane API configuration
    pub haproxy: HaproxyConfig,
    /// Reconciliation behavior
    pub connector: ConnectorConfig,
    /// Admin HTTP server configuration
    pub admin: AdminConfig,
}

/// Nomad client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NomadConfig {
    /// Nomad HTTP API address
    pub address: String,
    /// ACL token sent as `X-Nomad-Token`
    pub token: Option<String>,
    /// Region query parameter
    pub region: Option<String>,
    /// Namespace query parameter
    pub namespace: Option<String>,
}

impl Default for NomadConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:4646".to_string(),
            token: None,
            region: None,
            namespace: None,
        }
    }
}

/// HAProxy Data Plane API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HaproxyConfig {
    /// Data Plane API address
    pub address: String,
    /// HTTP Basic username
    pub username: String,
    /// HTTP Basic password
    pub password: String,
    /// Frontend that receives the host-header routing rules
    pub frontend: String,
    /// Per-request timeout for configuration calls
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HaproxyConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:5555".to_string(),
            username: "admin".to_string(),
            password: String::new(),
            frontend: "http_in".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Reconciliation behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// How long a draining server keeps accepting in-flight traffic before
    /// its entry is deleted
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,
    /// Capacity of the event channel between the stream reader and the
    /// dispatcher; a full channel blocks the reader
    pub event_buffer: usize,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(30),
            event_buffer: 100,
        }
    }
}

/// Admin HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8405,
        }
    }
}

impl Config {
    /// Load configuration from an optional YAML file merged with `HNB_*`
    /// environment variables (nested keys split on `__`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("HNB_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate addresses and required fields
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.nomad.address)
            .map_err(|e| Error::Config(format!("Invalid nomad.address: {e}")))?;
        Url::parse(&self.haproxy.address)
            .map_err(|e| Error::Config(format!("Invalid haproxy.address: {e}")))?;

        if self.haproxy.username.is_empty() {
            return Err(Error::Config("haproxy.username must be set".to_string()));
        }
        if self.haproxy.frontend.is_empty() {
            return Err(Error::Config("haproxy.frontend must be set".to_string()));
        }
        if self.connector.event_buffer == 0 {
            return Err(Error::Config(
                "connector.event_buffer must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
