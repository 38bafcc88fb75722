//! Data Plane API client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{
    Acl, AdminState, Backend, BackendSwitchingRule, DataplaneApi, DataplaneInfo, Server,
};
use crate::config::HaproxyConfig;
use crate::{Error, Result};

/// Responses that wrap their payload in `{"_version": N, "data": ...}`
#[derive(Deserialize)]
struct VersionedData<T> {
    data: T,
}

/// Body of a created transaction
#[derive(Deserialize)]
struct TransactionBody {
    id: String,
}

/// HTTP client for the Data Plane API v2
pub struct DataplaneClient {
    client: Client,
    base: String,
    username: String,
    password: String,
}

impl DataplaneClient {
    /// Build a client from configuration. All configuration calls share the
    /// configured per-request timeout.
    pub fn new(config: &HaproxyConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base: config.address.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2{path}", self.base)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .basic_auth(&self.username, Some(&self.password))
    }

    /// Map a response status onto the bridge's error kinds. 409 is the
    /// optimistic-concurrency signal; 404 is surfaced as `NotFound` so
    /// deletes can treat it as non-fatal.
    async fn checked(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let path = response.url().path().to_string();
        let message = response.text().await.unwrap_or_default();

        Err(match status {
            StatusCode::CONFLICT => Error::VersionConflict,
            StatusCode::NOT_FOUND => Error::NotFound(path),
            _ => Error::Api {
                status: status.as_u16(),
                message,
            },
        })
    }
}

#[async_trait]
impl DataplaneApi for DataplaneClient {
    async fn info(&self) -> Result<DataplaneInfo> {
        let response = self.request(reqwest::Method::GET, "/info").send().await?;
        Ok(self.checked(response).await?.json().await?)
    }

    async fn configuration_version(&self) -> Result<i64> {
        let response = self
            .request(
                reqwest::Method::GET,
                "/services/haproxy/configuration/version",
            )
            .send()
            .await?;
        Ok(self.checked(response).await?.json().await?)
    }

    async fn backend(&self, name: &str) -> Result<Option<Backend>> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/services/haproxy/configuration/backends/{name}"),
            )
            .send()
            .await?;

        match self.checked(response).await {
            Ok(response) => {
                let body: VersionedData<Backend> = response.json().await?;
                Ok(Some(body.data))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_backend(&self, backend: &Backend, version: i64) -> Result<()> {
        debug!(backend = %backend.name, version, "Creating backend");
        let response = self
            .request(
                reqwest::Method::POST,
                "/services/haproxy/configuration/backends",
            )
            .query(&[("version", version)])
            .json(backend)
            .send()
            .await?;
        self.checked(response).await?;
        Ok(())
    }

    async fn replace_backend(&self, backend: &Backend, version: i64) -> Result<()> {
        debug!(backend = %backend.name, version, "Replacing backend");
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/services/haproxy/configuration/backends/{}", backend.name),
            )
            .query(&[("version", version)])
            .json(backend)
            .send()
            .await?;
        self.checked(response).await?;
        Ok(())
    }

    async fn servers(&self, backend: &str) -> Result<Vec<Server>> {
        let response = self
            .request(
                reqwest::Method::GET,
                "/services/haproxy/configuration/servers",
            )
            .query(&[("backend", backend)])
            .send()
            .await?;

        let body: VersionedData<Vec<Server>> = self.checked(response).await?.json().await?;
        Ok(body.data)
    }

    async fn create_server(&self, backend: &str, server: &Server, version: i64) -> Result<()> {
        debug!(backend, server = %server.name, version, "Creating server");
        let response = self
            .request(
                reqwest::Method::POST,
                "/services/haproxy/configuration/servers",
            )
            .query(&[("backend", backend)])
            .query(&[("version", version)])
            .json(server)
            .send()
            .await?;
        self.checked(response).await?;
        Ok(())
    }

    async fn delete_server(&self, backend: &str, server: &str, version: i64) -> Result<()> {
        debug!(backend, server, version, "Deleting server");
        let response = self
            .request(
                reqwest::Method::DELETE,
                &format!("/services/haproxy/configuration/servers/{server}"),
            )
            .query(&[("backend", backend)])
            .query(&[("version", version)])
            .send()
            .await?;
        self.checked(response).await?;
        Ok(())
    }

    async fn start_transaction(&self, version: i64) -> Result<String> {
        let response = self
            .request(reqwest::Method::POST, "/services/haproxy/transactions")
            .query(&[("version", version)])
            .send()
            .await?;

        let body: TransactionBody = self.checked(response).await?.json().await?;
        debug!(transaction = %body.id, version, "Transaction opened");
        Ok(body.id)
    }

    async fn commit_transaction(&self, id: &str) -> Result<()> {
        debug!(transaction = %id, "Committing transaction");
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/services/haproxy/transactions/{id}"),
            )
            .send()
            .await?;
        self.checked(response).await?;
        Ok(())
    }

    async fn abort_transaction(&self, id: &str) -> Result<()> {
        debug!(transaction = %id, "Aborting transaction");
        let response = self
            .request(
                reqwest::Method::DELETE,
                &format!("/services/haproxy/transactions/{id}"),
            )
            .send()
            .await?;
        self.checked(response).await?;
        Ok(())
    }

    async fn acls(&self, frontend: &str, transaction_id: &str) -> Result<Vec<Acl>> {
        let response = self
            .request(reqwest::Method::GET, "/services/haproxy/configuration/acls")
            .query(&[
                ("parent_type", "frontend"),
                ("parent_name", frontend),
                ("transaction_id", transaction_id),
            ])
            .send()
            .await?;

        let body: VersionedData<Vec<Acl>> = self.checked(response).await?.json().await?;
        Ok(body.data)
    }

    async fn replace_acls(
        &self,
        frontend: &str,
        acls: &[Acl],
        transaction_id: &str,
    ) -> Result<()> {
        let response = self
            .request(reqwest::Method::PUT, "/services/haproxy/configuration/acls")
            .query(&[
                ("parent_type", "frontend"),
                ("parent_name", frontend),
                ("transaction_id", transaction_id),
            ])
            .json(acls)
            .send()
            .await?;
        self.checked(response).await?;
        Ok(())
    }

    async fn switching_rules(
        &self,
        frontend: &str,
        transaction_id: &str,
    ) -> Result<Vec<BackendSwitchingRule>> {
        let response = self
            .request(
                reqwest::Method::GET,
                "/services/haproxy/configuration/backend_switching_rules",
            )
            .query(&[("frontend", frontend), ("transaction_id", transaction_id)])
            .send()
            .await?;

        let body: VersionedData<Vec<BackendSwitchingRule>> =
            self.checked(response).await?.json().await?;
        Ok(body.data)
    }

    async fn replace_switching_rules(
        &self,
        frontend: &str,
        rules: &[BackendSwitchingRule],
        transaction_id: &str,
    ) -> Result<()> {
        let response = self
            .request(
                reqwest::Method::PUT,
                "/services/haproxy/configuration/backend_switching_rules",
            )
            .query(&[("frontend", frontend), ("transaction_id", transaction_id)])
            .json(rules)
            .send()
            .await?;
        self.checked(response).await?;
        Ok(())
    }

    async fn set_server_admin_state(
        &self,
        backend: &str,
        server: &str,
        state: AdminState,
    ) -> Result<()> {
        debug!(backend, server, state = state.as_str(), "Setting admin state");
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/services/haproxy/runtime/servers/{server}"),
            )
            .query(&[("backend", backend)])
            .json(&serde_json::json!({ "admin_state": state.as_str() }))
            .send()
            .await?;
        self.checked(response).await?;
        Ok(())
    }
}
