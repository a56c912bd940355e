//! Manager HTTP Client (§4.6): the agent's only outbound dependency on
//! the control plane it reports to. Bearer-token auth, typed request
//! and response bodies, one `reqwest::Client` reused across calls.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::ManagerError;
use crate::model::{AgentIdentity, DiscoveredDevice, ProvisioningResult, ProvisioningTask, TaskStatus};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ManagerClient {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    id: &'a str,
    capabilities: &'a [crate::model::Capability],
    version: &'a str,
    platform: &'a str,
}

#[derive(Debug, Serialize)]
pub struct StatusUpdateRequest {
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ProvisioningResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
struct DiscoveryReportRequest<'a> {
    task_id: &'a str,
    devices: &'a [DiscoveredDevice],
}

#[derive(Debug, Deserialize)]
struct TasksResponse {
    #[serde(default)]
    tasks: Vec<ProvisioningTask>,
}

impl ManagerClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> crate::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ManagerError::Http)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.api_key)
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> crate::Result<reqwest::Response> {
        let response = self
            .authed(builder)
            .send()
            .await
            .map_err(|e| ManagerError::ManagerUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ManagerError::ManagerRejected(response.status().as_u16()).into());
        }
        Ok(response)
    }

    /// `POST /provisioner/agents/register`
    pub async fn register(&self, identity: &AgentIdentity) -> crate::Result<()> {
        let url = format!("{}/provisioner/agents/register", self.base_url);
        let body = RegisterRequest {
            id: &identity.id,
            capabilities: &identity.capabilities,
            version: &identity.version,
            platform: &identity.platform,
        };
        self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    /// `GET /provisioner/agents/{id}/tasks`
    pub async fn fetch_tasks(&self, agent_id: &str) -> crate::Result<Vec<ProvisioningTask>> {
        let url = format!("{}/provisioner/agents/{agent_id}/tasks", self.base_url);
        let response = self.send(self.client.get(url)).await?;
        let parsed: TasksResponse = response
            .json()
            .await
            .map_err(|e| ManagerError::ManagerUnavailable(e.to_string()))?;
        Ok(parsed.tasks)
    }

    /// `PUT /provisioner/tasks/{id}/status`
    pub async fn update_task_status(
        &self,
        task_id: &str,
        update: &StatusUpdateRequest,
    ) -> crate::Result<()> {
        let url = format!("{}/provisioner/tasks/{task_id}/status", self.base_url);
        self.send(self.client.put(url).json(update)).await?;
        Ok(())
    }

    /// `POST /provisioner/discovered-devices`
    pub async fn report_discovered_devices(
        &self,
        task_id: &str,
        devices: &[DiscoveredDevice],
    ) -> crate::Result<()> {
        if devices.is_empty() {
            return Ok(());
        }
        let url = format!("{}/provisioner/discovered-devices", self.base_url);
        let body = DiscoveryReportRequest { task_id, devices };
        self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    /// `GET /provisioner/health`. Treats any non-2xx or transport
    /// failure as "unhealthy" rather than propagating an error — this
    /// call exists for liveness probes, not control flow.
    pub async fn health(&self) -> bool {
        let url = format!("{}/provisioner/health", self.base_url);
        matches!(
            self.client.get(url).send().await,
            Ok(response) if response.status() == StatusCode::OK
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn register_sends_bearer_auth_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/provisioner/agents/register"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = ManagerClient::new(&server.uri(), "token-123", Duration::from_secs(1)).unwrap();
        let identity = AgentIdentity::new("test-host", 1234);
        client.register(&identity).await.unwrap();
    }

    #[tokio::test]
    async fn fetch_tasks_parses_task_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/provisioner/agents/agent-1/tasks"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"tasks":[{"id":"t-1","type":"provision_device","target_ssid":"HomeWiFi","config":{}}]}"#,
            ))
            .mount(&server)
            .await;

        let client = ManagerClient::new(&server.uri(), "", Duration::from_secs(1)).unwrap();
        let tasks = client.fetch_tasks("agent-1").await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "t-1");
    }

    #[tokio::test]
    async fn non_success_status_maps_to_manager_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/provisioner/tasks/t-1/status"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let client = ManagerClient::new(&server.uri(), "", Duration::from_secs(1)).unwrap();
        let update = StatusUpdateRequest {
            status: TaskStatus::Completed,
            result: None,
            error: None,
        };
        let err = client.update_task_status("t-1", &update).await.unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Manager(ManagerError::ManagerRejected(409))
        ));
    }

    #[tokio::test]
    async fn health_false_on_unreachable_server() {
        let client = ManagerClient::new("http://127.0.0.1:1", "", Duration::from_millis(100)).unwrap();
        assert!(!client.health().await);
    }
}
