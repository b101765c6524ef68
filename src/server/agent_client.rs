use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use crate::agent_protocol::{ActionResponse, AgentHealth, LaunchRequest, LiveContainer, SERVER_KEY_HEADER};
use crate::db::entities::host;
use crate::error::FleetError;

pub const LIST_TIMEOUT: Duration = Duration::from_secs(10);
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);
pub const RESTART_TIMEOUT: Duration = Duration::from_secs(30);
pub const DELETE_TIMEOUT: Duration = Duration::from_secs(30);
pub const LAUNCH_TIMEOUT: Duration = Duration::from_secs(120);

/// How to reach one host's agent.
#[derive(Debug, Clone)]
pub struct AgentEndpoint {
    pub base_url: String,
    pub server_key: String,
}

impl AgentEndpoint {
    pub fn for_host(host: &host::Model) -> Result<Self, FleetError> {
        let server_key = host
            .cred_ref
            .clone()
            .ok_or_else(|| FleetError::Internal(format!("host {} has no server key", host.id)))?;
        let port = u16::try_from(host.api_port)
            .map_err(|_| FleetError::Internal(format!("host {} has invalid api port {}", host.id, host.api_port)))?;
        // IPv6 literals need brackets in a URL authority.
        let authority = match host.ip.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, port).to_string(),
            Err(_) => format!("{}:{port}", host.ip),
        };
        Ok(Self {
            base_url: format!("http://{authority}"),
            server_key,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Removed,
    AlreadyGone,
}

/// Control-plane view of the per-host agent API.
#[async_trait]
pub trait AgentApi: Send + Sync {
    async fn list(&self, endpoint: &AgentEndpoint) -> Result<Vec<LiveContainer>, FleetError>;
    async fn launch(&self, endpoint: &AgentEndpoint, request: &LaunchRequest) -> Result<ActionResponse, FleetError>;
    /// `NotFound` when the agent has no such environment.
    async fn restart(&self, endpoint: &AgentEndpoint, name: &str) -> Result<ActionResponse, FleetError>;
    async fn delete(&self, endpoint: &AgentEndpoint, name: &str) -> Result<DeleteOutcome, FleetError>;
    async fn health(&self, endpoint: &AgentEndpoint) -> Result<AgentHealth, FleetError>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpAgentClient {
    http: Client,
}

impl HttpAgentClient {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    fn authed(&self, builder: RequestBuilder, endpoint: &AgentEndpoint, timeout: Duration) -> RequestBuilder {
        builder.header(SERVER_KEY_HEADER, &endpoint.server_key).timeout(timeout)
    }
}

async fn remote_failure(resp: Response, action: &str) -> FleetError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    warn!(action, %status, body = %body, "Agent call rejected.");
    FleetError::RemoteFailure(format!("agent {action} returned {status}: {body}"))
}

#[async_trait]
impl AgentApi for HttpAgentClient {
    async fn list(&self, endpoint: &AgentEndpoint) -> Result<Vec<LiveContainer>, FleetError> {
        let url = format!("{}/agent/containers", endpoint.base_url);
        let resp = self.authed(self.http.get(&url), endpoint, LIST_TIMEOUT).send().await?;
        if !resp.status().is_success() {
            return Err(remote_failure(resp, "list").await);
        }
        Ok(resp.json().await?)
    }

    async fn launch(&self, endpoint: &AgentEndpoint, request: &LaunchRequest) -> Result<ActionResponse, FleetError> {
        let url = format!("{}/agent/containers", endpoint.base_url);
        debug!(url = %url, name = %request.name, "Sending launch to agent.");
        let resp = self
            .authed(self.http.post(&url), endpoint, LAUNCH_TIMEOUT)
            .json(request)
            .send()
            .await?;
        if resp.status() != StatusCode::CREATED {
            return Err(remote_failure(resp, "launch").await);
        }
        Ok(resp.json().await?)
    }

    async fn restart(&self, endpoint: &AgentEndpoint, name: &str) -> Result<ActionResponse, FleetError> {
        let url = format!("{}/agent/containers/{name}/restart", endpoint.base_url);
        let resp = self.authed(self.http.post(&url), endpoint, RESTART_TIMEOUT).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(FleetError::not_found(format!("environment {name} on agent"))),
            s if s.is_success() => Ok(resp.json().await?),
            _ => Err(remote_failure(resp, "restart").await),
        }
    }

    async fn delete(&self, endpoint: &AgentEndpoint, name: &str) -> Result<DeleteOutcome, FleetError> {
        let url = format!("{}/agent/containers/{name}", endpoint.base_url);
        let resp = self.authed(self.http.delete(&url), endpoint, DELETE_TIMEOUT).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(DeleteOutcome::AlreadyGone),
            s if s.is_success() => Ok(DeleteOutcome::Removed),
            _ => Err(remote_failure(resp, "delete").await),
        }
    }

    async fn health(&self, endpoint: &AgentEndpoint) -> Result<AgentHealth, FleetError> {
        let url = format!("{}/agent/health", endpoint.base_url);
        let resp = self.authed(self.http.get(&url), endpoint, HEALTH_TIMEOUT).send().await?;
        if !resp.status().is_success() {
            return Err(remote_failure(resp, "health").await);
        }
        Ok(resp.json().await?)
    }
}
