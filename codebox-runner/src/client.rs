//! Typed HTTP client for one runner's control API.
//!
//! The client is a thin, synchronous-feeling call surface: every method
//! does exactly one request, carries the runner's shared-secret token,
//! and never retries. Retry policy belongs to callers.

use crate::endpoint::RunnerEndpoint;
use crate::error::{Result, RunnerError};
use axum::extract::Request;
use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use axum::response::Response;
use codebox_db::containers::WorkspaceContainer;
use codebox_db::runners::Runner;
use codebox_db::workspaces::Workspace;
use codebox_proxy::ForwardTimeouts;
use reqwest::multipart;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Shared-secret header carried on every runner API call.
pub const RUNNER_TOKEN_HEADER: &str = "x-codebox-runner-token";

const FORWARD_HOST_HEADER: &str = "x-codebox-forward-host";
const FORWARD_PORT_HEADER: &str = "x-codebox-forward-port";
const FORWARD_SCHEME_HEADER: &str = "x-codebox-forward-scheme";

/// SSH server port inside every workspace container.
const CONTAINER_SSH_PORT: u16 = 2222;

/// Agent terminal service port inside every workspace container.
const CONTAINER_TERMINAL_PORT: u16 = 2223;

/// Everything the runner needs to start a workspace.
#[derive(Debug, Clone)]
pub struct StartWorkspaceRequest {
    pub workspace_id: i64,
    /// Pre-materialized tar.gz configuration snapshot. Must exist on
    /// disk before the call; the client refuses to send without it.
    pub snapshot_path: PathBuf,
    pub config_file_name: String,
    pub kind: String,
    pub environment: Vec<String>,
    pub git_user_name: String,
    pub git_user_email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerWorkspaceDetails {
    pub status: String,
    #[serde(default)]
    pub containers: Vec<RunnerContainer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerContainer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub container_user: i64,
    #[serde(default)]
    pub container_user_name: String,
    #[serde(default)]
    pub workspace_path: String,
    #[serde(default)]
    pub exposed_ports: Vec<RunnerPort>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerPort {
    pub port_number: u16,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub public: bool,
}

#[derive(Deserialize)]
struct VersionResponse {
    version: String,
}

#[derive(Deserialize)]
struct LogsResponse {
    logs: String,
}

#[derive(Debug)]
pub struct RunnerClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl RunnerClient {
    /// Resolve the runner's base address and build a client. Fails with
    /// `NotConnected` before any I/O when the runner has no reachable
    /// endpoint.
    pub fn new(runner: &Runner, timeout: Duration) -> Result<Self> {
        let base_url = RunnerEndpoint::for_runner(runner).resolve()?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RunnerError::Unreachable(e.to_string()))?;

        Ok(Self {
            base_url,
            token: runner.token.clone(),
            http,
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn check(response: &reqwest::Response) -> Result<()> {
        if !response.status().is_success() {
            return Err(RunnerError::BadResponse(format!(
                "received status {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Health and compatibility probe.
    pub async fn get_version(&self) -> Result<String> {
        let response = self
            .http
            .get(self.url("/api/v1/version/"))
            .header(RUNNER_TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(|e| RunnerError::Unreachable(e.to_string()))?;

        Self::check(&response)?;

        let body: VersionResponse = response
            .json()
            .await
            .map_err(|e| RunnerError::BadResponse(e.to_string()))?;

        Ok(body.version)
    }

    /// Upload the configuration snapshot and fire the start transition.
    /// Completion is observed by polling [`Self::get_details`].
    pub async fn start_workspace(&self, req: &StartWorkspaceRequest) -> Result<()> {
        if !req.snapshot_path.exists() {
            return Err(RunnerError::ConfigMissing(req.snapshot_path.clone()));
        }

        let snapshot = tokio::fs::read(&req.snapshot_path).await?;

        let mut environment = req.environment.clone();
        environment.push(format!("CODEBOX_GIT_USER_NAME={}", req.git_user_name));
        environment.push(format!("CODEBOX_GIT_USER_EMAIL={}", req.git_user_email));

        let config_part = multipart::Part::bytes(snapshot)
            .file_name("config.tar.gz")
            .mime_str("application/gzip")
            .map_err(|e| RunnerError::BadResponse(e.to_string()))?;

        let form = multipart::Form::new()
            .text("guid", req.workspace_id.to_string())
            .part("config", config_part)
            .text("config_file_name", req.config_file_name.clone())
            .text("type", req.kind.clone())
            .text("environment", environment.join(";"))
            .text("git_user_name", req.git_user_name.clone())
            .text("git_user_email", req.git_user_email.clone());

        let response = self
            .http
            .post(self.url("/api/v1/workspace/"))
            .header(RUNNER_TOKEN_HEADER, &self.token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RunnerError::Unreachable(e.to_string()))?;

        Self::check(&response)
    }

    /// Current lifecycle status plus live container/port inventory.
    pub async fn get_details(&self, workspace: &Workspace) -> Result<RunnerWorkspaceDetails> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/workspace/{}/", workspace.id)))
            .query(&[("type", workspace.kind.as_str())])
            .header(RUNNER_TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(|e| RunnerError::Unreachable(e.to_string()))?;

        Self::check(&response)?;

        response
            .json()
            .await
            .map_err(|e| RunnerError::BadResponse(e.to_string()))
    }

    /// Cumulative log text; callers diff against the length they have
    /// already seen.
    pub async fn get_logs(&self, workspace: &Workspace) -> Result<String> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/workspace/{}/logs", workspace.id)))
            .header(RUNNER_TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(|e| RunnerError::Unreachable(e.to_string()))?;

        Self::check(&response)?;

        let body: LogsResponse = response
            .json()
            .await
            .map_err(|e| RunnerError::BadResponse(e.to_string()))?;

        Ok(body.logs)
    }

    pub async fn stop_workspace(&self, workspace: &Workspace) -> Result<()> {
        self.post_transition(workspace, "stop").await
    }

    pub async fn remove_workspace(&self, workspace: &Workspace) -> Result<()> {
        self.post_transition(workspace, "remove").await
    }

    /// Stop and remove are acknowledgment-only; completion is observed
    /// via `get_details` polling.
    async fn post_transition(&self, workspace: &Workspace, action: &str) -> Result<()> {
        let form = multipart::Form::new().text("type", workspace.kind.clone());

        let response = self
            .http
            .post(self.url(&format!("/api/v1/workspace/{}/{}", workspace.id, action)))
            .header(RUNNER_TOKEN_HEADER, &self.token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RunnerError::Unreachable(e.to_string()))?;

        Self::check(&response)
    }

    /// Liveness probe for a container's in-container agent. Best-effort:
    /// any failure is `false`, never an error.
    pub async fn ping_agent(&self, container: &WorkspaceContainer) -> bool {
        let url = match self.agent_forward_url(container.workspace_id, &container.runtime_id, "/") {
            Ok(url) => url,
            Err(_) => return false,
        };

        let result = self
            .http
            .get(url)
            .header(RUNNER_TOKEN_HEADER, &self.token)
            .header(FORWARD_SCHEME_HEADER, "ping")
            .header(FORWARD_HOST_HEADER, "127.0.0.1")
            .header(FORWARD_PORT_HEADER, CONTAINER_SSH_PORT)
            .send()
            .await;

        matches!(result, Ok(response) if response.status().is_success())
    }

    /// Proxy an HTTP request to a forwarded container port. No protocol
    /// handling here; the streaming is delegated wholesale.
    pub async fn forward_http(
        &self,
        workspace: &Workspace,
        container: &WorkspaceContainer,
        port_number: u16,
        path: &str,
        request: Request,
    ) -> codebox_proxy::Result<Response> {
        self.forward(workspace, container, port_number, "http", path, request)
            .await
    }

    /// SSH-over-HTTP tunnel to the container's SSH server.
    pub async fn forward_ssh(
        &self,
        workspace: &Workspace,
        container: &WorkspaceContainer,
        request: Request,
    ) -> codebox_proxy::Result<Response> {
        self.forward(
            workspace,
            container,
            CONTAINER_SSH_PORT,
            "tcp_over_websocket",
            "/",
            request,
        )
        .await
    }

    /// Upgrade-based terminal stream to the container's agent.
    pub async fn forward_terminal(
        &self,
        workspace: &Workspace,
        container: &WorkspaceContainer,
        request: Request,
    ) -> codebox_proxy::Result<Response> {
        self.forward(
            workspace,
            container,
            CONTAINER_TERMINAL_PORT,
            "tcp_over_websocket",
            "/",
            request,
        )
        .await
    }

    async fn forward(
        &self,
        workspace: &Workspace,
        container: &WorkspaceContainer,
        port_number: u16,
        scheme: &'static str,
        path: &str,
        request: Request,
    ) -> codebox_proxy::Result<Response> {
        let target = self
            .agent_forward_url(workspace.id, &container.runtime_id, path)
            .map_err(|e| codebox_proxy::ProxyError::BadTarget(e.to_string()))?;

        let mut extra = HeaderMap::new();
        extra.insert(
            HeaderName::from_static(RUNNER_TOKEN_HEADER),
            HeaderValue::from_str(&self.token)
                .map_err(|e| codebox_proxy::ProxyError::BadTarget(e.to_string()))?,
        );
        extra.insert(
            HeaderName::from_static(FORWARD_HOST_HEADER),
            HeaderValue::from_static("127.0.0.1"),
        );
        extra.insert(
            HeaderName::from_static(FORWARD_PORT_HEADER),
            HeaderValue::from(port_number),
        );
        extra.insert(
            HeaderName::from_static(FORWARD_SCHEME_HEADER),
            HeaderValue::from_static(scheme),
        );

        let timeouts = ForwardTimeouts {
            connect: self.timeout,
            response: self.timeout,
        };

        codebox_proxy::forward(target.as_str(), extra, timeouts, request).await
    }

    fn agent_forward_url(
        &self,
        workspace_id: i64,
        container_id: &str,
        path: &str,
    ) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.url("/api/v1/agent-forward/"))
            .map_err(|e| RunnerError::BadResponse(e.to_string()))?;

        url.query_pairs_mut()
            .append_pair("path", path)
            .append_pair("workspace_guid", &workspace_id.to_string())
            .append_pair("container_id", container_id);

        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_runner(port: Option<u16>) -> Runner {
        Runner {
            id: 1,
            name: "r".into(),
            token: "cbrt-test".into(),
            use_public_url: false,
            public_url: None,
            tunnel_port: port,
            last_contact_at: None,
            version: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn new_fails_fast_without_port() {
        let err = RunnerClient::new(&test_runner(None), Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, RunnerError::NotConnected));
    }

    #[test]
    fn agent_forward_url_escapes_path() {
        let client = RunnerClient::new(&test_runner(Some(20001)), Duration::from_secs(5)).unwrap();
        let url = client.agent_forward_url(7, "abc123", "/a b?x=1").unwrap();

        assert!(url.as_str().starts_with("http://127.0.0.1:20001/api/v1/agent-forward/?"));
        assert!(url.query().unwrap().contains("workspace_guid=7"));
        assert!(url.query().unwrap().contains("container_id=abc123"));
        assert!(!url.query().unwrap().contains(' '));
    }
}
