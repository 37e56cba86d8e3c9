//! Port forwarding: browser HTTP traffic to exposed container ports,
//! plus SSH and terminal tunnels for the workspace owner.

use crate::auth::{self, CurrentUser};
use crate::error::ApiError;
use crate::state::AppState;
use crate::subdomain::SubdomainTarget;
use axum::extract::{Path, Request, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::any;
use axum::{Extension, Router};
use codebox_db::{containers, runners, users, workspaces};
use codebox_runner::{RunnerClient, RunnerError};
use std::time::Duration;

/// Browser-facing path-mode forwarding. Authentication happens inside
/// the handler; private ports redirect to login instead of failing.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/workspace/{id}/container/{name}/forward-http/{port}",
            any(forward_path_root),
        )
        .route(
            "/workspace/{id}/container/{name}/forward-http/{port}/",
            any(forward_path_root),
        )
        .route(
            "/workspace/{id}/container/{name}/forward-http/{port}/{*path}",
            any(forward_path),
        )
}

/// Owner-only tunnels, mounted behind the session middleware.
pub fn authed_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/workspaces/{id}/container/{name}/ssh",
            any(forward_ssh),
        )
        .route(
            "/api/v1/workspaces/{id}/container/{name}/terminal",
            any(forward_terminal),
        )
}

async fn forward_path(
    State(state): State<AppState>,
    Path((id, name, port, path)): Path<(i64, String, u16, String)>,
    request: Request,
) -> Response {
    let mut path = format!("/{path}");
    if let Some(query) = request.uri().query() {
        path = format!("{path}?{query}");
    }
    handle_forward(state, id, &name, port, &path, false, request).await
}

async fn forward_path_root(
    State(state): State<AppState>,
    Path((id, name, port)): Path<(i64, String, u16)>,
    request: Request,
) -> Response {
    handle_forward(state, id, &name, port, "/", false, request).await
}

/// Entry point for the subdomain router: the original path and query
/// become the forward path wholesale.
pub async fn handle_subdomain(state: AppState, target: SubdomainTarget, request: Request) -> Response {
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    handle_forward(
        state,
        target.workspace_id,
        &target.container_name,
        target.port_number,
        &path,
        true,
        request,
    )
    .await
}

async fn handle_forward(
    state: AppState,
    workspace_id: i64,
    container_name: &str,
    port_number: u16,
    path: &str,
    subdomain_mode: bool,
    request: Request,
) -> Response {
    match forward_inner(
        &state,
        workspace_id,
        container_name,
        port_number,
        path,
        subdomain_mode,
        request,
    )
    .await
    {
        Ok(response) => response,
        Err(e) => e.into_html_response(),
    }
}

async fn forward_inner(
    state: &AppState,
    workspace_id: i64,
    container_name: &str,
    port_number: u16,
    path: &str,
    subdomain_mode: bool,
    request: Request,
) -> Result<Response, ApiError> {
    let workspace = workspaces::maybe_get(&state.pool, workspace_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let container = containers::get_by_name(&state.pool, workspace.id, container_name)
        .await?
        .ok_or(ApiError::NotFound)?;
    let port = containers::get_port(&state.pool, container.id, port_number)
        .await?
        .ok_or(ApiError::NotFound)?;

    if !port.public {
        // on a forwarded origin the browser carries the handoff cookie,
        // never the main session cookie
        let cookie_name = if subdomain_mode {
            state.config.forward_cookie_name()
        } else {
            state.config.auth_cookie_name.clone()
        };

        let user = match auth::cookie_value(request.headers(), &cookie_name) {
            Some(token) => users::user_by_session_token(&state.pool, &token).await?,
            None => None,
        };

        match user {
            None => return login_redirect(state, subdomain_mode, &request),
            Some(user) if user.id != workspace.user_id => return Err(ApiError::NotFound),
            Some(_) => {}
        }
    }

    let client = client_for(state, workspace.runner_id).await?;

    client
        .forward_http(&workspace, &container, port_number, path, request)
        .await
        .map_err(map_proxy_error)
}

async fn forward_ssh(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path((id, name)): Path<(i64, String)>,
    request: Request,
) -> Result<Response, ApiError> {
    let (workspace, container) = owned_container(&state, user.id, id, &name).await?;
    let client = client_for(&state, workspace.runner_id).await?;

    client
        .forward_ssh(&workspace, &container, request)
        .await
        .map_err(map_proxy_error)
}

async fn forward_terminal(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path((id, name)): Path<(i64, String)>,
    request: Request,
) -> Result<Response, ApiError> {
    let (workspace, container) = owned_container(&state, user.id, id, &name).await?;
    let client = client_for(&state, workspace.runner_id).await?;

    client
        .forward_terminal(&workspace, &container, request)
        .await
        .map_err(map_proxy_error)
}

async fn owned_container(
    state: &AppState,
    user_id: i64,
    workspace_id: i64,
    container_name: &str,
) -> Result<
    (
        codebox_db::workspaces::Workspace,
        codebox_db::containers::WorkspaceContainer,
    ),
    ApiError,
> {
    let workspace = workspaces::maybe_get(&state.pool, workspace_id)
        .await?
        .filter(|w| w.user_id == user_id)
        .ok_or(ApiError::NotFound)?;
    let container = containers::get_by_name(&state.pool, workspace.id, container_name)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok((workspace, container))
}

async fn client_for(state: &AppState, runner_id: Option<i64>) -> Result<RunnerClient, ApiError> {
    let runner_id = runner_id.ok_or(ApiError::RunnerNotConnected)?;
    let runner = runners::get(&state.pool, runner_id).await?;

    RunnerClient::new(
        &runner,
        Duration::from_secs(state.config.runner_http_timeout_secs),
    )
    .map_err(|e| match e {
        RunnerError::NotConnected => ApiError::RunnerNotConnected,
        other => ApiError::Internal(other.to_string()),
    })
}

fn map_proxy_error(e: codebox_proxy::ProxyError) -> ApiError {
    match e {
        codebox_proxy::ProxyError::ConnectionClosed => {
            ApiError::BadGateway("the connection to the forwarded port was closed".to_string())
        }
        codebox_proxy::ProxyError::BadTarget(msg) => ApiError::Internal(msg),
    }
}

/// No session on a private port: send the browser to get one. Subdomain
/// origins bounce through the main origin's authorize endpoint so the
/// handoff can mint a cookie for this origin; path mode goes to login.
fn login_redirect(
    state: &AppState,
    subdomain_mode: bool,
    request: &Request,
) -> Result<Response, ApiError> {
    let host = request
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();
    let scheme = request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("http");
    let original = format!("{scheme}://{host}{}", request.uri());

    if subdomain_mode {
        let mut authorize = url::Url::parse(&state.config.external_url)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        authorize.set_path("/api/v1/auth/subdomains/authorize");
        authorize.query_pairs_mut().append_pair("next", &original);

        Ok(Redirect::temporary(authorize.as_str()).into_response())
    } else {
        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("next", &original)
            .finish();

        Ok(Redirect::temporary(&format!("/login?{query}")).into_response())
    }
}
