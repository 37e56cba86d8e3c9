//! Runner-facing endpoints, authenticated by the runner's shared-secret
//! token rather than a user session.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use codebox_db::runners;
use codebox_runner::client::RUNNER_TOKEN_HEADER;
use serde_json::{json, Value};
use tracing::warn;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/runners/{id}/request-port", post(request_port))
        .route("/api/v1/runners/{id}/connect", get(connect))
}

async fn request_port(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    authorize_runner(&state, id, &headers).await?;

    let port = state.broker.acquire(id).await?;

    Ok(Json(json!({ "port": port })))
}

/// WebSocket upgrade that becomes the runner's tunnel control channel.
async fn connect(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = authorize_runner(&state, id, &headers).await?;

    Ok(ws.on_upgrade(move |socket| async move {
        if let Err(e) = state.broker.connect(id, &token, socket).await {
            warn!("tunnel session for runner {id} failed to start: {e}");
        }
    })
    .into_response())
}

/// Check the shared-secret header against the runner's stored token,
/// returning the token for downstream use.
async fn authorize_runner(
    state: &AppState,
    id: i64,
    headers: &HeaderMap,
) -> Result<String, ApiError> {
    let runner = runners::get(&state.pool, id).await?;

    let token = headers
        .get(RUNNER_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    if token != runner.token {
        return Err(ApiError::Unauthorized);
    }

    Ok(token.to_string())
}
