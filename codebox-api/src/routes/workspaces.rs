//! Session-authenticated workspace lifecycle API. Handlers only mutate
//! the row enough to enqueue a job; the orchestrator does the work.

use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use codebox_db::workspaces::{self, CreateWorkspace, Workspace};
use codebox_db::WorkspaceStatus;
use codebox_orchestrator::jobs::{self, WorkspacePayload};
use codebox_orchestrator::scheduler;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/workspaces",
            get(list_workspaces).post(create_workspace),
        )
        .route(
            "/api/v1/workspaces/{id}",
            get(get_workspace).delete(delete_workspace),
        )
        .route("/api/v1/workspaces/{id}/start", post(start_workspace))
        .route("/api/v1/workspaces/{id}/stop", post(stop_workspace))
        .route(
            "/api/v1/workspaces/{id}/update-config",
            post(update_workspace_config),
        )
        .route("/api/v1/workspaces/{id}/logs", get(workspace_logs))
}

async fn list_workspaces(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Json<Vec<Workspace>>> {
    let workspaces = workspaces::list_for_user(&state.pool, user.id).await?;

    Ok(Json(workspaces))
}

async fn create_workspace(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(mut req): Json<CreateWorkspace>,
) -> ApiResult<(StatusCode, Json<Workspace>)> {
    // the owner is whoever holds the session, not what the body claims
    req.user_id = user.id;

    let workspace = workspaces::create(&state.pool, &req).await?;
    scheduler::enqueue(
        &state.pool,
        jobs::START_WORKSPACE,
        &WorkspacePayload::new(workspace.id),
    )
    .await?;

    Ok((StatusCode::ACCEPTED, Json(workspace)))
}

async fn get_workspace(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Workspace>> {
    Ok(Json(owned_workspace(&state, user.id, id).await?))
}

async fn delete_workspace(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<(StatusCode, Json<Workspace>)> {
    owned_workspace(&state, user.id, id).await?;

    workspaces::set_status(&state.pool, id, WorkspaceStatus::Deleting).await?;
    scheduler::enqueue(
        &state.pool,
        jobs::DELETE_WORKSPACE,
        &WorkspacePayload::new(id),
    )
    .await?;

    let workspace = workspaces::get(&state.pool, id).await?;
    Ok((StatusCode::ACCEPTED, Json(workspace)))
}

async fn start_workspace(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<(StatusCode, Json<Workspace>)> {
    enqueue_lifecycle(&state, user.id, id, jobs::START_WORKSPACE).await
}

async fn stop_workspace(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<(StatusCode, Json<Workspace>)> {
    enqueue_lifecycle(&state, user.id, id, jobs::STOP_WORKSPACE).await
}

async fn update_workspace_config(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<(StatusCode, Json<Workspace>)> {
    enqueue_lifecycle(&state, user.id, id, jobs::UPDATE_WORKSPACE_CONFIG).await
}

async fn workspace_logs(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<String> {
    owned_workspace(&state, user.id, id).await?;

    Ok(state.logs.read(id).await?)
}

async fn enqueue_lifecycle(
    state: &AppState,
    user_id: i64,
    workspace_id: i64,
    kind: &str,
) -> ApiResult<(StatusCode, Json<Workspace>)> {
    owned_workspace(state, user_id, workspace_id).await?;

    scheduler::enqueue(&state.pool, kind, &WorkspacePayload::new(workspace_id)).await?;

    let workspace = workspaces::get(&state.pool, workspace_id).await?;
    Ok((StatusCode::ACCEPTED, Json(workspace)))
}

/// Missing and not-owned collapse into the same uniform error.
async fn owned_workspace(state: &AppState, user_id: i64, id: i64) -> Result<Workspace, ApiError> {
    workspaces::maybe_get(&state.pool, id)
        .await?
        .filter(|w| w.user_id == user_id)
        .ok_or(ApiError::NotFound)
}
