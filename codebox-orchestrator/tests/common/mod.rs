//! Shared fixtures: an in-process fake runner and job context builders.

#![allow(dead_code)]

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use codebox_db::workspaces::{ConfigSource, CreateWorkspace, Workspace};
use codebox_db::WorkspaceLogStore;
use codebox_orchestrator::JobContext;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct FakeRunnerState {
    pub details_calls: AtomicU32,
    /// How many details polls report `pending_status` before settling.
    pub pending_polls: u32,
    pub pending_status: &'static str,
    pub final_status: &'static str,
    pub fail_details: bool,
    pub containers: Value,
}

impl Default for FakeRunnerState {
    fn default() -> Self {
        Self {
            details_calls: AtomicU32::new(0),
            pending_polls: 2,
            pending_status: "starting",
            final_status: "running",
            fail_details: false,
            containers: json!([{
                "id": "cafe1234",
                "name": "web",
                "image": "nginx:latest",
                "container_user": 1000,
                "container_user_name": "dev",
                "workspace_path": "/workspace",
                "exposed_ports": [
                    {"port_number": 8080, "service_name": "http", "public": false}
                ]
            }]),
        }
    }
}

pub struct FakeRunner {
    pub base_url: String,
    pub state: Arc<FakeRunnerState>,
}

pub async fn spawn_fake_runner(state: FakeRunnerState) -> FakeRunner {
    let state = Arc::new(state);

    let app = Router::new()
        .route("/api/v1/version/", get(version))
        .route("/api/v1/workspace/", post(accepted))
        .route("/api/v1/workspace/{id}/", get(details))
        .route("/api/v1/workspace/{id}/logs", get(logs))
        .route("/api/v1/workspace/{id}/stop", post(accepted))
        .route("/api/v1/workspace/{id}/remove", post(accepted))
        .route("/api/v1/agent-forward/", get(accepted))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeRunner {
        base_url: format!("http://{addr}"),
        state,
    }
}

async fn version() -> Json<Value> {
    Json(json!({"version": "1.2.3"}))
}

async fn accepted() -> Json<Value> {
    Json(json!({}))
}

async fn details(State(state): State<Arc<FakeRunnerState>>) -> impl IntoResponse {
    if state.fail_details {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({}))).into_response();
    }

    let calls = state.details_calls.fetch_add(1, Ordering::SeqCst) + 1;
    let status = if calls <= state.pending_polls {
        state.pending_status
    } else {
        state.final_status
    };

    Json(json!({"status": status, "containers": state.containers})).into_response()
}

async fn logs() -> Json<Value> {
    Json(json!({"logs": "pulling images\nthe services are up\n"}))
}

pub fn test_context(pool: SqlitePool, data_dir: &Path) -> JobContext {
    JobContext {
        pool,
        logs: WorkspaceLogStore::new(data_dir.join("logs")),
        data_dir: data_dir.to_path_buf(),
        runner_poll_interval: Duration::from_millis(10),
        runner_poll_timeout: Duration::from_secs(5),
        runner_http_timeout: Duration::from_secs(5),
    }
}

/// A published template version whose snapshot really exists on disk.
pub async fn insert_template_snapshot(
    pool: &SqlitePool,
    data_dir: &Path,
    template_id: i64,
    version: i64,
) -> i64 {
    let snapshot = data_dir.join(format!("template-{template_id}-v{version}.tar.gz"));
    std::fs::write(&snapshot, [0x1f, 0x8b, 0x08, 0x00]).unwrap();

    sqlx::query(
        "INSERT INTO template_versions
            (template_id, version, config_file_path, snapshot_path, published)
         VALUES (?, ?, 'docker-compose.yml', ?, 1)",
    )
    .bind(template_id)
    .bind(version)
    .bind(snapshot.to_str().unwrap())
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid()
}

pub async fn template_workspace(
    pool: &SqlitePool,
    user_id: i64,
    runner_id: i64,
    template_version_id: i64,
) -> Workspace {
    codebox_db::workspaces::create(
        pool,
        &CreateWorkspace {
            name: "dev".to_string(),
            user_id,
            runner_id: Some(runner_id),
            kind: "docker_compose".to_string(),
            config_source: ConfigSource::Template,
            repo_url: None,
            git_ref: None,
            config_file_path: None,
            template_version_id: Some(template_version_id),
            environment: vec!["FOO=bar".to_string()],
        },
    )
    .await
    .unwrap()
}
