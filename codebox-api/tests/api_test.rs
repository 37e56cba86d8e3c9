//! Lifecycle API and runner endpoint tests.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use codebox_db::workspaces::Workspace;
use codebox_db::{jobs, runners, workspaces, WorkspaceLogStore, WorkspaceStatus};
use serde_json::{json, Value};

#[tokio::test]
async fn health_needs_no_session() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _pool) = common::app_with_db(dir.path()).await;

    let response = common::send(&app, common::get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = common::body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn workspaces_require_a_session() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _pool) = common::app_with_db(dir.path()).await;

    let response = common::send(&app, common::get("/api/v1/workspaces")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_workspace_enqueues_a_start_job() {
    let dir = tempfile::tempdir().unwrap();
    let (app, pool) = common::app_with_db(dir.path()).await;
    common::user_with_session(&pool, "alice", "tok-a").await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/workspaces")
        .header("content-type", "application/json")
        .header("cookie", "codebox_session=tok-a")
        .body(Body::from(
            json!({
                "name": "dev",
                "user_id": 999, // overridden by the session
                "kind": "docker_compose",
                "config_source": "git",
                "repo_url": "https://example.com/repo.git",
                "git_ref": "main",
                "config_file_path": "docker-compose.yml"
            })
            .to_string(),
        ))
        .unwrap();

    let response = common::send(&app, request).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let workspace: Workspace = common::body_json(response).await;
    assert_eq!(workspace.status, WorkspaceStatus::Creating);
    assert_ne!(workspace.user_id, 999);

    assert!(jobs::has_pending(&pool, "start_workspace").await.unwrap());
}

#[tokio::test]
async fn foreign_workspace_is_uniformly_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (app, pool) = common::app_with_db(dir.path()).await;
    let alice = common::user_with_session(&pool, "alice", "tok-a").await;
    common::user_with_session(&pool, "bob", "tok-b").await;

    let ws = common::seed_forward_target(&pool, "dev", alice.id).await;

    let response = common::send(
        &app,
        common::get_with_cookie(
            &format!("/api/v1/workspaces/{}", ws.id),
            "codebox_session=tok-b",
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = common::body_string(response).await;
    assert!(body.contains("not found or no permission"));
}

#[tokio::test]
async fn delete_marks_deleting_and_enqueues() {
    let dir = tempfile::tempdir().unwrap();
    let (app, pool) = common::app_with_db(dir.path()).await;
    let alice = common::user_with_session(&pool, "alice", "tok-a").await;
    let ws = common::seed_forward_target(&pool, "dev", alice.id).await;

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/v1/workspaces/{}", ws.id))
        .header("cookie", "codebox_session=tok-a")
        .body(Body::empty())
        .unwrap();

    let response = common::send(&app, request).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let ws = workspaces::get(&pool, ws.id).await.unwrap();
    assert_eq!(ws.status, WorkspaceStatus::Deleting);
    assert!(jobs::has_pending(&pool, "delete_workspace").await.unwrap());
}

#[tokio::test]
async fn logs_endpoint_returns_the_blob() {
    let dir = tempfile::tempdir().unwrap();
    let (app, pool) = common::app_with_db(dir.path()).await;
    let alice = common::user_with_session(&pool, "alice", "tok-a").await;
    let ws = common::seed_forward_target(&pool, "dev", alice.id).await;

    WorkspaceLogStore::new(dir.path().join("logs"))
        .append(ws.id, "the git repository has been cloned")
        .await
        .unwrap();

    let response = common::send(
        &app,
        common::get_with_cookie(
            &format!("/api/v1/workspaces/{}/logs", ws.id),
            "codebox_session=tok-a",
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = common::body_string(response).await;
    assert_eq!(body, "the git repository has been cloned\n");
}

#[tokio::test]
async fn request_port_requires_the_runner_token() {
    let dir = tempfile::tempdir().unwrap();
    let (app, pool) = common::app_with_db(dir.path()).await;
    let runner = runners::create(&pool, "eu-1", "cbrt-secret", None)
        .await
        .unwrap();

    let no_token = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/runners/{}/request-port", runner.id))
        .body(Body::empty())
        .unwrap();
    let response = common::send(&app, no_token).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let wrong_token = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/runners/{}/request-port", runner.id))
        .header("x-codebox-runner-token", "cbrt-wrong")
        .body(Body::empty())
        .unwrap();
    let response = common::send(&app, wrong_token).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn request_port_hands_out_distinct_ports() {
    let dir = tempfile::tempdir().unwrap();
    let (app, pool) = common::app_with_db(dir.path()).await;
    let runner = runners::create(&pool, "eu-1", "cbrt-secret", None)
        .await
        .unwrap();

    let mut ports = Vec::new();
    for _ in 0..2 {
        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/v1/runners/{}/request-port", runner.id))
            .header("x-codebox-runner-token", "cbrt-secret")
            .body(Body::empty())
            .unwrap();

        let response = common::send(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body: Value = common::body_json(response).await;
        ports.push(body["port"].as_u64().unwrap());
    }

    assert_ne!(ports[0], ports[1]);
}
