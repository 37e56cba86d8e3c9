//! Shared fixtures for codebox-api tests.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use codebox_core::Config;
use codebox_db::containers::{NewContainer, NewPort};
use codebox_db::test_utils::{create_test_db, insert_session, insert_user, insert_workspace};
use codebox_db::users::User;
use codebox_db::workspaces::Workspace;
use sqlx::SqlitePool;
use std::path::Path;
use tower::ServiceExt;

pub const WILDCARD: &str = "wild.test";

pub fn test_config(data_dir: &Path) -> Config {
    Config {
        data_path: data_dir.to_path_buf(),
        external_url: "http://app.test".to_string(),
        wildcard_domain: Some(WILDCARD.to_string()),
        use_subdomains: true,
        ..Config::default()
    }
}

pub async fn create_test_app(pool: SqlitePool, config: Config) -> Router {
    codebox_api::create_app(pool, config)
        .await
        .expect("Failed to create test app")
}

/// App over a fresh in-memory database with a tempdir data path.
pub async fn app_with_db(data_dir: &Path) -> (Router, SqlitePool) {
    let pool = create_test_db().await;
    let app = create_test_app(pool.clone(), test_config(data_dir)).await;
    (app, pool)
}

/// A user with a live session token.
pub async fn user_with_session(pool: &SqlitePool, username: &str, token: &str) -> User {
    let user = insert_user(pool, username).await;
    insert_session(pool, user.id, token, 3600).await;
    user
}

/// A workspace with one container exposing a private port 8080 and a
/// public port 9090, for forwarding tests.
pub async fn seed_forward_target(pool: &SqlitePool, name: &str, user_id: i64) -> Workspace {
    let ws = insert_workspace(pool, name, user_id).await;

    codebox_db::containers::replace_inventory(
        pool,
        ws.id,
        &[NewContainer {
            runtime_id: "cafe1234".into(),
            name: "web".into(),
            image: "nginx:latest".into(),
            user_id: 1000,
            user_name: "dev".into(),
            workspace_path: "/workspace".into(),
            ports: vec![
                NewPort {
                    service_name: "http".into(),
                    port_number: 8080,
                    public: false,
                },
                NewPort {
                    service_name: "docs".into(),
                    port_number: 9090,
                    public: true,
                },
            ],
        }],
    )
    .await
    .unwrap();

    ws
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn get_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("cookie", cookie)
        .body(Body::empty())
        .unwrap()
}

pub fn get_with_host(uri: &str, host: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("host", host)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json<T: serde::de::DeserializeOwned>(response: Response<Body>) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");
    serde_json::from_slice(&bytes).expect("Failed to deserialize JSON")
}
