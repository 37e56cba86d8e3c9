//! Shared fixtures for tests across the workspace.

#![allow(clippy::unwrap_used)]

use crate::now_ts;
use crate::users::User;
use crate::workspaces::{ConfigSource, CreateWorkspace, Workspace};
use sqlx::SqlitePool;

/// In-memory database with migrations applied.
pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

pub async fn insert_user(pool: &SqlitePool, username: &str) -> User {
    let id = sqlx::query(
        "INSERT INTO users (username, first_name, last_name, email) VALUES (?, ?, ?, ?)",
    )
    .bind(username)
    .bind("Test")
    .bind("User")
    .bind(format!("{username}@example.com"))
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid();

    crate::users::get_user(pool, id).await.unwrap()
}

pub async fn insert_session(pool: &SqlitePool, user_id: i64, token: &str, ttl_secs: i64) {
    sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES (?, ?, ?)")
        .bind(token)
        .bind(user_id)
        .bind(now_ts() + ttl_secs)
        .execute(pool)
        .await
        .unwrap();
}

pub fn test_workspace(name: &str, user_id: i64) -> CreateWorkspace {
    CreateWorkspace {
        name: name.to_string(),
        user_id,
        runner_id: None,
        kind: "docker_compose".to_string(),
        config_source: ConfigSource::Git,
        repo_url: Some("https://example.com/repo.git".to_string()),
        git_ref: Some("main".to_string()),
        config_file_path: Some("docker-compose.yml".to_string()),
        template_version_id: None,
        environment: Vec::new(),
    }
}

pub async fn insert_workspace(pool: &SqlitePool, name: &str, user_id: i64) -> Workspace {
    crate::workspaces::create(pool, &test_workspace(name, user_id))
        .await
        .unwrap()
}

pub async fn insert_template_version(
    pool: &SqlitePool,
    template_id: i64,
    version: i64,
    published: bool,
) -> i64 {
    sqlx::query(
        "INSERT INTO template_versions
            (template_id, version, config_file_path, snapshot_path, published)
         VALUES (?, ?, 'docker-compose.yml', ?, ?)",
    )
    .bind(template_id)
    .bind(version)
    .bind(format!("/tmp/template-{template_id}-v{version}.tar.gz"))
    .bind(published)
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid()
}
