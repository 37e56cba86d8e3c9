//! Workspace records. After creation a workspace row is mutated only by
//! orchestration jobs; `set_status` is the single place the lifecycle
//! transition table is enforced.

use crate::error::{DbError, Result};
use crate::now_ts;
use crate::status::WorkspaceStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// Where the workspace's configuration comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Git,
    Template,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: i64,
    pub name: String,
    pub user_id: i64,
    pub runner_id: Option<i64>,
    pub status: WorkspaceStatus,
    /// Runner-side workspace type, e.g. `docker_compose`.
    pub kind: String,
    pub config_source: ConfigSource,
    pub repo_url: Option<String>,
    pub git_ref: Option<String>,
    pub config_file_path: Option<String>,
    pub template_version_id: Option<i64>,
    /// `NAME=value` entries handed to the runner at start.
    pub environment: Vec<String>,
    /// Materialized tar.gz configuration snapshot, if any.
    pub snapshot_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWorkspace {
    pub name: String,
    pub user_id: i64,
    pub runner_id: Option<i64>,
    pub kind: String,
    pub config_source: ConfigSource,
    pub repo_url: Option<String>,
    pub git_ref: Option<String>,
    pub config_file_path: Option<String>,
    pub template_version_id: Option<i64>,
    #[serde(default)]
    pub environment: Vec<String>,
}

#[derive(sqlx::FromRow)]
struct WorkspaceRow {
    id: i64,
    name: String,
    user_id: i64,
    runner_id: Option<i64>,
    status: WorkspaceStatus,
    kind: String,
    config_source: ConfigSource,
    repo_url: Option<String>,
    git_ref: Option<String>,
    config_file_path: Option<String>,
    template_version_id: Option<i64>,
    environment: String,
    snapshot_path: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl From<WorkspaceRow> for Workspace {
    fn from(row: WorkspaceRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            user_id: row.user_id,
            runner_id: row.runner_id,
            status: row.status,
            kind: row.kind,
            config_source: row.config_source,
            repo_url: row.repo_url,
            git_ref: row.git_ref,
            config_file_path: row.config_file_path,
            template_version_id: row.template_version_id,
            environment: serde_json::from_str(&row.environment).unwrap_or_default(),
            snapshot_path: row.snapshot_path,
            created_at: DateTime::from_timestamp(row.created_at, 0).unwrap_or_default(),
            updated_at: DateTime::from_timestamp(row.updated_at, 0).unwrap_or_default(),
        }
    }
}

pub async fn create(pool: &SqlitePool, req: &CreateWorkspace) -> Result<Workspace> {
    let now = now_ts();
    let environment = serde_json::to_string(&req.environment)?;

    let id = sqlx::query(
        "INSERT INTO workspaces
            (name, user_id, runner_id, status, kind, config_source, repo_url, git_ref,
             config_file_path, template_version_id, environment, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&req.name)
    .bind(req.user_id)
    .bind(req.runner_id)
    .bind(WorkspaceStatus::Creating)
    .bind(&req.kind)
    .bind(req.config_source)
    .bind(&req.repo_url)
    .bind(&req.git_ref)
    .bind(&req.config_file_path)
    .bind(req.template_version_id)
    .bind(environment)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    get(pool, id).await
}

pub async fn get(pool: &SqlitePool, id: i64) -> Result<Workspace> {
    maybe_get(pool, id)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("workspace {id}")))
}

/// Like [`get`] but missing rows are `None` instead of an error, for
/// callers that treat absence as a no-op (delete jobs, health probes).
pub async fn maybe_get(pool: &SqlitePool, id: i64) -> Result<Option<Workspace>> {
    let row = sqlx::query_as::<_, WorkspaceRow>("SELECT * FROM workspaces WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(Into::into))
}

pub async fn list_for_user(pool: &SqlitePool, user_id: i64) -> Result<Vec<Workspace>> {
    let rows = sqlx::query_as::<_, WorkspaceRow>(
        "SELECT * FROM workspaces WHERE user_id = ? ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

/// Apply a status transition, rejecting moves the lifecycle table does
/// not allow. Callers do not pre-validate.
pub async fn set_status(pool: &SqlitePool, id: i64, to: WorkspaceStatus) -> Result<()> {
    let current = get(pool, id).await?.status;

    if !current.can_transition(to) {
        return Err(DbError::InvalidTransition { from: current, to });
    }

    sqlx::query("UPDATE workspaces SET status = ?, updated_at = ? WHERE id = ?")
        .bind(to)
        .bind(now_ts())
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn set_snapshot(
    pool: &SqlitePool,
    id: i64,
    snapshot_path: Option<&str>,
    config_file_path: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE workspaces SET snapshot_path = ?, config_file_path = COALESCE(?, config_file_path), updated_at = ? WHERE id = ?",
    )
    .bind(snapshot_path)
    .bind(config_file_path)
    .bind(now_ts())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn set_template_version(pool: &SqlitePool, id: i64, template_version_id: i64) -> Result<()> {
    sqlx::query("UPDATE workspaces SET template_version_id = ?, updated_at = ? WHERE id = ?")
        .bind(template_version_id)
        .bind(now_ts())
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Hard-delete the row. Container and port rows go with it via cascade.
pub async fn delete(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM workspaces WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_db, insert_user, test_workspace};

    #[tokio::test]
    async fn create_starts_in_creating() {
        let pool = create_test_db().await;
        let user = insert_user(&pool, "alice").await;
        let ws = create(&pool, &test_workspace("dev", user.id)).await.unwrap();

        assert_eq!(ws.status, WorkspaceStatus::Creating);
        assert_eq!(ws.environment, Vec::<String>::new());
    }

    #[tokio::test]
    async fn set_status_rejects_illegal_transition() {
        let pool = create_test_db().await;
        let user = insert_user(&pool, "alice").await;
        let ws = create(&pool, &test_workspace("dev", user.id)).await.unwrap();

        // creating -> running skips starting
        let err = set_status(&pool, ws.id, WorkspaceStatus::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidTransition { .. }));

        set_status(&pool, ws.id, WorkspaceStatus::Starting).await.unwrap();
        set_status(&pool, ws.id, WorkspaceStatus::Running).await.unwrap();
        assert_eq!(get(&pool, ws.id).await.unwrap().status, WorkspaceStatus::Running);
    }
}
