//! Container and exposed-port inventory, mirrored from what the runner
//! reports at the end of a successful start.

use crate::error::{DbError, Result};
use crate::now_ts;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceContainer {
    pub id: i64,
    pub workspace_id: i64,
    pub runtime_id: String,
    pub name: String,
    pub image: String,
    /// Unix identity inside the container.
    pub user_id: i64,
    pub user_name: String,
    pub agent_last_contact_at: Option<DateTime<Utc>>,
    pub workspace_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceContainerPort {
    pub id: i64,
    pub container_id: i64,
    pub service_name: String,
    pub port_number: u16,
    pub public: bool,
}

/// Runner-reported container used when refreshing the inventory.
#[derive(Debug, Clone)]
pub struct NewContainer {
    pub runtime_id: String,
    pub name: String,
    pub image: String,
    pub user_id: i64,
    pub user_name: String,
    pub workspace_path: String,
    pub ports: Vec<NewPort>,
}

#[derive(Debug, Clone)]
pub struct NewPort {
    pub service_name: String,
    pub port_number: u16,
    pub public: bool,
}

#[derive(sqlx::FromRow)]
struct ContainerRow {
    id: i64,
    workspace_id: i64,
    runtime_id: String,
    name: String,
    image: String,
    user_id: i64,
    user_name: String,
    agent_last_contact_at: Option<i64>,
    workspace_path: String,
}

impl From<ContainerRow> for WorkspaceContainer {
    fn from(row: ContainerRow) -> Self {
        Self {
            id: row.id,
            workspace_id: row.workspace_id,
            runtime_id: row.runtime_id,
            name: row.name,
            image: row.image,
            user_id: row.user_id,
            user_name: row.user_name,
            agent_last_contact_at: row
                .agent_last_contact_at
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            workspace_path: row.workspace_path,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PortRow {
    id: i64,
    container_id: i64,
    service_name: String,
    port_number: i64,
    public: bool,
}

impl From<PortRow> for WorkspaceContainerPort {
    fn from(row: PortRow) -> Self {
        Self {
            id: row.id,
            container_id: row.container_id,
            service_name: row.service_name,
            port_number: row.port_number as u16,
            public: row.public,
        }
    }
}

/// Replace a workspace's container and port inventory with the rows the
/// runner just reported.
pub async fn replace_inventory(
    pool: &SqlitePool,
    workspace_id: i64,
    containers: &[NewContainer],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM workspace_container_ports WHERE container_id IN
            (SELECT id FROM workspace_containers WHERE workspace_id = ?)",
    )
    .bind(workspace_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM workspace_containers WHERE workspace_id = ?")
        .bind(workspace_id)
        .execute(&mut *tx)
        .await?;

    for container in containers {
        let container_id = sqlx::query(
            "INSERT INTO workspace_containers
                (workspace_id, runtime_id, name, image, user_id, user_name, workspace_path)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(workspace_id)
        .bind(&container.runtime_id)
        .bind(&container.name)
        .bind(&container.image)
        .bind(container.user_id)
        .bind(&container.user_name)
        .bind(&container.workspace_path)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for port in &container.ports {
            sqlx::query(
                "INSERT INTO workspace_container_ports
                    (container_id, service_name, port_number, public)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(container_id)
            .bind(&port.service_name)
            .bind(port.port_number as i64)
            .bind(port.public)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;

    Ok(())
}

pub async fn list_for_workspace(
    pool: &SqlitePool,
    workspace_id: i64,
) -> Result<Vec<WorkspaceContainer>> {
    let rows = sqlx::query_as::<_, ContainerRow>(
        "SELECT * FROM workspace_containers WHERE workspace_id = ? ORDER BY id",
    )
    .bind(workspace_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

/// Every container across all workspaces, for the agent health probe.
pub async fn list_all(pool: &SqlitePool) -> Result<Vec<WorkspaceContainer>> {
    let rows = sqlx::query_as::<_, ContainerRow>("SELECT * FROM workspace_containers ORDER BY id")
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

pub async fn get_by_name(
    pool: &SqlitePool,
    workspace_id: i64,
    name: &str,
) -> Result<Option<WorkspaceContainer>> {
    let row = sqlx::query_as::<_, ContainerRow>(
        "SELECT * FROM workspace_containers WHERE workspace_id = ? AND name = ?",
    )
    .bind(workspace_id)
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

pub async fn get_port(
    pool: &SqlitePool,
    container_id: i64,
    port_number: u16,
) -> Result<Option<WorkspaceContainerPort>> {
    let row = sqlx::query_as::<_, PortRow>(
        "SELECT * FROM workspace_container_ports WHERE container_id = ? AND port_number = ?",
    )
    .bind(container_id)
    .bind(port_number as i64)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

pub async fn delete_for_workspace(pool: &SqlitePool, workspace_id: i64) -> Result<()> {
    sqlx::query(
        "DELETE FROM workspace_container_ports WHERE container_id IN
            (SELECT id FROM workspace_containers WHERE workspace_id = ?)",
    )
    .bind(workspace_id)
    .execute(pool)
    .await?;

    sqlx::query("DELETE FROM workspace_containers WHERE workspace_id = ?")
        .bind(workspace_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Stamp a successful agent probe.
pub async fn touch_agent(pool: &SqlitePool, container_id: i64) -> Result<()> {
    let result =
        sqlx::query("UPDATE workspace_containers SET agent_last_contact_at = ? WHERE id = ?")
            .bind(now_ts())
            .bind(container_id)
            .execute(pool)
            .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound(format!("container {container_id}")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_db, insert_user, insert_workspace};

    fn web_container() -> NewContainer {
        NewContainer {
            runtime_id: "abc123".into(),
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
        }
    }

    #[tokio::test]
    async fn inventory_roundtrip() {
        let pool = create_test_db().await;
        let user = insert_user(&pool, "alice").await;
        let ws = insert_workspace(&pool, "dev", user.id).await;

        replace_inventory(&pool, ws.id, &[web_container()]).await.unwrap();

        let containers = list_for_workspace(&pool, ws.id).await.unwrap();
        assert_eq!(containers.len(), 1);

        let container = get_by_name(&pool, ws.id, "web").await.unwrap().unwrap();
        let port = get_port(&pool, container.id, 8080).await.unwrap().unwrap();
        assert!(!port.public);
        assert!(get_port(&pool, container.id, 1234).await.unwrap().is_none());

        // replacing drops the old rows
        replace_inventory(&pool, ws.id, &[]).await.unwrap();
        assert!(list_for_workspace(&pool, ws.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_clears_ports_too() {
        let pool = create_test_db().await;
        let user = insert_user(&pool, "alice").await;
        let ws = insert_workspace(&pool, "dev", user.id).await;

        replace_inventory(&pool, ws.id, &[web_container()]).await.unwrap();
        delete_for_workspace(&pool, ws.id).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM workspace_container_ports")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
