//! Runner records. The `tunnel_port` column is owned by the port broker;
//! `last_contact_at` and `version` are stamped only by health probes.

use crate::error::{DbError, Result};
use crate::now_ts;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    pub id: i64,
    pub name: String,
    pub token: String,
    pub use_public_url: bool,
    pub public_url: Option<String>,
    pub tunnel_port: Option<u16>,
    pub last_contact_at: Option<DateTime<Utc>>,
    pub version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct RunnerRow {
    id: i64,
    name: String,
    token: String,
    use_public_url: bool,
    public_url: Option<String>,
    tunnel_port: Option<i64>,
    last_contact_at: Option<i64>,
    version: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl From<RunnerRow> for Runner {
    fn from(row: RunnerRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            token: row.token,
            use_public_url: row.use_public_url,
            public_url: row.public_url,
            tunnel_port: row.tunnel_port.map(|p| p as u16),
            last_contact_at: row.last_contact_at.and_then(|ts| DateTime::from_timestamp(ts, 0)),
            version: row.version,
            created_at: DateTime::from_timestamp(row.created_at, 0).unwrap_or_default(),
            updated_at: DateTime::from_timestamp(row.updated_at, 0).unwrap_or_default(),
        }
    }
}

/// Create a runner. Token generation is the caller's concern (the admin
/// surface lives outside this crate).
pub async fn create(
    pool: &SqlitePool,
    name: &str,
    token: &str,
    public_url: Option<&str>,
) -> Result<Runner> {
    let now = now_ts();
    let id = sqlx::query(
        "INSERT INTO runners (name, token, use_public_url, public_url, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(name)
    .bind(token)
    .bind(public_url.is_some())
    .bind(public_url)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    get(pool, id).await
}

pub async fn get(pool: &SqlitePool, id: i64) -> Result<Runner> {
    let row = sqlx::query_as::<_, RunnerRow>("SELECT * FROM runners WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("runner {id}")))?;

    Ok(row.into())
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<Runner>> {
    let rows = sqlx::query_as::<_, RunnerRow>("SELECT * FROM runners ORDER BY id")
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

/// Ports currently held by any runner.
pub async fn ports_in_use(pool: &SqlitePool) -> Result<Vec<u16>> {
    let rows: Vec<(i64,)> =
        sqlx::query_as("SELECT tunnel_port FROM runners WHERE tunnel_port IS NOT NULL")
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().map(|(p,)| p as u16).collect())
}

/// Assign or release (`None`) a runner's tunnel port. A concurrent
/// assignment of the same port surfaces as a UNIQUE violation the broker
/// retries past.
pub async fn set_tunnel_port(pool: &SqlitePool, id: i64, port: Option<u16>) -> Result<()> {
    let result = sqlx::query("UPDATE runners SET tunnel_port = ?, updated_at = ? WHERE id = ?")
        .bind(port.map(|p| p as i64))
        .bind(now_ts())
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound(format!("runner {id}")));
    }

    Ok(())
}

/// Stamp a successful health probe.
pub async fn touch(pool: &SqlitePool, id: i64, version: &str) -> Result<()> {
    sqlx::query("UPDATE runners SET last_contact_at = ?, version = ?, updated_at = ? WHERE id = ?")
        .bind(now_ts())
        .bind(version)
        .bind(now_ts())
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_db;

    #[tokio::test]
    async fn create_and_fetch_runner() {
        let pool = create_test_db().await;
        let runner = create(&pool, "eu-1", "cbrt-secret", None).await.unwrap();

        assert_eq!(runner.name, "eu-1");
        assert!(!runner.use_public_url);
        assert_eq!(runner.tunnel_port, None);

        let fetched = get(&pool, runner.id).await.unwrap();
        assert_eq!(fetched.token, "cbrt-secret");
    }

    #[tokio::test]
    async fn tunnel_port_unique_across_runners() {
        let pool = create_test_db().await;
        let a = create(&pool, "a", "t-a", None).await.unwrap();
        let b = create(&pool, "b", "t-b", None).await.unwrap();

        set_tunnel_port(&pool, a.id, Some(20001)).await.unwrap();
        let err = set_tunnel_port(&pool, b.id, Some(20001)).await.unwrap_err();
        assert!(err.is_unique_violation());

        // releasing frees the port for anyone
        set_tunnel_port(&pool, a.id, None).await.unwrap();
        set_tunnel_port(&pool, b.id, Some(20001)).await.unwrap();
        assert_eq!(ports_in_use(&pool).await.unwrap(), vec![20001]);
    }
}
