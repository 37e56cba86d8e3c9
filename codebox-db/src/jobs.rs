//! Durable job queue storage. The queue is at-least-once: a claim is a
//! lease, and rows left `running` past the lease are reclaimable, so a
//! crashed worker's job is re-delivered to another one.

use crate::error::Result;
use crate::now_ts;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: i64,
    pub kind: String,
    pub payload: String,
    pub status: JobStatus,
    pub attempts: i64,
    pub run_at: i64,
    pub claimed_at: Option<i64>,
    pub error: Option<String>,
    pub created_at: i64,
}

/// Insert a queued job due immediately.
pub async fn enqueue(pool: &SqlitePool, kind: &str, payload: &str) -> Result<i64> {
    let now = now_ts();

    let id = sqlx::query(
        "INSERT INTO jobs (kind, payload, status, run_at, created_at)
         VALUES (?, ?, 'queued', ?, ?)",
    )
    .bind(kind)
    .bind(payload)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok(id)
}

/// Claim the oldest due job in one statement. Picks up `queued` rows
/// whose `run_at` has passed, plus `running` rows whose lease expired.
pub async fn claim_next(pool: &SqlitePool, lease_secs: i64) -> Result<Option<Job>> {
    let now = now_ts();

    let job = sqlx::query_as::<_, Job>(
        "UPDATE jobs SET status = 'running', claimed_at = ?, attempts = attempts + 1
         WHERE id = (
             SELECT id FROM jobs
             WHERE (status = 'queued' AND run_at <= ?)
                OR (status = 'running' AND claimed_at <= ?)
             ORDER BY run_at, id
             LIMIT 1
         )
         RETURNING *",
    )
    .bind(now)
    .bind(now)
    .bind(now - lease_secs)
    .fetch_optional(pool)
    .await?;

    Ok(job)
}

pub async fn mark_done(pool: &SqlitePool, id: i64, error: Option<&str>) -> Result<()> {
    sqlx::query("UPDATE jobs SET status = 'done', error = ? WHERE id = ?")
        .bind(error)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn mark_failed(pool: &SqlitePool, id: i64, error: &str) -> Result<()> {
    sqlx::query("UPDATE jobs SET status = 'failed', error = ? WHERE id = ?")
        .bind(error)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Put a claimed job back on the queue with a delayed `run_at`.
pub async fn requeue(pool: &SqlitePool, id: i64, delay_secs: i64, error: &str) -> Result<()> {
    sqlx::query(
        "UPDATE jobs SET status = 'queued', claimed_at = NULL, run_at = ?, error = ? WHERE id = ?",
    )
    .bind(now_ts() + delay_secs)
    .bind(error)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Whether a queued or running instance of this kind already exists.
/// Keeps the periodic ticker from stacking up health probes.
pub async fn has_pending(pool: &SqlitePool, kind: &str) -> Result<bool> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM jobs WHERE kind = ? AND status IN ('queued', 'running')",
    )
    .bind(kind)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<Job>> {
    let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_db;

    #[tokio::test]
    async fn claim_is_exclusive_per_delivery() {
        let pool = create_test_db().await;
        enqueue(&pool, "start_workspace", r#"{"workspace_id":1}"#).await.unwrap();

        let job = claim_next(&pool, 60).await.unwrap().unwrap();
        assert_eq!(job.kind, "start_workspace");
        assert_eq!(job.attempts, 1);

        // still leased, nothing to claim
        assert!(claim_next(&pool, 60).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_lease_is_redelivered() {
        let pool = create_test_db().await;
        enqueue(&pool, "ping_runners", "{}").await.unwrap();

        let first = claim_next(&pool, 0).await.unwrap().unwrap();
        // lease of zero seconds expires immediately
        let second = claim_next(&pool, 0).await.unwrap().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.attempts, 2);
    }

    #[tokio::test]
    async fn requeue_delays_next_delivery() {
        let pool = create_test_db().await;
        let id = enqueue(&pool, "stop_workspace", "{}").await.unwrap();

        claim_next(&pool, 60).await.unwrap().unwrap();
        requeue(&pool, id, 3600, "runner busy").await.unwrap();

        // not due yet
        assert!(claim_next(&pool, 60).await.unwrap().is_none());

        let job = get(&pool, id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.error.as_deref(), Some("runner busy"));
    }

    #[tokio::test]
    async fn has_pending_sees_queued_and_running() {
        let pool = create_test_db().await;
        assert!(!has_pending(&pool, "ping_agents").await.unwrap());

        let id = enqueue(&pool, "ping_agents", "{}").await.unwrap();
        assert!(has_pending(&pool, "ping_agents").await.unwrap());

        claim_next(&pool, 60).await.unwrap().unwrap();
        assert!(has_pending(&pool, "ping_agents").await.unwrap());

        mark_done(&pool, id, None).await.unwrap();
        assert!(!has_pending(&pool, "ping_agents").await.unwrap());
    }
}
