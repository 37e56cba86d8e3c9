//! Durable job scheduler.
//!
//! Workers claim jobs from the shared SQLite queue and dispatch them.
//! Delivery is at-least-once: a claim is a lease, and a worker that dies
//! mid-job loses the lease so another worker picks the job up. Handlers
//! that record their own failures on the workspace return fatal errors,
//! which count as delivered; recoverable errors are re-queued with
//! exponential backoff until the attempt budget runs out.

use crate::error::{OrchestrationError, Result};
use crate::jobs::{self, JobContext};
use codebox_db::jobs as job_store;
use codebox_db::jobs::Job;
use serde::Serialize;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const MAX_ATTEMPTS: i64 = 5;

/// Insert a job onto the queue.
pub async fn enqueue(pool: &SqlitePool, kind: &str, payload: &impl Serialize) -> Result<i64> {
    let payload = serde_json::to_string(payload)
        .map_err(|e| OrchestrationError::fatal(format!("unencodable job payload: {e}")))?;

    Ok(job_store::enqueue(pool, kind, &payload).await?)
}

pub struct Scheduler {
    ctx: JobContext,
    concurrency: usize,
    poll_interval: Duration,
    /// A `running` row older than this is considered abandoned and
    /// re-delivered. Must comfortably exceed the longest handler.
    lease_secs: i64,
}

impl Scheduler {
    pub fn new(ctx: JobContext, config: &codebox_core::Config) -> Self {
        Self {
            concurrency: config.worker_concurrency,
            poll_interval: Duration::from_secs(config.job_poll_interval_secs),
            lease_secs: (config.runner_poll_timeout_secs * 2) as i64,
            ctx,
        }
    }

    /// Run `concurrency` worker loops forever.
    pub async fn run(self) {
        info!("starting {} job workers", self.concurrency);

        let mut workers = Vec::new();
        for worker_id in 0..self.concurrency {
            let ctx = self.ctx.clone();
            let poll_interval = self.poll_interval;
            let lease_secs = self.lease_secs;

            workers.push(tokio::spawn(async move {
                worker_loop(worker_id, ctx, poll_interval, lease_secs).await;
            }));
        }

        for worker in workers {
            let _ = worker.await;
        }
    }

    /// Dispatch one claimed job and settle its queue row.
    pub async fn process(ctx: &JobContext, job: &Job) -> Result<()> {
        debug!("processing job {} ({})", job.id, job.kind);

        match jobs::dispatch(ctx, &job.kind, &job.payload).await {
            Ok(()) => {
                job_store::mark_done(&ctx.pool, job.id, None).await?;
            }
            Err(e) if e.recoverable => {
                if job.attempts >= MAX_ATTEMPTS {
                    warn!("job {} ({}) failed for good: {e}", job.id, job.kind);
                    job_store::mark_failed(&ctx.pool, job.id, &e.to_string()).await?;
                } else {
                    let delay = backoff_secs(job.attempts);
                    debug!("job {} ({}) re-queued in {delay}s: {e}", job.id, job.kind);
                    job_store::requeue(&ctx.pool, job.id, delay, &e.to_string()).await?;
                }
            }
            // the handler already recorded the failure on the workspace
            Err(e) => {
                job_store::mark_done(&ctx.pool, job.id, Some(&e.to_string())).await?;
            }
        }

        Ok(())
    }
}

async fn worker_loop(worker_id: usize, ctx: JobContext, poll_interval: Duration, lease_secs: i64) {
    loop {
        match job_store::claim_next(&ctx.pool, lease_secs).await {
            Ok(Some(job)) => {
                if let Err(e) = Scheduler::process(&ctx, &job).await {
                    error!("worker {worker_id} could not settle job {}: {e}", job.id);
                    tokio::time::sleep(poll_interval).await;
                }
            }
            Ok(None) => tokio::time::sleep(poll_interval).await,
            Err(e) => {
                error!("worker {worker_id} failed to claim a job: {e}");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

/// Periodically enqueue the health job kinds, skipping any kind that
/// already has a queued or running instance.
pub async fn run_ticker(pool: SqlitePool, interval: Duration) {
    const PERIODIC_KINDS: [&str; 3] = [
        jobs::PING_RUNNERS,
        jobs::PING_AGENTS,
        jobs::SWEEP_AUTH_CODES,
    ];

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        for kind in PERIODIC_KINDS {
            match job_store::has_pending(&pool, kind).await {
                Ok(true) => {}
                Ok(false) => {
                    if let Err(e) = job_store::enqueue(&pool, kind, "{}").await {
                        warn!("failed to enqueue {kind}: {e}");
                    }
                }
                Err(e) => warn!("failed to check pending {kind} jobs: {e}"),
            }
        }
    }
}

fn backoff_secs(attempts: i64) -> i64 {
    // 2, 4, 8, ... capped at five minutes
    (1i64 << attempts.clamp(1, 9)).min(300)
}
