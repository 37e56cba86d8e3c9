//! Runner registry and tunnel port broker.
//!
//! The broker owns every live tunnel session and is the only writer of
//! the `tunnel_port` column. Port scans are serialized by an in-process
//! lock; the store-level UNIQUE index covers the cross-process case, a
//! conflicting assignment just moves the scan to the next candidate.

use crate::error::{Result, RunnerError};
use crate::tunnel;
use axum::extract::ws::WebSocket;
use codebox_db::runners;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct TunnelSession {
    port: u16,
    task: JoinHandle<()>,
}

#[derive(Clone)]
pub struct PortBroker {
    pool: SqlitePool,
    range: RangeInclusive<u16>,
    alloc_lock: Arc<Mutex<()>>,
    sessions: Arc<Mutex<HashMap<i64, TunnelSession>>>,
}

impl PortBroker {
    pub fn new(pool: SqlitePool, range: RangeInclusive<u16>) -> Self {
        Self {
            pool,
            range,
            alloc_lock: Arc::new(Mutex::new(())),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Assign a free local tunnel port to the runner and persist it.
    ///
    /// A candidate is eligible when no runner currently holds it and it
    /// differs from this runner's own previous port, forcing a fresh
    /// assignment on every request.
    pub async fn acquire(&self, runner_id: i64) -> Result<u16> {
        let runner = runners::get(&self.pool, runner_id).await?;

        let _guard = self.alloc_lock.lock().await;

        let in_use = runners::ports_in_use(&self.pool).await?;

        for port in self.range.clone() {
            if in_use.contains(&port) || runner.tunnel_port == Some(port) {
                continue;
            }

            match runners::set_tunnel_port(&self.pool, runner_id, Some(port)).await {
                Ok(()) => {
                    info!("assigned tunnel port {port} to runner {runner_id}");
                    return Ok(port);
                }
                // another process grabbed it between scan and update
                Err(e) if e.is_unique_violation() => continue,
                Err(e) => return Err(e.into()),
            }
        }

        warn!("tunnel port range exhausted while serving runner {runner_id}");
        Err(RunnerError::NoFreePorts)
    }

    /// Reset the runner's port to unassigned. Idempotent.
    pub async fn release(&self, runner_id: i64) -> Result<()> {
        runners::set_tunnel_port(&self.pool, runner_id, None).await?;
        Ok(())
    }

    /// Turn an inbound runner connection into a live tunnel session.
    ///
    /// Validates the shared-secret token, binds the runner's assigned
    /// loopback port, and pumps bytes between that listener and the
    /// multiplexed channel. A second connect for the same runner
    /// replaces the previous session rather than racing with it. When
    /// the session ends the port is released for reuse.
    pub async fn connect(&self, runner_id: i64, token: &str, ws: WebSocket) -> Result<()> {
        let runner = runners::get(&self.pool, runner_id).await?;

        if runner.token != token {
            return Err(RunnerError::InvalidToken);
        }

        let port = runner.tunnel_port.ok_or(RunnerError::NotConnected)?;
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;

        let pool = self.pool.clone();
        let sessions = self.sessions.clone();

        // the swap happens under the registry lock so the old session's
        // cleanup cannot interleave with the new insert
        let mut registry = self.sessions.lock().await;
        if let Some(previous) = registry.remove(&runner_id) {
            info!(
                "replacing tunnel session for runner {runner_id} (was port {})",
                previous.port
            );
            previous.task.abort();
        }

        let task = tokio::spawn(async move {
            info!("tunnel session for runner {runner_id} up on 127.0.0.1:{port}");
            tunnel::run_session(ws, listener).await;
            finish_session(&pool, &sessions, runner_id, port).await;
        });

        registry.insert(runner_id, TunnelSession { port, task });

        Ok(())
    }

    /// Whether the broker currently holds a live session for the runner.
    pub async fn is_connected(&self, runner_id: i64) -> bool {
        self.sessions.lock().await.contains_key(&runner_id)
    }
}

/// End-of-session cleanup: free the port and drop the registry entry,
/// but only while the entry still belongs to this session. A session
/// ending in the same instant a replacement connects must not release
/// the replacement's port.
async fn finish_session(
    pool: &SqlitePool,
    sessions: &Mutex<HashMap<i64, TunnelSession>>,
    runner_id: i64,
    port: u16,
) {
    let mut registry = sessions.lock().await;
    match registry.get(&runner_id) {
        Some(current) if current.port == port => {
            registry.remove(&runner_id);
        }
        _ => {
            info!("tunnel session for runner {runner_id} already superseded, leaving port alone");
            return;
        }
    }

    if let Err(e) = runners::set_tunnel_port(pool, runner_id, None).await {
        warn!("failed to release port {port} for runner {runner_id}: {e}");
    }
    info!("tunnel session for runner {runner_id} closed, port {port} released");
}

#[cfg(test)]
mod tests {
    use super::*;
    use codebox_db::test_utils::create_test_db;

    #[tokio::test]
    async fn sequential_acquires_return_distinct_ports() {
        let pool = create_test_db().await;
        let runner = runners::create(&pool, "r1", "t1", None).await.unwrap();
        let broker = PortBroker::new(pool, 21000..=21005);

        let first = broker.acquire(runner.id).await.unwrap();
        // the runner's own previous port is excluded from the next scan
        let second = broker.acquire(runner.id).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn concurrent_acquires_never_share_a_port() {
        let pool = create_test_db().await;
        let a = runners::create(&pool, "a", "ta", None).await.unwrap();
        let b = runners::create(&pool, "b", "tb", None).await.unwrap();
        let c = runners::create(&pool, "c", "tc", None).await.unwrap();
        let broker = PortBroker::new(pool, 22000..=22010);

        let (pa, pb, pc) = tokio::join!(
            broker.acquire(a.id),
            broker.acquire(b.id),
            broker.acquire(c.id)
        );
        let (pa, pb, pc) = (pa.unwrap(), pb.unwrap(), pc.unwrap());

        assert_ne!(pa, pb);
        assert_ne!(pb, pc);
        assert_ne!(pa, pc);
    }

    #[tokio::test]
    async fn released_port_is_eligible_for_any_runner() {
        let pool = create_test_db().await;
        let a = runners::create(&pool, "a", "ta", None).await.unwrap();
        let b = runners::create(&pool, "b", "tb", None).await.unwrap();
        // one-port range: only ever one holder
        let broker = PortBroker::new(pool, 23000..=23000);

        let port = broker.acquire(a.id).await.unwrap();
        assert!(matches!(
            broker.acquire(b.id).await,
            Err(RunnerError::NoFreePorts)
        ));

        broker.release(a.id).await.unwrap();
        assert_eq!(broker.acquire(b.id).await.unwrap(), port);
    }

    #[tokio::test]
    async fn exhausted_range_reports_no_free_ports() {
        let pool = create_test_db().await;
        let a = runners::create(&pool, "a", "ta", None).await.unwrap();
        let broker = PortBroker::new(pool, 24000..=24000);

        broker.acquire(a.id).await.unwrap();
        // the runner's own port is excluded, so the range is exhausted
        assert!(matches!(
            broker.acquire(a.id).await,
            Err(RunnerError::NoFreePorts)
        ));
    }

    #[tokio::test]
    async fn superseded_session_cleanup_leaves_the_replacement_alone() {
        let pool = create_test_db().await;
        let runner = runners::create(&pool, "r", "t", None).await.unwrap();
        runners::set_tunnel_port(&pool, runner.id, Some(26001))
            .await
            .unwrap();

        // registry as it looks after a reconnect claimed port 26001
        let sessions = Arc::new(Mutex::new(HashMap::new()));
        sessions.lock().await.insert(
            runner.id,
            TunnelSession {
                port: 26001,
                task: tokio::spawn(async {}),
            },
        );

        // the old session (port 26000) lost its slot and must not touch it
        finish_session(&pool, &sessions, runner.id, 26000).await;
        assert!(sessions.lock().await.contains_key(&runner.id));
        assert_eq!(
            runners::get(&pool, runner.id).await.unwrap().tunnel_port,
            Some(26001)
        );

        // the live session still cleans up after itself
        finish_session(&pool, &sessions, runner.id, 26001).await;
        assert!(!sessions.lock().await.contains_key(&runner.id));
        assert_eq!(
            runners::get(&pool, runner.id).await.unwrap().tunnel_port,
            None
        );
    }

    #[tokio::test]
    async fn acquire_unknown_runner_fails() {
        let pool = create_test_db().await;
        let broker = PortBroker::new(pool, 25000..=25010);

        assert!(broker.acquire(999).await.is_err());
    }
}
