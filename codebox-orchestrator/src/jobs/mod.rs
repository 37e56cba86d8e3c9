//! Job kinds, payloads, and dispatch.

pub mod health;
pub mod workspace;

use crate::error::{OrchestrationError, Result};
use codebox_core::Config;
use codebox_db::WorkspaceLogStore;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::time::Duration;

pub const START_WORKSPACE: &str = "start_workspace";
pub const STOP_WORKSPACE: &str = "stop_workspace";
pub const DELETE_WORKSPACE: &str = "delete_workspace";
pub const UPDATE_WORKSPACE_CONFIG: &str = "update_workspace_config";
pub const PING_RUNNERS: &str = "ping_runners";
pub const PING_AGENTS: &str = "ping_agents";
pub const SWEEP_AUTH_CODES: &str = "sweep_auth_codes";

/// Payload for all per-workspace jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspacePayload {
    pub workspace_id: i64,
    /// Forced deletion: runner failures are logged and skipped instead of
    /// failing the workspace.
    #[serde(default)]
    pub skip_errors: bool,
}

impl WorkspacePayload {
    pub fn new(workspace_id: i64) -> Self {
        Self {
            workspace_id,
            skip_errors: false,
        }
    }
}

/// Everything a job handler needs. Cheap to clone, shared by all workers.
#[derive(Clone)]
pub struct JobContext {
    pub pool: SqlitePool,
    pub logs: WorkspaceLogStore,
    pub data_dir: PathBuf,
    pub runner_poll_interval: Duration,
    pub runner_poll_timeout: Duration,
    pub runner_http_timeout: Duration,
}

impl JobContext {
    pub fn new(pool: SqlitePool, config: &Config) -> Self {
        Self {
            pool,
            logs: WorkspaceLogStore::new(config.data_path.join("logs")),
            data_dir: config.data_path.clone(),
            runner_poll_interval: Duration::from_millis(config.runner_poll_interval_ms),
            runner_poll_timeout: Duration::from_secs(config.runner_poll_timeout_secs),
            runner_http_timeout: Duration::from_secs(config.runner_http_timeout_secs),
        }
    }
}

/// Route a claimed job to its handler. Unknown kinds and undecodable
/// payloads are fatal: retrying cannot fix them.
pub async fn dispatch(ctx: &JobContext, kind: &str, payload: &str) -> Result<()> {
    match kind {
        START_WORKSPACE => workspace::start(ctx, &parse(payload)?).await,
        STOP_WORKSPACE => workspace::stop(ctx, &parse(payload)?).await,
        DELETE_WORKSPACE => workspace::delete(ctx, &parse(payload)?).await,
        UPDATE_WORKSPACE_CONFIG => workspace::update_config(ctx, &parse(payload)?).await,
        PING_RUNNERS => health::ping_runners(ctx).await,
        PING_AGENTS => health::ping_agents(ctx).await,
        SWEEP_AUTH_CODES => health::sweep_auth_codes(ctx).await,
        other => Err(OrchestrationError::fatal(format!("unknown job kind: {other}"))),
    }
}

fn parse(payload: &str) -> Result<WorkspacePayload> {
    serde_json::from_str(payload)
        .map_err(|e| OrchestrationError::fatal(format!("undecodable job payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_defaults_skip_errors_off() {
        let payload: WorkspacePayload = serde_json::from_str(r#"{"workspace_id": 7}"#).unwrap();
        assert_eq!(payload.workspace_id, 7);
        assert!(!payload.skip_errors);
    }

    #[test]
    fn bad_payload_is_fatal() {
        let err = parse("not json").unwrap_err();
        assert!(!err.recoverable);
    }
}
