//! Periodic health probes. Best-effort by design: a failed probe leaves
//! the row untouched and never fails the job.

use crate::error::Result;
use crate::jobs::JobContext;
use codebox_db::{auth_codes, containers, runners, workspaces};
use codebox_runner::RunnerClient;
use tracing::debug;

/// Probe every runner's version endpoint, stamping `last_contact_at` and
/// the reported version on success.
pub async fn ping_runners(ctx: &JobContext) -> Result<()> {
    for runner in runners::list(&ctx.pool).await? {
        let Ok(client) = RunnerClient::new(&runner, ctx.runner_http_timeout) else {
            continue;
        };

        match client.get_version().await {
            Ok(version) => {
                debug!("runner {} reports version {version}", runner.name);
                runners::touch(&ctx.pool, runner.id, &version).await.ok();
            }
            Err(e) => debug!("runner {} unreachable: {e}", runner.name),
        }
    }

    Ok(())
}

/// Probe the in-container agent of every known container, stamping
/// `agent_last_contact_at` on success.
pub async fn ping_agents(ctx: &JobContext) -> Result<()> {
    for container in containers::list_all(&ctx.pool).await? {
        let Some(workspace) = workspaces::maybe_get(&ctx.pool, container.workspace_id).await? else {
            continue;
        };
        let Some(runner_id) = workspace.runner_id else {
            continue;
        };
        let Ok(runner) = runners::get(&ctx.pool, runner_id).await else {
            continue;
        };
        let Ok(client) = RunnerClient::new(&runner, ctx.runner_http_timeout) else {
            continue;
        };

        if client.ping_agent(&container).await {
            containers::touch_agent(&ctx.pool, container.id).await.ok();
        }
    }

    Ok(())
}

/// Drop expired authorization codes left behind by abandoned handoffs.
pub async fn sweep_auth_codes(ctx: &JobContext) -> Result<()> {
    let removed = auth_codes::sweep_expired(&ctx.pool).await?;
    if removed > 0 {
        debug!("swept {removed} expired authorization codes");
    }

    Ok(())
}
