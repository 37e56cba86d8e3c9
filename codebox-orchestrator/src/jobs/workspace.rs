//! Workspace lifecycle job handlers.
//!
//! Failure policy is fail-stop: once a handler has claimed the workspace
//! it records any failure on the workspace itself (log line + `Error`
//! status) and reports success to the queue. Only failures before that
//! point are surfaced as recoverable so the delivery is retried.

use crate::error::Result;
use crate::jobs::{JobContext, WorkspacePayload};
use crate::source;
use anyhow::{anyhow, bail, Context};
use codebox_db::containers::{self, NewContainer, NewPort};
use codebox_db::workspaces::{self, ConfigSource, Workspace};
use codebox_db::{runners, templates, users, WorkspaceStatus};
use codebox_runner::client::{RunnerWorkspaceDetails, StartWorkspaceRequest};
use codebox_runner::RunnerClient;
use std::path::{Path, PathBuf};
use tokio::time::Instant;
use tracing::{info, warn};

/// Start a workspace: materialize its configuration, hand it to the
/// runner, and poll until the runner reports a terminal status.
pub async fn start(ctx: &JobContext, payload: &WorkspacePayload) -> Result<()> {
    let workspace = load(ctx, payload.workspace_id).await?;
    ctx.logs.clear(workspace.id).await.ok();

    if let Err(e) = run_start(ctx, &workspace).await {
        fail_stop(ctx, workspace.id, &e).await;
    }
    Ok(())
}

/// Stop a workspace and drop its container inventory.
pub async fn stop(ctx: &JobContext, payload: &WorkspacePayload) -> Result<()> {
    let workspace = load(ctx, payload.workspace_id).await?;
    ctx.logs.clear(workspace.id).await.ok();

    if let Err(e) = run_stop(ctx, &workspace).await {
        fail_stop(ctx, workspace.id, &e).await;
    }
    Ok(())
}

/// Remove a workspace from its runner and hard-delete the row. A missing
/// row means a previous delivery already finished the job.
pub async fn delete(ctx: &JobContext, payload: &WorkspacePayload) -> Result<()> {
    let Some(workspace) = workspaces::maybe_get(&ctx.pool, payload.workspace_id).await? else {
        return Ok(());
    };

    if let Err(e) = run_delete(ctx, &workspace, payload.skip_errors).await {
        fail_stop(ctx, workspace.id, &e).await;
    }
    Ok(())
}

/// Re-materialize the workspace configuration and restart it in-line.
pub async fn update_config(ctx: &JobContext, payload: &WorkspacePayload) -> Result<()> {
    let workspace = load(ctx, payload.workspace_id).await?;
    ctx.logs.clear(workspace.id).await.ok();

    if let Err(e) = run_update_config(ctx, &workspace).await {
        fail_stop(ctx, workspace.id, &e).await;
    }
    Ok(())
}

async fn run_start(ctx: &JobContext, workspace: &Workspace) -> anyhow::Result<()> {
    workspaces::set_status(&ctx.pool, workspace.id, WorkspaceStatus::Starting).await?;

    let client = client_for(ctx, workspace).await?;
    let (snapshot_path, config_file_name) = ensure_snapshot(ctx, workspace).await?;

    let user = users::get_user(&ctx.pool, workspace.user_id).await?;

    client
        .start_workspace(&StartWorkspaceRequest {
            workspace_id: workspace.id,
            snapshot_path,
            config_file_name,
            kind: workspace.kind.clone(),
            environment: workspace.environment.clone(),
            git_user_name: user.git_user_name(),
            git_user_email: user.email.clone(),
        })
        .await?;

    let details = poll_until_settled(ctx, &client, workspace, WorkspaceStatus::Starting).await?;

    containers::replace_inventory(&ctx.pool, workspace.id, &to_inventory(&details)).await?;

    for container in containers::list_for_workspace(&ctx.pool, workspace.id).await? {
        if client.ping_agent(&container).await {
            containers::touch_agent(&ctx.pool, container.id).await.ok();
        }
    }

    let status = parse_status(&details.status)?;
    workspaces::set_status(&ctx.pool, workspace.id, status).await?;
    info!("workspace {} settled as {status}", workspace.id);

    Ok(())
}

async fn run_stop(ctx: &JobContext, workspace: &Workspace) -> anyhow::Result<()> {
    workspaces::set_status(&ctx.pool, workspace.id, WorkspaceStatus::Stopping).await?;

    let client = client_for(ctx, workspace).await?;
    client.stop_workspace(workspace).await?;

    let details = poll_until_settled(ctx, &client, workspace, WorkspaceStatus::Stopping).await?;

    let status = parse_status(&details.status)?;
    workspaces::set_status(&ctx.pool, workspace.id, status).await?;
    containers::delete_for_workspace(&ctx.pool, workspace.id).await?;
    info!("workspace {} stopped", workspace.id);

    Ok(())
}

async fn run_delete(ctx: &JobContext, workspace: &Workspace, skip_errors: bool) -> anyhow::Result<()> {
    workspaces::set_status(&ctx.pool, workspace.id, WorkspaceStatus::Deleting).await?;

    if workspace.runner_id.is_some() {
        match remove_from_runner(ctx, workspace).await {
            Ok(()) => {}
            Err(e) if skip_errors => {
                warn!("forced deletion of workspace {} skipping: {e:#}", workspace.id);
                ctx.logs.append(workspace.id, &e.to_string()).await.ok();
            }
            Err(e) => return Err(e),
        }
    }

    containers::delete_for_workspace(&ctx.pool, workspace.id).await?;

    if workspace.config_source == ConfigSource::Git {
        if let Some(snapshot) = &workspace.snapshot_path {
            source::remove_snapshot(Path::new(snapshot)).await?;
        }
    }

    ctx.logs.clear(workspace.id).await?;
    workspaces::delete(&ctx.pool, workspace.id).await?;
    info!("workspace {} deleted", workspace.id);

    Ok(())
}

async fn run_update_config(ctx: &JobContext, workspace: &Workspace) -> anyhow::Result<()> {
    match workspace.config_source {
        ConfigSource::Git => {
            if let Some(snapshot) = &workspace.snapshot_path {
                source::remove_snapshot(Path::new(snapshot)).await?;
            }
            workspaces::set_snapshot(&ctx.pool, workspace.id, None, None).await?;
        }
        ConfigSource::Template => {
            let version_id = workspace
                .template_version_id
                .ok_or_else(|| anyhow!("workspace has no template version"))?;
            let current = templates::get(&ctx.pool, version_id).await?;
            let latest = templates::latest_published(&ctx.pool, current.template_id)
                .await?
                .ok_or_else(|| anyhow!("template has no published version"))?;
            workspaces::set_template_version(&ctx.pool, workspace.id, latest.id).await?;
        }
    }

    ctx.logs
        .append(workspace.id, "config files have been updated")
        .await?;

    // chained restart with the refreshed configuration
    let workspace = workspaces::get(&ctx.pool, workspace.id).await?;
    run_start(ctx, &workspace).await
}

/// Runner removal with a poll that tolerates the workspace disappearing
/// mid-flight; a failing poll after `remove` means it is already gone.
async fn remove_from_runner(ctx: &JobContext, workspace: &Workspace) -> anyhow::Result<()> {
    let client = client_for(ctx, workspace).await?;
    client.remove_workspace(workspace).await?;

    let deadline = Instant::now() + ctx.runner_poll_timeout;
    loop {
        tokio::time::sleep(ctx.runner_poll_interval).await;

        let Ok(details) = client.get_details(workspace).await else {
            break;
        };
        if details.status != WorkspaceStatus::Deleting.as_str() {
            break;
        }
        if Instant::now() >= deadline {
            break;
        }
    }

    Ok(())
}

/// Poll the runner while it still reports `waiting`, mirroring the new
/// suffix of its log output into the workspace log each tick.
async fn poll_until_settled(
    ctx: &JobContext,
    client: &RunnerClient,
    workspace: &Workspace,
    waiting: WorkspaceStatus,
) -> anyhow::Result<RunnerWorkspaceDetails> {
    let deadline = Instant::now() + ctx.runner_poll_timeout;
    let mut seen = 0usize;

    loop {
        tokio::time::sleep(ctx.runner_poll_interval).await;

        let details = match client.get_details(workspace).await {
            Ok(details) => details,
            Err(e) => bail!("failed to fetch workspace details, {e}"),
        };

        if let Ok(text) = client.get_logs(workspace).await {
            if text.len() > seen {
                ctx.logs.append(workspace.id, &text[seen..]).await.ok();
                seen = text.len();
            }
        }

        if details.status != waiting.as_str() {
            return Ok(details);
        }

        if Instant::now() >= deadline {
            bail!(
                "timed out waiting for workspace {} to leave the {waiting} state",
                workspace.id
            );
        }
    }
}

/// Produce the configuration snapshot, returning its path and the name
/// of the configuration file inside it.
async fn ensure_snapshot(
    ctx: &JobContext,
    workspace: &Workspace,
) -> anyhow::Result<(PathBuf, String)> {
    match workspace.config_source {
        ConfigSource::Git => {
            let config_file_name = workspace
                .config_file_path
                .clone()
                .ok_or_else(|| anyhow!("workspace has no configuration file path"))?;

            if let Some(existing) = &workspace.snapshot_path {
                let path = PathBuf::from(existing);
                if path.exists() {
                    return Ok((path, config_file_name));
                }
            }

            let repo_url = workspace
                .repo_url
                .as_deref()
                .ok_or_else(|| anyhow!("workspace has no repository URL"))?;

            let path =
                source::materialize_git_snapshot(&ctx.data_dir, repo_url, workspace.git_ref.as_deref())
                    .await?;
            workspaces::set_snapshot(&ctx.pool, workspace.id, path.to_str(), None).await?;
            ctx.logs
                .append(workspace.id, "the git repository has been cloned")
                .await?;

            Ok((path, config_file_name))
        }
        ConfigSource::Template => {
            let version_id = workspace
                .template_version_id
                .ok_or_else(|| anyhow!("workspace has no template version"))?;
            let version = templates::get(&ctx.pool, version_id).await?;

            let path = PathBuf::from(&version.snapshot_path);
            if !path.exists() {
                bail!("configuration snapshot missing: {}", path.display());
            }

            Ok((path, version.config_file_path))
        }
    }
}

async fn client_for(ctx: &JobContext, workspace: &Workspace) -> anyhow::Result<RunnerClient> {
    let runner_id = workspace
        .runner_id
        .ok_or_else(|| anyhow!("workspace has no runner assigned"))?;
    let runner = runners::get(&ctx.pool, runner_id).await?;

    Ok(RunnerClient::new(&runner, ctx.runner_http_timeout)?)
}

fn parse_status(reported: &str) -> anyhow::Result<WorkspaceStatus> {
    reported
        .parse::<WorkspaceStatus>()
        .map_err(|e| anyhow!(e))
        .context("runner reported an unknown status")
}

fn to_inventory(details: &RunnerWorkspaceDetails) -> Vec<NewContainer> {
    details
        .containers
        .iter()
        .map(|c| NewContainer {
            runtime_id: c.id.clone(),
            name: c.name.clone(),
            image: c.image.clone(),
            user_id: c.container_user,
            user_name: c.container_user_name.clone(),
            workspace_path: c.workspace_path.clone(),
            ports: c
                .exposed_ports
                .iter()
                .map(|p| NewPort {
                    service_name: p.service_name.clone(),
                    port_number: p.port_number,
                    public: p.public,
                })
                .collect(),
        })
        .collect()
}

async fn load(ctx: &JobContext, workspace_id: i64) -> Result<Workspace> {
    workspaces::maybe_get(&ctx.pool, workspace_id)
        .await?
        .ok_or_else(|| {
            crate::error::OrchestrationError::recoverable(format!(
                "workspace {workspace_id} not found"
            ))
        })
}

/// Record a handler failure on the workspace itself. The queue sees the
/// job as delivered; the user sees the log line and the `Error` status.
async fn fail_stop(ctx: &JobContext, workspace_id: i64, error: &anyhow::Error) {
    warn!("workspace {workspace_id} job failed: {error:#}");

    if let Err(e) = ctx.logs.append(workspace_id, &error.to_string()).await {
        warn!("failed to append workspace {workspace_id} log: {e}");
    }
    if let Err(e) = workspaces::set_status(&ctx.pool, workspace_id, WorkspaceStatus::Error).await {
        warn!("failed to mark workspace {workspace_id} as errored: {e}");
    }
}
