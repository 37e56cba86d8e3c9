//! Configuration snapshot materialization.
//!
//! A workspace's configuration travels to the runner as a tar.gz blob.
//! Git-backed workspaces get a fresh shallow clone packed under
//! `<data>/git-sources/`; template-backed workspaces reuse the archive
//! captured when the template version was published.

use anyhow::Context;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const GIT_SOURCES_DIR: &str = "git-sources";

/// Shallow-clone a repository and pack the checkout into a tar.gz under
/// the data directory. Returns the archive path. The clone and pack are
/// blocking work and run off the async threads.
pub async fn materialize_git_snapshot(
    data_dir: &Path,
    repo_url: &str,
    git_ref: Option<&str>,
) -> anyhow::Result<PathBuf> {
    let dest_dir = data_dir.join(GIT_SOURCES_DIR);
    tokio::fs::create_dir_all(&dest_dir).await?;

    let archive_path = dest_dir.join(format!("{}.tar.gz", Uuid::new_v4()));

    let repo_url = repo_url.to_string();
    let git_ref = git_ref.map(str::to_string);
    let archive = archive_path.clone();

    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let checkout = tempfile::tempdir()?;
        clone_shallow(&repo_url, git_ref.as_deref(), checkout.path())
            .with_context(|| format!("failed to clone {repo_url}"))?;
        pack_dir(checkout.path(), &archive)?;
        Ok(())
    })
    .await??;

    Ok(archive_path)
}

fn clone_shallow(url: &str, reference: Option<&str>, dest: &Path) -> anyhow::Result<()> {
    let mut fetch_options = git2::FetchOptions::new();
    fetch_options.depth(1);

    let mut builder = git2::build::RepoBuilder::new();
    builder.fetch_options(fetch_options);
    if let Some(reference) = reference {
        builder.branch(reference);
    }

    builder.clone(url, dest)?;
    Ok(())
}

fn pack_dir(src: &Path, archive: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(archive)?;
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());

    let mut tar = tar::Builder::new(encoder);
    tar.append_dir_all(".", src)?;
    tar.into_inner()?.finish()?;

    Ok(())
}

/// Delete a materialized snapshot; a missing file is fine.
pub async fn remove_snapshot(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
