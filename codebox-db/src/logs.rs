//! Append-only workspace log blobs, one file per workspace under the
//! data directory. The blob always reflects only the latest job attempt;
//! every job clears it before doing any work.

use crate::error::Result;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct WorkspaceLogStore {
    dir: PathBuf,
}

impl WorkspaceLogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, workspace_id: i64) -> PathBuf {
        self.dir.join(format!("workspace-{workspace_id}.log"))
    }

    /// Append text to the workspace's log, adding a trailing newline if
    /// the chunk doesn't carry one.
    pub async fn append(&self, workspace_id: i64, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.dir).await?;

        let mut chunk = text.to_string();
        if !chunk.ends_with('\n') {
            chunk.push('\n');
        }

        let path = self.path(workspace_id);
        let existing = tokio::fs::read_to_string(&path).await.unwrap_or_default();
        tokio::fs::write(&path, existing + &chunk).await?;

        Ok(())
    }

    /// Full log text; an absent blob reads as empty.
    pub async fn read(&self, workspace_id: i64) -> Result<String> {
        match tokio::fs::read_to_string(self.path(workspace_id)).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn clear(&self, workspace_id: i64) -> Result<()> {
        match tokio::fs::remove_file(self.path(workspace_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_read_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkspaceLogStore::new(dir.path());

        store.append(7, "cloning repository").await.unwrap();
        store.append(7, "workspace started\n").await.unwrap();

        let text = store.read(7).await.unwrap();
        assert_eq!(text, "cloning repository\nworkspace started\n");

        store.clear(7).await.unwrap();
        assert_eq!(store.read(7).await.unwrap(), "");

        // clearing a missing blob is fine
        store.clear(7).await.unwrap();
    }

    #[tokio::test]
    async fn blobs_are_per_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkspaceLogStore::new(dir.path());

        store.append(1, "one").await.unwrap();
        store.append(2, "two").await.unwrap();

        assert_eq!(store.read(1).await.unwrap(), "one\n");
        assert_eq!(store.read(2).await.unwrap(), "two\n");
    }
}
