//! Narrow template-version lookup interface. Template CRUD and
//! publication are external; the orchestrator only reads versions.

use crate::error::{DbError, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TemplateVersion {
    pub id: i64,
    pub template_id: i64,
    pub version: i64,
    pub config_file_path: String,
    pub snapshot_path: String,
    pub published: bool,
}

pub async fn get(pool: &SqlitePool, id: i64) -> Result<TemplateVersion> {
    sqlx::query_as::<_, TemplateVersion>("SELECT * FROM template_versions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("template version {id}")))
}

/// Latest published version of a template, used when a template-backed
/// workspace refreshes its configuration.
pub async fn latest_published(pool: &SqlitePool, template_id: i64) -> Result<Option<TemplateVersion>> {
    let row = sqlx::query_as::<_, TemplateVersion>(
        "SELECT * FROM template_versions
         WHERE template_id = ? AND published = 1
         ORDER BY version DESC LIMIT 1",
    )
    .bind(template_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_db, insert_template_version};

    #[tokio::test]
    async fn latest_published_skips_drafts() {
        let pool = create_test_db().await;
        insert_template_version(&pool, 7, 1, true).await;
        insert_template_version(&pool, 7, 2, true).await;
        insert_template_version(&pool, 7, 3, false).await;

        let latest = latest_published(&pool, 7).await.unwrap().unwrap();
        assert_eq!(latest.version, 2);

        assert!(latest_published(&pool, 99).await.unwrap().is_none());
    }
}
