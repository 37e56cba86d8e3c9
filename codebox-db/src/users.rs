//! Narrow user/session lookup interface. Account CRUD and session
//! issuance live outside the control plane; only token and id lookups
//! are consumed here.

use crate::error::{DbError, Result};
use crate::now_ts;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl User {
    /// Git identity injected into started workspaces.
    pub fn git_user_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim().to_string();
        if full.is_empty() {
            self.username.clone()
        } else {
            full
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub token: String,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
}

pub async fn get_user(pool: &SqlitePool, id: i64) -> Result<User> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("user {id}")))
}

/// Resolve an unexpired session token to its user. Unknown or expired
/// tokens are `None`, not an error.
pub async fn user_by_session_token(pool: &SqlitePool, token: &str) -> Result<Option<User>> {
    let row = sqlx::query_as::<_, User>(
        "SELECT u.id, u.username, u.first_name, u.last_name, u.email
         FROM users u
         JOIN sessions s ON s.user_id = u.id
         WHERE s.token = ? AND s.expires_at > ?",
    )
    .bind(token)
    .bind(now_ts())
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
