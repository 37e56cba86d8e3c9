//! Single-use authorization codes for the cross-origin session handoff.

use crate::error::Result;
use crate::now_ts;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

#[derive(Debug, Clone)]
pub struct AuthorizationCode {
    pub id: i64,
    pub code: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct CodeRow {
    id: i64,
    code: String,
    session_token: String,
    expires_at: i64,
    created_at: i64,
}

impl From<CodeRow> for AuthorizationCode {
    fn from(row: CodeRow) -> Self {
        Self {
            id: row.id,
            code: row.code,
            session_token: row.session_token,
            expires_at: DateTime::from_timestamp(row.expires_at, 0).unwrap_or_default(),
            created_at: DateTime::from_timestamp(row.created_at, 0).unwrap_or_default(),
        }
    }
}

pub async fn insert(
    pool: &SqlitePool,
    code: &str,
    session_token: &str,
    ttl_secs: i64,
) -> Result<AuthorizationCode> {
    let now = now_ts();

    let id = sqlx::query(
        "INSERT INTO authorization_codes (code, session_token, expires_at, created_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(code)
    .bind(session_token)
    .bind(now + ttl_secs)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok(AuthorizationCode {
        id,
        code: code.to_string(),
        session_token: session_token.to_string(),
        expires_at: DateTime::from_timestamp(now + ttl_secs, 0).unwrap_or_default(),
        created_at: DateTime::from_timestamp(now, 0).unwrap_or_default(),
    })
}

/// Consume a code: the row is deleted whether it is valid or expired, so
/// a second exchange always fails. Returns `None` for unknown, expired,
/// or already-used codes.
pub async fn take(pool: &SqlitePool, code: &str) -> Result<Option<AuthorizationCode>> {
    let row = sqlx::query_as::<_, CodeRow>(
        "DELETE FROM authorization_codes WHERE code = ? RETURNING *",
    )
    .bind(code)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    if row.expires_at <= now_ts() {
        return Ok(None);
    }

    Ok(Some(row.into()))
}

/// Delete all expired codes, returning how many were removed.
pub async fn sweep_expired(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM authorization_codes WHERE expires_at <= ?")
        .bind(now_ts())
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
