//! Cross-origin session handoff.
//!
//! Cookies do not cross origins, so a forwarded subdomain cannot see the
//! main session cookie. The authorize endpoint (main origin, session
//! required) mints a short-lived single-use code and bounces the browser
//! to the forwarded origin's callback, which exchanges the code for a
//! cookie scoped to that origin.

use crate::auth;
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use codebox_db::{auth_codes, users};
use serde::Deserialize;

const AUTH_CODE_TTL_SECS: i64 = 120;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/v1/auth/subdomains/authorize", get(authorize))
}

#[derive(Deserialize)]
struct AuthorizeQuery {
    next: String,
}

async fn authorize(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Response, ApiError> {
    let token = auth::session_token(&headers, &state.config.auth_cookie_name)
        .ok_or(ApiError::Unauthorized)?;
    if users::user_by_session_token(&state.pool, &token)
        .await?
        .is_none()
    {
        return Err(ApiError::Unauthorized);
    }

    let next = url::Url::parse(&query.next)
        .map_err(|_| ApiError::BadRequest("invalid next URL".to_string()))?;
    if next.host_str().is_none() {
        return Err(ApiError::BadRequest("next URL has no host".to_string()));
    }

    let code = codebox_core::token::generate_authorization_code();
    auth_codes::insert(&state.pool, &code, &token, AUTH_CODE_TTL_SECS).await?;

    let mut callback = next.clone();
    callback.set_path(&state.config.handoff_callback_path());
    callback.set_query(None);
    callback
        .query_pairs_mut()
        .append_pair("code", &code)
        .append_pair("next", &query.next);

    Ok(Redirect::temporary(callback.as_str()).into_response())
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    code: String,
    next: String,
}

/// Exchange a handoff code for the forwarded-origin cookie. The route
/// path carries the cookie name and is registered at startup.
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    match callback_inner(&state, &query).await {
        Ok(response) => response,
        Err(e) => e.into_html_response(),
    }
}

async fn callback_inner(state: &AppState, query: &CallbackQuery) -> Result<Response, ApiError> {
    let code = auth_codes::take(&state.pool, &query.code)
        .await?
        .ok_or_else(|| ApiError::BadRequest("unknown or expired authorization code".to_string()))?;

    let cookie = format!(
        "{}={}; HttpOnly; Path=/",
        state.config.forward_cookie_name(),
        code.session_token
    );
    let cookie =
        HeaderValue::from_str(&cookie).map_err(|e| ApiError::Internal(e.to_string()))?;

    let mut response = Redirect::temporary(&query.next).into_response();
    response.headers_mut().append(header::SET_COOKIE, cookie);

    Ok(response)
}
