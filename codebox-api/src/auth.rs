//! Session resolution for the lifecycle API.
//!
//! Sessions are issued elsewhere; this layer only resolves a token to
//! its user. Browsers carry the token in the session cookie, API
//! clients in an `Authorization: Bearer` header.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use codebox_db::users::{self, User};

#[derive(Clone, Debug)]
pub struct CurrentUser(pub User);

/// Value of a named cookie, if any of the `Cookie` headers carry it.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header_value in headers.get_all(header::COOKIE) {
        let Ok(raw) = header_value.to_str() else {
            continue;
        };
        for pair in raw.split(';') {
            if let Some((key, value)) = pair.trim().split_once('=') {
                if key == name {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

/// Session token from the main cookie or a bearer header.
pub fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    cookie_value(headers, cookie_name).or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|t| t.to_string())
    })
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = session_token(req.headers(), &state.config.auth_cookie_name)
        .ok_or(ApiError::Unauthorized)?;

    let user = users::user_by_session_token(&state.pool, &token)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    req.extensions_mut().insert(CurrentUser(user));

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn cookie_lookup_handles_multiple_pairs() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("other=1; codebox_session=tok-abc; theme=dark"),
        );

        assert_eq!(
            cookie_value(&headers, "codebox_session").as_deref(),
            Some("tok-abc")
        );
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn bearer_header_is_a_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer tok-xyz"),
        );

        assert_eq!(
            session_token(&headers, "codebox_session").as_deref(),
            Some("tok-xyz")
        );
    }
}
