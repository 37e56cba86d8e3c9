use askama::Template;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

/// Uniform text for anything the caller is not allowed to learn about.
/// Missing and not-owned resources must be indistinguishable.
pub const NOT_FOUND_MESSAGE: &str = "not found or no permission";

#[derive(Debug)]
pub enum ApiError {
    NotFound,
    BadRequest(String),
    Unauthorized,
    Forbidden(String),
    /// The workspace's runner has no reachable endpoint right now.
    RunnerNotConnected,
    BadGateway(String),
    Unavailable(String),
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, String) {
        match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE.to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "authentication required".to_string()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ApiError::RunnerNotConnected => {
                (StatusCode::BAD_GATEWAY, "the runner is not connected".to_string())
            }
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        }
    }

    /// Browser-facing rendition, used by the forwarding and handoff
    /// routes where the caller is a human, not an API client.
    pub fn into_html_response(self) -> Response {
        let (status, message) = self.parts();
        let page = ErrorPage {
            status: status.as_u16(),
            message: &message,
        };

        match page.render() {
            Ok(body) => (status, Html(body)).into_response(),
            Err(_) => (status, message).into_response(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.parts();
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<codebox_db::DbError> for ApiError {
    fn from(err: codebox_db::DbError) -> Self {
        match err {
            codebox_db::DbError::NotFound(_) => ApiError::NotFound,
            codebox_db::DbError::InvalidTransition { from, to } => {
                ApiError::BadRequest(format!("cannot move a {from} workspace to {to}"))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<codebox_runner::RunnerError> for ApiError {
    fn from(err: codebox_runner::RunnerError) -> Self {
        match err {
            codebox_runner::RunnerError::NotConnected => ApiError::RunnerNotConnected,
            codebox_runner::RunnerError::NoFreePorts => {
                ApiError::Unavailable("no free tunnel ports".to_string())
            }
            codebox_runner::RunnerError::InvalidToken => ApiError::Unauthorized,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<codebox_orchestrator::OrchestrationError> for ApiError {
    fn from(err: codebox_orchestrator::OrchestrationError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

#[derive(Template)]
#[template(path = "error.html")]
struct ErrorPage<'a> {
    status: u16,
    message: &'a str,
}
