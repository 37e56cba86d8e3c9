//! Subdomain-based port addressing.
//!
//! A forwarded port is reachable as
//! `codebox--<workspaceId>--<containerName>--<port>.<wildcard-domain>`.
//! The middleware runs ahead of normal routing: requests whose host
//! falls under the wildcard domain are dispatched straight to the port
//! forward handler with the original path, except for the fixed handoff
//! callback path, which always passes through.

use crate::error::ApiError;
use crate::routes::forward;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubdomainTarget {
    pub workspace_id: i64,
    pub container_name: String,
    pub port_number: u16,
}

impl SubdomainTarget {
    /// Decode a request host against the wildcard domain. `None` means
    /// the host does not address a forwarded port; hosts under the
    /// wildcard that fail to decode are malformed, not pass-through.
    pub fn parse(host: &str, wildcard: &str) -> Option<Self> {
        let host = host.split(':').next()?;
        let prefix = host.strip_suffix(wildcard)?.strip_suffix('.')?;

        // only the last label before the wildcard domain is addressing
        let label = prefix.rsplit('.').next()?;

        let tokens: Vec<&str> = label.split("--").collect();
        if tokens.len() != 4 || tokens[0] != "codebox" {
            return None;
        }

        let workspace_id: i64 = tokens[1].parse().ok()?;
        if workspace_id <= 0 {
            return None;
        }

        if tokens[2].is_empty() {
            return None;
        }

        let port_number: u16 = tokens[3].parse().ok()?;
        if port_number == 0 {
            return None;
        }

        Some(Self {
            workspace_id,
            container_name: tokens[2].to_string(),
            port_number,
        })
    }
}

fn is_under_wildcard(host: &str, wildcard: &str) -> bool {
    host.split(':')
        .next()
        .is_some_and(|h| h.ends_with(&format!(".{wildcard}")))
}

pub async fn subdomain_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(wildcard) = state.config.wildcard_domain.clone() else {
        return next.run(req).await;
    };
    if !state.config.use_subdomains {
        return next.run(req).await;
    }

    let Some(host) = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.to_string())
    else {
        return next.run(req).await;
    };

    if !is_under_wildcard(&host, &wildcard) {
        return next.run(req).await;
    }

    // the handoff callback must reach the router on any origin
    if req.uri().path() == state.config.handoff_callback_path() {
        return next.run(req).await;
    }

    match SubdomainTarget::parse(&host, &wildcard) {
        Some(target) => forward::handle_subdomain(state, target, req).await,
        None => ApiError::NotFound.into_html_response(),
    }
}
