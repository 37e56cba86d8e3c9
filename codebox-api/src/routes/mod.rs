pub mod forward;
pub mod handoff;
pub mod health;
pub mod runners;
pub mod workspaces;

use crate::error::ApiError;
use crate::state::AppState;
use crate::{auth, subdomain};
use axum::routing::get;
use axum::{middleware, Router};
use codebox_core::Config;
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub async fn create_app(pool: SqlitePool, config: Config) -> anyhow::Result<Router> {
    let state = AppState::new(pool, config);

    // the callback path embeds the configured cookie name
    let callback_path = state.config.handoff_callback_path();

    let app = Router::new()
        .merge(health::routes())
        .merge(runners::routes())
        .merge(handoff::routes())
        .route(&callback_path, get(handoff::callback))
        .merge(forward::routes())
        .merge(
            workspaces::routes()
                .merge(forward::authed_routes())
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    auth::auth_middleware,
                )),
        )
        .fallback(fallback)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            subdomain::subdomain_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(app)
}

async fn fallback() -> ApiError {
    ApiError::NotFound
}
